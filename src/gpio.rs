use crate::bus::BusSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinDirection {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinPull {
    None,
    Up,
    Down,
}

/// The narrow platform capability the bus core consumes.
///
/// Board bring-up (clock selection, supply voltage, status indicators) stays
/// outside this trait; the core only needs to configure its own lines, sample
/// the whole port in one read, and drive the direction and data pins.
///
/// `read_all_pins` sits on the hot path: implementations must return one
/// atomic sample of every line with no blocking and no side effects beyond
/// advancing a simulation.
pub trait GpioPort {
    fn configure_pin(&mut self, pin: u8, direction: PinDirection, pull: PinPull);

    /// One indivisible sample of all monitored lines.
    fn read_all_pins(&mut self) -> BusSnapshot;

    fn write_pin(&mut self, pin: u8, high: bool);

    /// Switches every pin in `mask` to the given direction at once.
    fn set_pins_direction(&mut self, mask: u32, direction: PinDirection);

    /// Drives `value` onto the pins selected by `mask`; other bits of
    /// `value` are ignored.
    fn write_masked(&mut self, mask: u32, value: u32);
}
