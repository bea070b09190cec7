use crate::gpio::{GpioPort, PinDirection};

/// Which party currently drives the shared data lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusDrive {
    /// The requester drives; the emulator only listens. Default state.
    TowardEmulator,
    /// The emulator drives a read value back to the requester.
    TowardRequester,
}

/// Arbitrates the shared data bus through the level-shifter direction line
/// and the data pins' direction.
///
/// Switching order is the safety-critical part: entering read-drive mode the
/// direction line must change before the data pins become outputs, and
/// leaving it the data pins must return to inputs before the direction line
/// changes back. The opposite order briefly puts two drivers on the bus.
pub struct DirectionController {
    direction_pin: u8,
    data_mask: u32,
    state: BusDrive,
}

impl DirectionController {
    pub fn new(direction_pin: u8, data_mask: u32) -> Self {
        DirectionController {
            direction_pin,
            data_mask,
            state: BusDrive::TowardEmulator,
        }
    }

    /// Establishes the idle state: data pins listening, shifter pointed at
    /// the emulator. Must run before the first transaction.
    pub fn init<P: GpioPort>(&mut self, port: &mut P) {
        port.set_pins_direction(self.data_mask, PinDirection::Input);
        port.write_pin(self.direction_pin, true);
        self.state = BusDrive::TowardEmulator;
    }

    /// Turns the bus around so the emulator can place a read value on it.
    #[inline]
    pub fn drive_toward_requester<P: GpioPort>(&mut self, port: &mut P) {
        // Shifter first, data pins second; never the other way around
        port.write_pin(self.direction_pin, false);
        port.set_pins_direction(self.data_mask, PinDirection::Output);
        self.state = BusDrive::TowardRequester;
    }

    /// Returns the bus to the requester after it has latched the value.
    #[inline]
    pub fn drive_toward_emulator<P: GpioPort>(&mut self, port: &mut P) {
        // Stop driving before the shifter turns back
        port.set_pins_direction(self.data_mask, PinDirection::Input);
        port.write_pin(self.direction_pin, true);
        self.state = BusDrive::TowardEmulator;
    }

    pub fn state(&self) -> BusDrive {
        self.state
    }
}
