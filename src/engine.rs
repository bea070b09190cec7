//! # Protocol State Machine
//!
//! The orchestrator of one full bus transaction cycle: busy-poll the port
//! until a strobe falls, latch a row or resolve a column, dispatch the read
//! or write, and go back to polling. The loop holds no state beyond the row
//! latch and the previously observed strobe bits, which is exactly what
//! implements page mode: a latched row silently persists across any number
//! of column strobes until the row strobe falls again.
//!
//! The action taken on a decoded transaction is injected as a
//! [`TransactionHandler`], so the same decode path serves memory emulation
//! (store-backed) and trace capture (log-backed) without duplicated loops.

use std::fmt;

use crate::bus::{BusLayout, BusSnapshot};
use crate::direction::{BusDrive, DirectionController};
use crate::gpio::{GpioPort, PinDirection, PinPull};
use crate::types::DramAddress;

/// What to do with a decoded transaction.
pub trait TransactionHandler {
    /// Called on a read dispatch. Returning a byte makes the engine drive it
    /// onto the data bus; returning `None` (trace capture) leaves the bus
    /// untouched and the engine only waits out the strobe.
    fn on_read(&mut self, address: DramAddress) -> Option<u8>;

    /// Called on a write dispatch with the data bits sampled in the same
    /// snapshot that carried the strobe edge.
    fn on_write(&mut self, address: DramAddress, value: u8);

    /// True once the handler has reached a terminal state. The engine's
    /// `run` loop exits after the dispatch that reports this; the
    /// store-backed handler never does.
    fn halted(&self) -> bool {
        false
    }
}

/// One decoded bus event, reported by [`BusEngine::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusTransaction {
    RowLatch { row: u8 },
    Read { address: DramAddress, value: Option<u8> },
    Write { address: DramAddress, value: u8 },
}

impl fmt::Display for BusTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusTransaction::RowLatch { row } => write!(f, "row latch: 0x{:02X}", row),
            BusTransaction::Read {
                address,
                value: Some(value),
            } => write!(
                f,
                "RD 0x{} (row 0x{:02X}, col 0x{:02X}) -> 0x{:02X}",
                address,
                address.row(),
                address.column(),
                value
            ),
            BusTransaction::Read {
                address,
                value: None,
            } => write!(
                f,
                "RD 0x{} (row 0x{:02X}, col 0x{:02X}) -> recorded",
                address,
                address.row(),
                address.column()
            ),
            BusTransaction::Write { address, value } => write!(
                f,
                "WR 0x{} (row 0x{:02X}, col 0x{:02X}) <- 0x{:02X}",
                address,
                address.row(),
                address.column(),
                value
            ),
        }
    }
}

/// Running counts of decoded events.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    pub row_strobes: u64,
    pub reads: u64,
    pub writes: u64,
}

impl EngineStats {
    pub fn transactions(&self) -> u64 {
        self.reads + self.writes
    }
}

/// Boot-time mode selection, decided by one sample of the mode-select input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootMode {
    /// Dump the previously persisted trace; never touches the bus.
    DumpTrace,
    /// Run the bus loop (emulate or capture, per handler).
    RunBus,
}

/// Samples the mode-select input once. The line is pulled up so an open
/// switch reads asserted and selects the dump: a freshly captured trace can
/// only be overwritten when the switch deliberately grounds the line.
pub fn select_boot_mode<P: GpioPort>(port: &mut P, layout: &BusLayout) -> BootMode {
    port.configure_pin(layout.mode_select_pin(), PinDirection::Input, PinPull::Up);
    let snapshot = port.read_all_pins();
    if layout.mode_select_asserted(snapshot) {
        BootMode::DumpTrace
    } else {
        BootMode::RunBus
    }
}

/// The bus-protocol state machine.
///
/// Owns the port, the row latch, the held strobe bits and the direction
/// controller. `step` blocks until the next strobe edge and executes exactly
/// one decode-dispatch cycle; `run` repeats forever, or until the handler
/// halts.
pub struct BusEngine<P: GpioPort, H: TransactionHandler> {
    port: P,
    handler: H,
    layout: BusLayout,
    direction: DirectionController,
    row_latch: u8,
    previous_strobes: u32,
    stats: EngineStats,
}

impl<P: GpioPort, H: TransactionHandler> BusEngine<P, H> {
    /// Builds the engine and brings its lines to the idle state: every
    /// monitored line an input with the protocol's resting pull, the
    /// direction line driving toward the emulator.
    pub fn new(mut port: P, layout: BusLayout, handler: H) -> Self {
        for i in 0..7u8 {
            port.configure_pin(layout.address_base() + i, PinDirection::Input, PinPull::Down);
        }
        for i in 0..8u8 {
            port.configure_pin(layout.data_base() + i, PinDirection::Input, PinPull::None);
        }
        // Control lines are active low, so they rest pulled high
        port.configure_pin(layout.write_pin(), PinDirection::Input, PinPull::Up);
        port.configure_pin(layout.column_strobe_pin(), PinDirection::Input, PinPull::Up);
        port.configure_pin(layout.row_strobe_pin(), PinDirection::Input, PinPull::Up);
        port.configure_pin(layout.direction_pin(), PinDirection::Output, PinPull::None);

        let mut direction = DirectionController::new(layout.direction_pin(), layout.data_mask());
        direction.init(&mut port);

        BusEngine {
            port,
            handler,
            layout,
            direction,
            row_latch: 0,
            previous_strobes: layout.strobe_mask(),
            stats: EngineStats::default(),
        }
    }

    /// Executes one full transaction cycle: blocks until a strobe edge, then
    /// decodes and dispatches it. Returns the decoded event.
    pub fn step(&mut self) -> BusTransaction {
        let snapshot = self.wait_for_strobe_edge();

        // The column strobe wins when both could appear active: a completed
        // row latch is already in effect before a column strobe is
        // electrically possible.
        let event = if self.layout.column_strobe_active(snapshot) {
            let column = self.layout.address_bits(snapshot);
            let address = DramAddress::combine(self.row_latch, column);

            if self.layout.is_read(snapshot) {
                let value = self.handler.on_read(address);
                if let Some(byte) = value {
                    self.direction.drive_toward_requester(&mut self.port);
                    self.port.write_masked(
                        self.layout.data_mask(),
                        (byte as u32) << self.layout.data_shift(),
                    );
                    // The requester latches the value and releases the strobe
                    self.wait_for_column_release();
                    self.direction.drive_toward_emulator(&mut self.port);
                } else {
                    self.wait_for_column_release();
                }
                self.stats.reads += 1;
                BusTransaction::Read { address, value }
            } else {
                let value = self.layout.data_bits(snapshot);
                self.handler.on_write(address, value);
                self.stats.writes += 1;
                BusTransaction::Write { address, value }
            }
        } else {
            // Row strobe fell: a new row value is on the address bus
            let row = self.layout.address_bits(snapshot);
            self.row_latch = row;
            self.stats.row_strobes += 1;
            BusTransaction::RowLatch { row }
        };

        self.previous_strobes = self.layout.strobe_bits(snapshot);
        event
    }

    /// Runs the transaction loop until the handler halts. The store-backed
    /// handler never halts; this call then never returns.
    pub fn run(&mut self) {
        loop {
            self.step();
            if self.handler.halted() {
                return;
            }
        }
    }

    fn wait_for_strobe_edge(&mut self) -> BusSnapshot {
        loop {
            let snapshot = self.port.read_all_pins();
            if self.layout.strobe_fell(self.previous_strobes, snapshot) {
                return snapshot;
            }
            self.previous_strobes = self.layout.strobe_bits(snapshot);
        }
    }

    fn wait_for_column_release(&mut self) {
        loop {
            let snapshot = self.port.read_all_pins();
            if !self.layout.column_strobe_active(snapshot) {
                return;
            }
        }
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn row_latch(&self) -> u8 {
        self.row_latch
    }

    pub fn bus_drive(&self) -> BusDrive {
        self.direction.state()
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Tears the engine down into its port and handler, for inspection.
    pub fn into_parts(self) -> (P, H) {
        (self.port, self.handler)
    }
}
