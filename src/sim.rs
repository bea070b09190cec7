//! # Simulated Bus Requester
//!
//! Plays the external computer's side of the protocol so the engine can be
//! exercised without hardware. High-level scripted operations compile into
//! the exact snapshot sequences the bus would carry, including page-mode
//! runs that keep the row strobe low across consecutive reads of one row.
//! Every port operation is recorded so tests can assert the turnaround
//! ordering, and the data bits the engine drives are sampled at the moment
//! the requester releases the column strobe, like a real bus latch would.

use std::collections::VecDeque;

use crate::bus::{BusLayout, BusSnapshot};
use crate::gpio::{GpioPort, PinDirection, PinPull};

/// One bus operation as the requester would issue it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusOp {
    Read { row: u8, column: u8 },
    Write { row: u8, column: u8, value: u8 },
}

/// A recorded port operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortOp {
    Configure {
        pin: u8,
        direction: PinDirection,
        pull: PinPull,
    },
    WritePin {
        pin: u8,
        high: bool,
    },
    SetDirection {
        mask: u32,
        direction: PinDirection,
    },
    WriteMasked {
        mask: u32,
        value: u32,
    },
}

/// How many polls a column strobe stays low during a read before the
/// requester latches the data and releases it.
const READ_HOLD_POLLS: u32 = 2;

struct TimelineStep {
    raw: u32,
    /// How many successive `read_all_pins` calls return this step.
    polls: u32,
    /// Sample the data bus when this step expires (column strobe release).
    capture_read: bool,
}

/// Scriptable [`GpioPort`] implementation driving the requester's side of
/// the bus from a compiled timeline of snapshots.
pub struct SimulatedRequester {
    layout: BusLayout,
    timeline: VecDeque<TimelineStep>,
    /// Bits currently driven by the emulator side.
    driven: u32,
    /// Pins the emulator has switched to outputs.
    output_mask: u32,
    mode_select_high: bool,
    scripted_row: Option<u8>,
    expected_events: usize,
    observed_reads: Vec<u8>,
    ops: Vec<PortOp>,
    read_count: usize,
}

impl SimulatedRequester {
    pub fn new(layout: BusLayout) -> Self {
        SimulatedRequester {
            layout,
            timeline: VecDeque::new(),
            driven: 0,
            output_mask: 0,
            mode_select_high: false,
            scripted_row: None,
            expected_events: 0,
            observed_reads: Vec::new(),
            ops: Vec::new(),
            read_count: 0,
        }
    }

    /// Resting bus: strobes and the read/write line pulled high, address
    /// bus pulled down, nothing on the data lines.
    fn idle_raw(&self) -> u32 {
        self.layout.strobe_mask() | self.layout.write_mask()
    }

    fn mode_bit(&self) -> u32 {
        if self.mode_select_high {
            1 << self.layout.mode_select_pin()
        } else {
            0
        }
    }

    /// Sets the boot-time mode-select level. High selects the trace dump.
    pub fn set_mode_select(&mut self, high: bool) {
        self.mode_select_high = high;
    }

    /// Appends a raw snapshot to the timeline, bypassing protocol
    /// compilation. For protocol-violation scenarios.
    pub fn push_raw(&mut self, raw: u32, polls: u32) {
        self.timeline.push_back(TimelineStep {
            raw,
            polls,
            capture_read: false,
        });
    }

    /// Compiles a sequence of operations onto the timeline.
    ///
    /// A row strobe is emitted only when the row differs from the one the
    /// requester last strobed: reads leave the row strobe low afterwards
    /// (page mode), while writes end with both strobes retracted and force
    /// a fresh row strobe for the next operation.
    pub fn script(&mut self, ops: &[BusOp]) {
        for &op in ops {
            match op {
                BusOp::Read { row, column } => {
                    self.emit_row_strobe_if_needed(row);
                    // Column strobe falls with the column address, the
                    // read/write line high and the row strobe still low
                    let cas_low = self.addr_raw(column) & !self.layout.column_strobe_mask()
                        & !self.layout.row_strobe_mask();
                    self.timeline.push_back(TimelineStep {
                        raw: cas_low,
                        polls: READ_HOLD_POLLS,
                        capture_read: true,
                    });
                    // Column strobe rises first; the row stays latched
                    let cas_high = self.addr_raw(column) & !self.layout.row_strobe_mask();
                    self.timeline.push_back(TimelineStep {
                        raw: cas_high,
                        polls: 2,
                        capture_read: false,
                    });
                    self.expected_events += 1;
                    self.scripted_row = Some(row);
                }
                BusOp::Write { row, column, value } => {
                    self.emit_row_strobe_if_needed(row);
                    let cas_low = (self.addr_raw(column)
                        & !self.layout.column_strobe_mask()
                        & !self.layout.row_strobe_mask()
                        & !self.layout.write_mask())
                        | ((value as u32) << self.layout.data_shift());
                    self.timeline.push_back(TimelineStep {
                        raw: cas_low,
                        polls: 1,
                        capture_read: false,
                    });
                    // The row strobe rises before the column strobe after a
                    // write; one resting step covers the retraction
                    self.timeline.push_back(TimelineStep {
                        raw: self.idle_raw(),
                        polls: 1,
                        capture_read: false,
                    });
                    self.expected_events += 1;
                    self.scripted_row = None;
                }
            }
        }
    }

    fn emit_row_strobe_if_needed(&mut self, row: u8) {
        if self.scripted_row == Some(row) {
            return;
        }

        if self.scripted_row.is_some() {
            // The previous row is still strobed; retract before re-strobing
            self.timeline.push_back(TimelineStep {
                raw: self.idle_raw(),
                polls: 1,
                capture_read: false,
            });
        }

        let ras_low = self.addr_raw(row) & !self.layout.row_strobe_mask();
        self.timeline.push_back(TimelineStep {
            raw: ras_low,
            polls: 1,
            capture_read: false,
        });
        self.expected_events += 1;
        self.scripted_row = Some(row);
    }

    /// Idle lines with `address` on the address bus.
    fn addr_raw(&self, address: u8) -> u32 {
        self.idle_raw() | (((address as u32) << self.layout.address_base() as u32)
            & self.layout.address_mask())
    }

    /// Number of engine events (row latches plus column transactions) the
    /// scripted timeline will produce.
    pub fn expected_events(&self) -> usize {
        self.expected_events
    }

    pub fn is_drained(&self) -> bool {
        self.timeline.is_empty()
    }

    /// Data bytes sampled at each read's column-strobe release.
    pub fn observed_reads(&self) -> &[u8] {
        &self.observed_reads
    }

    pub fn ops(&self) -> &[PortOp] {
        &self.ops
    }

    pub fn read_count(&self) -> usize {
        self.read_count
    }
}

impl GpioPort for SimulatedRequester {
    fn configure_pin(&mut self, pin: u8, direction: PinDirection, pull: PinPull) {
        if direction == PinDirection::Output {
            self.output_mask |= 1 << pin;
        } else {
            self.output_mask &= !(1 << pin);
        }
        self.ops.push(PortOp::Configure {
            pin,
            direction,
            pull,
        });
    }

    fn read_all_pins(&mut self) -> BusSnapshot {
        self.read_count += 1;

        let mut capture = false;
        let mut expired = false;
        let external = if let Some(step) = self.timeline.front_mut() {
            let raw = step.raw;
            step.polls -= 1;
            if step.polls == 0 {
                capture = step.capture_read;
                expired = true;
            }
            raw
        } else {
            self.idle_raw()
        };
        if expired {
            self.timeline.pop_front();
        }

        let merged = ((external | self.mode_bit()) & !self.output_mask)
            | (self.driven & self.output_mask);

        if capture {
            let data = (merged & self.layout.data_mask()) >> self.layout.data_shift();
            self.observed_reads.push(data as u8);
        }

        BusSnapshot::new(merged)
    }

    fn write_pin(&mut self, pin: u8, high: bool) {
        if high {
            self.driven |= 1 << pin;
        } else {
            self.driven &= !(1 << pin);
        }
        self.ops.push(PortOp::WritePin { pin, high });
    }

    fn set_pins_direction(&mut self, mask: u32, direction: PinDirection) {
        if direction == PinDirection::Output {
            self.output_mask |= mask;
        } else {
            self.output_mask &= !mask;
        }
        self.ops.push(PortOp::SetDirection { mask, direction });
    }

    fn write_masked(&mut self, mask: u32, value: u32) {
        self.driven = (self.driven & !mask) | (value & mask);
        self.ops.push(PortOp::WriteMasked { mask, value });
    }
}
