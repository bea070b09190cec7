//! # Bus Snapshot and Line Layout
//!
//! One sampled word of the GPIO port is the unit everything above operates
//! on: the edge detector compares two snapshots, the address latch pulls the
//! address bits out of one, and the dispatch branch reads the read/write line
//! from the same snapshot that carried the strobe edge.

use crate::config::PinConfig;
use crate::types::ROW_BITS;

/// All monitored lines captured at one instant. Immutable once taken;
/// consecutive snapshots are compared by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusSnapshot(u32);

impl BusSnapshot {
    pub fn new(raw: u32) -> Self {
        BusSnapshot(raw)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }
}

/// Pin-to-bit mapping with the masks the decode path needs precomputed.
///
/// The strobe lines are active low: a falling edge means the strobe has
/// become active. The read/write line is also active low, low meaning the
/// requester is writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusLayout {
    address_mask: u32,
    address_shift: u32,
    data_mask: u32,
    data_shift: u32,
    row_strobe_mask: u32,
    column_strobe_mask: u32,
    strobe_mask: u32,
    write_mask: u32,
    direction_pin: u8,
    mode_select_pin: u8,
    address_base: u8,
    write_pin: u8,
    column_strobe_pin: u8,
    row_strobe_pin: u8,
    data_base: u8,
}

/// Highest GPIO bit the sampled word carries.
const MAX_PIN: u8 = 29;

impl BusLayout {
    pub fn new(pins: &PinConfig) -> Result<Self, String> {
        let single_pins = [
            ("direction", pins.direction),
            ("write", pins.write),
            ("column_strobe", pins.column_strobe),
            ("row_strobe", pins.row_strobe),
            ("mode_select", pins.mode_select),
        ];

        for (name, pin) in single_pins {
            if pin > MAX_PIN {
                return Err(format!("Pin {} for {} exceeds GPIO range", pin, name));
            }
        }
        if pins.address_base as u32 + ROW_BITS - 1 > MAX_PIN as u32 {
            return Err("Address bus exceeds GPIO range".to_string());
        }
        if pins.data_base as u32 + 7 > MAX_PIN as u32 {
            return Err("Data bus exceeds GPIO range".to_string());
        }

        let address_mask = ((1u32 << ROW_BITS) - 1) << pins.address_base;
        let data_mask = 0xFFu32 << pins.data_base;

        // No line may share a GPIO bit with another
        let mut used = address_mask;
        for mask in [data_mask].into_iter().chain(
            single_pins
                .into_iter()
                .map(|(_, pin)| 1u32 << pin),
        ) {
            if used & mask != 0 {
                return Err("Pin assignment overlaps another bus line".to_string());
            }
            used |= mask;
        }

        Ok(BusLayout {
            address_mask,
            address_shift: pins.address_base as u32,
            data_mask,
            data_shift: pins.data_base as u32,
            row_strobe_mask: 1 << pins.row_strobe,
            column_strobe_mask: 1 << pins.column_strobe,
            strobe_mask: (1 << pins.row_strobe) | (1 << pins.column_strobe),
            write_mask: 1 << pins.write,
            direction_pin: pins.direction,
            mode_select_pin: pins.mode_select,
            address_base: pins.address_base,
            write_pin: pins.write,
            column_strobe_pin: pins.column_strobe,
            row_strobe_pin: pins.row_strobe,
            data_base: pins.data_base,
        })
    }

    pub fn address_mask(&self) -> u32 {
        self.address_mask
    }

    pub fn data_mask(&self) -> u32 {
        self.data_mask
    }

    pub fn data_shift(&self) -> u32 {
        self.data_shift
    }

    pub fn row_strobe_mask(&self) -> u32 {
        self.row_strobe_mask
    }

    pub fn column_strobe_mask(&self) -> u32 {
        self.column_strobe_mask
    }

    /// Both strobe bits; the edge detector watches only these.
    pub fn strobe_mask(&self) -> u32 {
        self.strobe_mask
    }

    pub fn write_mask(&self) -> u32 {
        self.write_mask
    }

    pub fn direction_pin(&self) -> u8 {
        self.direction_pin
    }

    pub fn mode_select_pin(&self) -> u8 {
        self.mode_select_pin
    }

    pub fn address_base(&self) -> u8 {
        self.address_base
    }

    pub fn data_base(&self) -> u8 {
        self.data_base
    }

    pub fn write_pin(&self) -> u8 {
        self.write_pin
    }

    pub fn column_strobe_pin(&self) -> u8 {
        self.column_strobe_pin
    }

    pub fn row_strobe_pin(&self) -> u8 {
        self.row_strobe_pin
    }

    /// Address bus bits of a snapshot.
    pub fn address_bits(&self, snapshot: BusSnapshot) -> u8 {
        ((snapshot.raw() & self.address_mask) >> self.address_shift) as u8
    }

    /// Data bus bits of a snapshot.
    pub fn data_bits(&self, snapshot: BusSnapshot) -> u8 {
        ((snapshot.raw() & self.data_mask) >> self.data_shift) as u8
    }

    pub fn row_strobe_active(&self, snapshot: BusSnapshot) -> bool {
        snapshot.raw() & self.row_strobe_mask == 0
    }

    pub fn column_strobe_active(&self, snapshot: BusSnapshot) -> bool {
        snapshot.raw() & self.column_strobe_mask == 0
    }

    /// True when the read/write line says the requester is reading.
    pub fn is_read(&self, snapshot: BusSnapshot) -> bool {
        snapshot.raw() & self.write_mask != 0
    }

    pub fn mode_select_asserted(&self, snapshot: BusSnapshot) -> bool {
        snapshot.raw() & (1 << self.mode_select_pin) != 0
    }

    /// Strobe bits of a snapshot, as held between polls by the edge detector.
    pub fn strobe_bits(&self, snapshot: BusSnapshot) -> u32 {
        snapshot.raw() & self.strobe_mask
    }

    /// True when at least one strobe that was inactive in `previous_strobes`
    /// is active in `current`.
    pub fn strobe_fell(&self, previous_strobes: u32, current: BusSnapshot) -> bool {
        previous_strobes & !current.raw() & self.strobe_mask != 0
    }
}
