//! # Transaction Trace Capture
//!
//! The alternate operating mode: instead of serving the bus from a store,
//! every decoded transaction is appended to a bounded in-memory log. When the
//! log fills it is persisted to non-volatile storage exactly once and the
//! device halts; it never resumes capturing.

use log::{error, info};

use crate::engine::TransactionHandler;
use crate::flash::{store_trace, FlashStorage};
use crate::types::DramAddress;

/// Direction of a traced transaction. Encoded with the read/write line's
/// active-low convention: 0 is a write, 1 is a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadWrite {
    Write,
    Read,
}

impl ReadWrite {
    /// Storage byte reserved for slots never written. Distinct from both
    /// legal direction values, so its presence marks the end of a trace.
    pub const SENTINEL: u8 = 0xFF;

    pub fn to_byte(self) -> u8 {
        match self {
            ReadWrite::Write => 0,
            ReadWrite::Read => 1,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(ReadWrite::Write),
            1 => Some(ReadWrite::Read),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ReadWrite::Write => "WR",
            ReadWrite::Read => "RD",
        }
    }
}

/// One observed bus transaction, fixed width for storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceEntry {
    pub row_address: u8,
    pub column_address: u8,
    pub direction: ReadWrite,
}

/// Stored size of one entry, in bytes.
pub const TRACE_ENTRY_SIZE: usize = 3;

impl TraceEntry {
    pub fn new(address: DramAddress, direction: ReadWrite) -> Self {
        TraceEntry {
            row_address: address.row(),
            column_address: address.column(),
            direction,
        }
    }

    pub fn address(&self) -> DramAddress {
        DramAddress::combine(self.row_address, self.column_address)
    }

    pub fn encode(&self) -> [u8; TRACE_ENTRY_SIZE] {
        [self.row_address, self.column_address, self.direction.to_byte()]
    }

    /// Decodes a stored entry. Returns `None` for the unused-slot sentinel
    /// (and for any other direction byte that is not a legal value).
    pub fn decode(bytes: [u8; TRACE_ENTRY_SIZE]) -> Option<Self> {
        Some(TraceEntry {
            row_address: bytes[0],
            column_address: bytes[1],
            direction: ReadWrite::from_byte(bytes[2])?,
        })
    }
}

/// Append-only transaction log with a fixed capacity.
pub struct TraceLog {
    entries: Vec<TraceEntry>,
    capacity: usize,
}

impl TraceLog {
    pub fn new(capacity: usize) -> Self {
        TraceLog {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn append(&mut self, entry: TraceEntry) -> Result<(), String> {
        if self.is_full() {
            return Err(format!(
                "Trace log full: capacity of {} entries reached",
                self.capacity
            ));
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    /// Serializes the whole table at its full capacity, unused slots filled
    /// with the sentinel so a reader knows where the trace ends.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.capacity * TRACE_ENTRY_SIZE);
        for entry in &self.entries {
            bytes.extend_from_slice(&entry.encode());
        }
        bytes.resize(self.capacity * TRACE_ENTRY_SIZE, ReadWrite::SENTINEL);
        bytes
    }
}

/// Capture lifecycle of the trace recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Capturing,
    Flushing,
    Halted,
}

/// Log-backed transaction handler.
///
/// Appends one entry per decoded transaction while capturing. The append
/// that fills the log triggers the flush: erase-then-program of the whole
/// table, after which the recorder is halted for good. A persistence failure
/// is logged and remembered but does not prevent the halt.
pub struct TraceRecorder<F: FlashStorage> {
    log: TraceLog,
    flash: F,
    flash_offset: usize,
    state: CaptureState,
    persist_error: Option<String>,
}

impl<F: FlashStorage> TraceRecorder<F> {
    pub fn new(capacity: usize, flash: F, flash_offset: usize) -> Self {
        TraceRecorder {
            log: TraceLog::new(capacity),
            flash,
            flash_offset,
            state: CaptureState::Capturing,
            persist_error: None,
        }
    }

    fn record(&mut self, address: DramAddress, direction: ReadWrite) {
        if self.state != CaptureState::Capturing {
            return;
        }

        if self.log.append(TraceEntry::new(address, direction)).is_err() {
            // Unreachable while the flush below runs on the filling append
            return;
        }

        if self.log.is_full() {
            self.flush();
        }
    }

    fn flush(&mut self) {
        self.state = CaptureState::Flushing;
        info!(
            "Trace log full ({} entries), persisting to flash offset 0x{:X}",
            self.log.len(),
            self.flash_offset
        );

        match store_trace(&mut self.flash, self.flash_offset, &self.log) {
            Ok(()) => info!("Trace table persisted and verified"),
            Err(e) => {
                error!("Trace persistence failed: {}", e);
                self.persist_error = Some(e);
            }
        }

        self.state = CaptureState::Halted;
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn log(&self) -> &TraceLog {
        &self.log
    }

    pub fn persist_error(&self) -> Option<&str> {
        self.persist_error.as_deref()
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn into_flash(self) -> F {
        self.flash
    }
}

impl<F: FlashStorage> TransactionHandler for TraceRecorder<F> {
    fn on_read(&mut self, address: DramAddress) -> Option<u8> {
        self.record(address, ReadWrite::Read);
        None
    }

    fn on_write(&mut self, address: DramAddress, _value: u8) {
        self.record(address, ReadWrite::Write);
    }

    fn halted(&self) -> bool {
        self.state == CaptureState::Halted
    }
}
