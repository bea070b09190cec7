//! # Rusty DRAM Library
//!
//! An emulator of a multiplexed row/column DRAM bus interface.
//!
//! This library provides:
//! - A bus-protocol state machine decoding row/column strobes into
//!   transactions, with page-mode row reuse and read-path bus turnaround
//! - A store-backed mode serving reads and writes like real DRAM
//! - A trace-capture mode recording transactions into a bounded log that is
//!   persisted to flash-like storage when full
//! - A scriptable simulated requester standing in for the external computer
//! - JSON-configurable pin assignment and a terminal diagnostic monitor

pub mod bus;
pub mod config;
pub mod console;
pub mod direction;
pub mod engine;
pub mod flash;
pub mod gpio;
pub mod sim;
pub mod store;
pub mod trace;
pub mod types;

// Re-export commonly used items for easier importing
pub use bus::{BusLayout, BusSnapshot};
pub use engine::{BusEngine, BusTransaction, TransactionHandler};
pub use gpio::{GpioPort, PinDirection, PinPull};
pub use store::MemoryStore;
pub use trace::{TraceLog, TraceRecorder};
pub use types::DramAddress;
