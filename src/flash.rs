//! # Non-Volatile Trace Storage
//!
//! The trace table lives at a fixed byte offset in flash-like storage:
//! erase works on whole sectors, programming on whole pages, so a persist is
//! an erase rounded up to sectors followed by a program rounded up to pages,
//! then a read-back compare of what was written.
//!
//! On real media the erase-program window must run with all preemption
//! suppressed; in this single-threaded emulation nothing can interleave with
//! it, and the implementations here complete the whole sequence within one
//! call.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::trace::{TraceEntry, TraceLog, TRACE_ENTRY_SIZE};

/// Erase granularity, in bytes.
pub const FLASH_SECTOR_SIZE: usize = 4096;

/// Program granularity, in bytes.
pub const FLASH_PAGE_SIZE: usize = 256;

/// Byte offset of the trace table, clear of the program image.
pub const TRACE_FLASH_OFFSET: usize = 0x10000;

/// Flash-like storage: erase to all-ones by sector, program by page.
pub trait FlashStorage {
    /// Erases `len` bytes at `offset`; both must be sector-aligned.
    fn erase(&mut self, offset: usize, len: usize) -> Result<(), String>;

    /// Programs `data` at `offset`; offset and length must be page-aligned.
    fn program(&mut self, offset: usize, data: &[u8]) -> Result<(), String>;

    fn read(&self, offset: usize, len: usize) -> Result<Vec<u8>, String>;
}

fn round_up(value: usize, granule: usize) -> usize {
    value.div_ceil(granule) * granule
}

/// Bytes of storage a trace table of `capacity` entries occupies, erase
/// granularity included.
pub fn trace_region_size(capacity: usize) -> usize {
    round_up(capacity * TRACE_ENTRY_SIZE, FLASH_SECTOR_SIZE)
}

/// Persists the whole trace table: erase, program, verify.
pub fn store_trace<F: FlashStorage + ?Sized>(
    flash: &mut F,
    offset: usize,
    log: &TraceLog,
) -> Result<(), String> {
    let mut bytes = log.encode();
    let erase_len = round_up(bytes.len(), FLASH_SECTOR_SIZE);
    bytes.resize(round_up(bytes.len(), FLASH_PAGE_SIZE), 0xFF);

    flash.erase(offset, erase_len)?;
    flash.program(offset, &bytes)?;

    let readback = flash.read(offset, bytes.len())?;
    if readback != bytes {
        return Err("Post-program verification failed: flash contents differ".to_string());
    }

    Ok(())
}

/// Reads back up to `max_entries` trace entries from `offset`, stopping at
/// the first unused-slot sentinel.
pub fn load_trace<F: FlashStorage + ?Sized>(
    flash: &F,
    offset: usize,
    max_entries: usize,
) -> Result<Vec<TraceEntry>, String> {
    let bytes = flash.read(offset, max_entries * TRACE_ENTRY_SIZE)?;

    let mut entries = Vec::new();
    for chunk in bytes.chunks_exact(TRACE_ENTRY_SIZE) {
        match TraceEntry::decode([chunk[0], chunk[1], chunk[2]]) {
            Some(entry) => entries.push(entry),
            None => break,
        }
    }
    Ok(entries)
}

/// In-memory flash, for tests and simulation. Counts erase and program
/// calls so tests can assert the persist ran exactly once.
pub struct InMemoryFlash {
    data: Vec<u8>,
    erase_calls: usize,
    program_calls: usize,
}

impl InMemoryFlash {
    pub fn new(size: usize) -> Self {
        InMemoryFlash {
            data: vec![0xFF; size],
            erase_calls: 0,
            program_calls: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn erase_calls(&self) -> usize {
        self.erase_calls
    }

    pub fn program_calls(&self) -> usize {
        self.program_calls
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<(), String> {
        if offset + len > self.data.len() {
            return Err(format!(
                "Flash range out of bounds: offset 0x{:X} + length 0x{:X} > size 0x{:X}",
                offset,
                len,
                self.data.len()
            ));
        }
        Ok(())
    }
}

impl FlashStorage for InMemoryFlash {
    fn erase(&mut self, offset: usize, len: usize) -> Result<(), String> {
        if offset % FLASH_SECTOR_SIZE != 0 || len % FLASH_SECTOR_SIZE != 0 {
            return Err("Erase range is not sector-aligned".to_string());
        }
        self.check_range(offset, len)?;

        self.data[offset..offset + len].fill(0xFF);
        self.erase_calls += 1;
        Ok(())
    }

    fn program(&mut self, offset: usize, data: &[u8]) -> Result<(), String> {
        if offset % FLASH_PAGE_SIZE != 0 || data.len() % FLASH_PAGE_SIZE != 0 {
            return Err("Program range is not page-aligned".to_string());
        }
        self.check_range(offset, data.len())?;

        self.data[offset..offset + data.len()].copy_from_slice(data);
        self.program_calls += 1;
        Ok(())
    }

    fn read(&self, offset: usize, len: usize) -> Result<Vec<u8>, String> {
        self.check_range(offset, len)?;
        Ok(self.data[offset..offset + len].to_vec())
    }
}

/// File-backed flash image for the host binary. The file is created at a
/// fixed size filled with 0xFF, like erased flash.
pub struct FileFlash {
    file: File,
    size: usize,
}

impl FileFlash {
    /// Creates (or truncates) a flash image of `size` bytes.
    pub fn create<P: AsRef<Path>>(path: P, size: usize) -> Result<Self, String> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| format!("Failed to create flash image: {}", e))?;

        let blank = vec![0xFFu8; FLASH_SECTOR_SIZE];
        let mut remaining = size;
        while remaining > 0 {
            let chunk = remaining.min(blank.len());
            file.write_all(&blank[..chunk])
                .map_err(|e| format!("Failed to initialize flash image: {}", e))?;
            remaining -= chunk;
        }

        Ok(FileFlash { file, size })
    }

    /// Opens an existing flash image.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| format!("Failed to open flash image: {}", e))?;
        let size = file
            .metadata()
            .map_err(|e| format!("Failed to stat flash image: {}", e))?
            .len() as usize;

        Ok(FileFlash { file, size })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<(), String> {
        if offset + len > self.size {
            return Err(format!(
                "Flash range out of bounds: offset 0x{:X} + length 0x{:X} > size 0x{:X}",
                offset, len, self.size
            ));
        }
        Ok(())
    }

    fn write_at(&mut self, offset: usize, data: &[u8]) -> Result<(), String> {
        self.file
            .seek(SeekFrom::Start(offset as u64))
            .map_err(|e| format!("Flash seek failed: {}", e))?;
        self.file
            .write_all(data)
            .map_err(|e| format!("Flash write failed: {}", e))?;
        self.file
            .flush()
            .map_err(|e| format!("Flash flush failed: {}", e))
    }
}

impl FlashStorage for FileFlash {
    fn erase(&mut self, offset: usize, len: usize) -> Result<(), String> {
        if offset % FLASH_SECTOR_SIZE != 0 || len % FLASH_SECTOR_SIZE != 0 {
            return Err("Erase range is not sector-aligned".to_string());
        }
        self.check_range(offset, len)?;

        let blank = vec![0xFFu8; len];
        self.write_at(offset, &blank)
    }

    fn program(&mut self, offset: usize, data: &[u8]) -> Result<(), String> {
        if offset % FLASH_PAGE_SIZE != 0 || data.len() % FLASH_PAGE_SIZE != 0 {
            return Err("Program range is not page-aligned".to_string());
        }
        self.check_range(offset, data.len())?;
        self.write_at(offset, data)
    }

    fn read(&self, offset: usize, len: usize) -> Result<Vec<u8>, String> {
        self.check_range(offset, len)?;

        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset as u64))
            .map_err(|e| format!("Flash seek failed: {}", e))?;
        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)
            .map_err(|e| format!("Flash read failed: {}", e))?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::ReadWrite;
    use crate::types::DramAddress;

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(0, FLASH_SECTOR_SIZE), 0);
        assert_eq!(round_up(1, FLASH_SECTOR_SIZE), FLASH_SECTOR_SIZE);
        assert_eq!(round_up(4096, FLASH_SECTOR_SIZE), 4096);
        assert_eq!(round_up(4097, FLASH_SECTOR_SIZE), 8192);
        assert_eq!(round_up(150_000, FLASH_PAGE_SIZE), 150_016);
    }

    #[test]
    fn test_erase_requires_sector_alignment() {
        let mut flash = InMemoryFlash::new(0x8000);
        assert!(flash.erase(100, FLASH_SECTOR_SIZE).is_err());
        assert!(flash.erase(0, 100).is_err());
        assert!(flash.erase(0, FLASH_SECTOR_SIZE).is_ok());
    }

    #[test]
    fn test_program_requires_page_alignment() {
        let mut flash = InMemoryFlash::new(0x8000);
        assert!(flash.program(0, &[0u8; 100]).is_err());
        assert!(flash.program(100, &[0u8; FLASH_PAGE_SIZE]).is_err());
        assert!(flash.program(0, &[0u8; FLASH_PAGE_SIZE]).is_ok());
    }

    #[test]
    fn test_store_and_load_trace_round_trip() {
        let mut flash = InMemoryFlash::new(0x20000);
        let mut log = TraceLog::new(8);
        log.append(TraceEntry::new(DramAddress::combine(5, 10), ReadWrite::Write))
            .unwrap();
        log.append(TraceEntry::new(DramAddress::combine(5, 11), ReadWrite::Read))
            .unwrap();

        store_trace(&mut flash, 0x10000, &log).unwrap();
        let entries = load_trace(&flash, 0x10000, 8).unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].address(), DramAddress::combine(5, 10));
        assert_eq!(entries[0].direction, ReadWrite::Write);
        assert_eq!(entries[1].direction, ReadWrite::Read);
    }

    #[test]
    fn test_load_trace_stops_at_sentinel() {
        let flash = InMemoryFlash::new(0x20000);
        // Nothing programmed: everything reads back as erased sentinel bytes
        let entries = load_trace(&flash, 0x10000, 16).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_store_trace_out_of_range_fails() {
        let mut flash = InMemoryFlash::new(0x1000);
        let log = TraceLog::new(8);
        assert!(store_trace(&mut flash, 0x10000, &log).is_err());
    }

    #[test]
    fn test_file_flash_round_trip() {
        let path = std::env::temp_dir().join(format!(
            "rusty_dram_flash_test_{}.bin",
            std::process::id()
        ));

        {
            let mut flash = FileFlash::create(&path, 0x20000).unwrap();
            let mut log = TraceLog::new(4);
            log.append(TraceEntry::new(DramAddress::combine(1, 2), ReadWrite::Read))
                .unwrap();
            store_trace(&mut flash, 0x10000, &log).unwrap();
        }

        {
            let flash = FileFlash::open(&path).unwrap();
            let entries = load_trace(&flash, 0x10000, 4).unwrap();
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].address(), DramAddress::combine(1, 2));
        }

        let _ = std::fs::remove_file(&path);
    }
}
