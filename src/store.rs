use crate::engine::TransactionHandler;
use crate::types::{DramAddress, ADDRESS_SPACE};

/// Flat byte store backing emulated reads and writes.
///
/// Sized to the full multiplexed address space, so an address that went
/// through [`DramAddress`] masking is in range by construction; the access
/// paths carry no bounds check of their own.
pub struct MemoryStore {
    cells: Vec<u8>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            cells: vec![0u8; ADDRESS_SPACE],
        }
    }

    pub fn size(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    pub fn read(&self, address: DramAddress) -> u8 {
        self.cells[address.value() as usize]
    }

    #[inline]
    pub fn write(&mut self, address: DramAddress, value: u8) {
        self.cells[address.value() as usize] = value;
    }

    /// Preloads a block of data starting at `offset`.
    pub fn load_data(&mut self, data: &[u8], offset: usize) -> Result<(), String> {
        if offset + data.len() > self.cells.len() {
            return Err(format!(
                "Data exceeds store capacity: offset {} + data length {} > store size {}",
                offset,
                data.len(),
                self.cells.len()
            ));
        }

        self.cells[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    pub fn fill(&mut self, value: u8) {
        for cell in &mut self.cells {
            *cell = value;
        }
    }

    pub fn clear(&mut self) {
        self.fill(0);
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.cells.clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore::new()
    }
}

impl TransactionHandler for MemoryStore {
    #[inline]
    fn on_read(&mut self, address: DramAddress) -> Option<u8> {
        Some(self.read(address))
    }

    #[inline]
    fn on_write(&mut self, address: DramAddress, value: u8) {
        self.write(address, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_creation() {
        let store = MemoryStore::new();
        assert_eq!(store.size(), 16384);
        assert_eq!(store.read(DramAddress::new(0)), 0);
        assert_eq!(store.read(DramAddress::new(16383)), 0);
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let mut store = MemoryStore::new();
        let addr = DramAddress::combine(5, 10);

        store.write(addr, 0xAB);
        assert_eq!(store.read(addr), 0xAB);
    }

    #[test]
    fn test_load_data() {
        let mut store = MemoryStore::new();
        store.load_data(&[0x12, 0x34, 0x56], 0x100).unwrap();

        assert_eq!(store.read(DramAddress::new(0x100)), 0x12);
        assert_eq!(store.read(DramAddress::new(0x101)), 0x34);
        assert_eq!(store.read(DramAddress::new(0x102)), 0x56);
    }

    #[test]
    fn test_load_data_past_end_is_rejected() {
        let mut store = MemoryStore::new();
        assert!(store.load_data(&[0u8; 32], ADDRESS_SPACE - 16).is_err());
    }

    #[test]
    fn test_fill_and_clear() {
        let mut store = MemoryStore::new();
        store.fill(0x55);
        assert_eq!(store.read(DramAddress::new(0)), 0x55);
        assert_eq!(store.read(DramAddress::new(9000)), 0x55);

        store.clear();
        assert_eq!(store.read(DramAddress::new(9000)), 0);
    }

    #[test]
    fn test_handler_serves_reads() {
        let mut store = MemoryStore::new();
        let addr = DramAddress::combine(3, 7);
        store.on_write(addr, 0xCD);
        assert_eq!(store.on_read(addr), Some(0xCD));
    }
}
