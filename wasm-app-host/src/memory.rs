//! Bounds-checked access to the shared block.
//!
//! Every offset and length handed out by the guest goes through [`check_region`] before the
//! host touches the bytes.

use wasmtime::{AsContext, AsContextMut, Memory, TypedFunc};

use crate::abi::guest_exports;
use crate::error::{BridgeError, BridgeResult};

/// Validate `offset..offset + len` against a block of `capacity` bytes.
pub fn check_region(offset: u64, len: u64, capacity: u64) -> BridgeResult<std::ops::Range<usize>> {
    let end = offset.checked_add(len).filter(|&end| end <= capacity);
    match end {
        Some(end) => Ok(offset as usize..end as usize),
        None => Err(BridgeError::OutOfBounds {
            offset,
            len,
            capacity,
        }),
    }
}

/// Handle to the guest's linear memory.
#[derive(Clone, Copy, Debug)]
pub struct SharedMemory {
    memory: Memory,
}

impl SharedMemory {
    pub fn new(memory: Memory) -> Self {
        Self { memory }
    }

    pub fn raw(&self) -> Memory {
        self.memory
    }

    pub fn capacity(&self, store: impl AsContext) -> u64 {
        self.memory.data_size(&store) as u64
    }

    /// Borrow `len` bytes at `offset`.
    pub fn slice<'a, T: 'static>(
        &self,
        store: impl Into<wasmtime::StoreContext<'a, T>>,
        offset: u32,
        len: u64,
    ) -> BridgeResult<&'a [u8]> {
        let data = self.memory.data(store.into());
        let range = check_region(offset as u64, len, data.len() as u64)?;
        Ok(&data[range])
    }

    pub fn read(&self, store: impl AsContext, offset: u32, len: u64) -> BridgeResult<Vec<u8>> {
        let data = self.memory.data(&store);
        let range = check_region(offset as u64, len, data.len() as u64)?;
        Ok(data[range].to_vec())
    }

    pub fn write(&self, mut store: impl AsContextMut, offset: u32, bytes: &[u8]) -> BridgeResult<()> {
        let data = self.memory.data_mut(&mut store);
        let range = check_region(offset as u64, bytes.len() as u64, data.len() as u64)?;
        data[range].copy_from_slice(bytes);
        Ok(())
    }

    pub fn read_u32(&self, store: impl AsContext, offset: u32) -> BridgeResult<u32> {
        let bytes = self.read(store, offset, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn write_u32(&self, store: impl AsContextMut, offset: u32, value: u32) -> BridgeResult<()> {
        self.write(store, offset, &value.to_le_bytes())
    }

    /// Allocate space for `bytes` through the guest's `requestBuffer` and copy them in.
    /// Returns the guest offset.
    pub fn place(
        &self,
        mut store: impl AsContextMut,
        request_buffer: &TypedFunc<u32, u32>,
        bytes: &[u8],
    ) -> BridgeResult<u32> {
        let len = u32::try_from(bytes.len()).map_err(|_| BridgeError::OutOfBounds {
            offset: 0,
            len: bytes.len() as u64,
            capacity: self.capacity(&store),
        })?;
        let offset = request_buffer
            .call(&mut store, len)
            .map_err(|e| BridgeError::guest(guest_exports::REQUEST_BUFFER, e))?;
        self.write(&mut store, offset, bytes)?;
        Ok(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasmtime::{Engine, MemoryType, Store};

    fn one_page() -> (Store<()>, SharedMemory) {
        let mut store = Store::new(&Engine::default(), ());
        let memory = Memory::new(&mut store, MemoryType::new(1, Some(1))).unwrap();
        (store, SharedMemory::new(memory))
    }

    #[test]
    fn region_at_the_end_is_accepted() {
        assert_eq!(check_region(60, 4, 64).unwrap(), 60..64);
        assert_eq!(check_region(64, 0, 64).unwrap(), 64..64);
    }

    #[test]
    fn region_past_the_end_is_rejected() {
        let err = check_region(61, 4, 64).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::OutOfBounds {
                offset: 61,
                len: 4,
                capacity: 64
            }
        ));
    }

    #[test]
    fn overflowing_region_is_rejected() {
        assert!(check_region(u64::MAX, 2, u64::MAX).is_err());
    }

    #[test]
    fn u32_values_are_little_endian() {
        let (mut store, memory) = one_page();
        memory.write_u32(&mut store, 8, 0x0403_0201).unwrap();
        assert_eq!(memory.read(&store, 8, 4).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(memory.read_u32(&store, 8).unwrap(), 0x0403_0201);
    }

    #[test]
    fn writes_past_capacity_fail_without_touching_memory() {
        let (mut store, memory) = one_page();
        let capacity = memory.capacity(&store) as u32;
        assert!(memory.write(&mut store, capacity - 2, &[9, 9, 9, 9]).is_err());
        assert_eq!(memory.read(&store, capacity - 2, 2).unwrap(), vec![0, 0]);
    }
}
