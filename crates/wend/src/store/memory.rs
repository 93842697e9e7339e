use crate::Trap;

/// Size of one linear-memory page.
pub const PAGE_SIZE: usize = 64 * 1024;

/// Bounds-checked byte-addressable memory, as seen by the dispatch loop.
///
/// Callers validate an address with [`Memory::validate_address`] before any
/// typed access at that address; the typed accessors themselves assume the
/// range is in bounds.
pub trait Memory {
    /// Check that `bit_width / 8` bytes starting at `addr` are addressable.
    fn validate_address(&self, addr: u64, bit_width: u32) -> Result<(), Trap>;

    fn read(&self, addr: usize, buf: &mut [u8]);

    fn write(&mut self, addr: usize, bytes: &[u8]);

    /// Current size in pages.
    fn size(&self) -> u32;

    /// Grow by `delta` pages, returning the previous size, or `None` if the
    /// limit would be exceeded.
    fn grow(&mut self, delta: u32) -> Option<u32>;

    fn load_i32(&self, addr: usize) -> i32 {
        i32::from_le_bytes(load_array(self, addr))
    }

    fn load_i64(&self, addr: usize) -> i64 {
        i64::from_le_bytes(load_array(self, addr))
    }

    fn load_f32(&self, addr: usize) -> f32 {
        f32::from_le_bytes(load_array(self, addr))
    }

    fn load_f64(&self, addr: usize) -> f64 {
        f64::from_le_bytes(load_array(self, addr))
    }

    fn load_i8_s(&self, addr: usize) -> i64 {
        i8::from_le_bytes(load_array(self, addr)) as i64
    }

    fn load_i8_u(&self, addr: usize) -> i64 {
        u8::from_le_bytes(load_array(self, addr)) as i64
    }

    fn load_i16_s(&self, addr: usize) -> i64 {
        i16::from_le_bytes(load_array(self, addr)) as i64
    }

    fn load_i16_u(&self, addr: usize) -> i64 {
        u16::from_le_bytes(load_array(self, addr)) as i64
    }

    fn load_i32_s(&self, addr: usize) -> i64 {
        i32::from_le_bytes(load_array(self, addr)) as i64
    }

    fn load_i32_u(&self, addr: usize) -> i64 {
        u32::from_le_bytes(load_array(self, addr)) as i64
    }

    fn store_i32(&mut self, addr: usize, v: i32) {
        self.write(addr, &v.to_le_bytes());
    }

    fn store_i64(&mut self, addr: usize, v: i64) {
        self.write(addr, &v.to_le_bytes());
    }

    fn store_f32(&mut self, addr: usize, v: f32) {
        self.write(addr, &v.to_le_bytes());
    }

    fn store_f64(&mut self, addr: usize, v: f64) {
        self.write(addr, &v.to_le_bytes());
    }

    /// Store the low 8 bits of `v`.
    fn store_8(&mut self, addr: usize, v: i64) {
        self.write(addr, &(v as u8).to_le_bytes());
    }

    /// Store the low 16 bits of `v`.
    fn store_16(&mut self, addr: usize, v: i64) {
        self.write(addr, &(v as u16).to_le_bytes());
    }

    /// Store the low 32 bits of `v`.
    fn store_32(&mut self, addr: usize, v: i64) {
        self.write(addr, &(v as u32).to_le_bytes());
    }
}

fn load_array<M: Memory + ?Sized, const N: usize>(memory: &M, addr: usize) -> [u8; N] {
    let mut buf = [0u8; N];
    memory.read(addr, &mut buf);
    buf
}

/// Linear memory backed by a zero-filled byte vector.
#[derive(Debug, Clone)]
pub struct LinearMemory {
    bytes: Vec<u8>,
    maximum: u32,
}

impl LinearMemory {
    /// Allocate `initial` zeroed pages. `maximum` caps later growth.
    pub fn new(initial: u32, maximum: u32) -> Result<Self, anyhow::Error> {
        anyhow::ensure!(
            initial <= maximum,
            "initial memory size {initial} exceeds the limit of {maximum} pages"
        );
        Ok(Self {
            bytes: vec![0u8; initial as usize * PAGE_SIZE],
            maximum,
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.bytes
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl Memory for LinearMemory {
    #[inline]
    fn validate_address(&self, addr: u64, bit_width: u32) -> Result<(), Trap> {
        let end = addr + (bit_width / 8) as u64;
        if end > self.bytes.len() as u64 {
            return Err(Trap::MemoryOutOfBounds);
        }
        Ok(())
    }

    #[inline]
    fn read(&self, addr: usize, buf: &mut [u8]) {
        buf.copy_from_slice(&self.bytes[addr..addr + buf.len()]);
    }

    #[inline]
    fn write(&mut self, addr: usize, bytes: &[u8]) {
        self.bytes[addr..addr + bytes.len()].copy_from_slice(bytes);
    }

    fn size(&self) -> u32 {
        (self.bytes.len() / PAGE_SIZE) as u32
    }

    fn grow(&mut self, delta: u32) -> Option<u32> {
        let previous = self.size();
        let pages = previous.checked_add(delta)?;
        if pages > self.maximum {
            return None;
        }
        self.bytes.resize(pages as usize * PAGE_SIZE, 0);
        Some(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_address_checks_access_width() -> Result<(), anyhow::Error> {
        let memory = LinearMemory::new(1, 1)?;
        let last = PAGE_SIZE as u64;
        assert!(memory.validate_address(last - 4, 32).is_ok());
        assert_eq!(
            memory.validate_address(last - 3, 32),
            Err(Trap::MemoryOutOfBounds)
        );
        assert!(memory.validate_address(last - 1, 8).is_ok());
        assert_eq!(
            memory.validate_address(u32::MAX as u64 + 8, 64),
            Err(Trap::MemoryOutOfBounds)
        );
        Ok(())
    }

    #[test]
    fn sub_width_loads_extend() -> Result<(), anyhow::Error> {
        let mut memory = LinearMemory::new(1, 1)?;
        memory.store_16(0, 0xFF80);
        assert_eq!(memory.load_i8_s(0), -128);
        assert_eq!(memory.load_i8_u(0), 0x80);
        assert_eq!(memory.load_i16_s(0), -128);
        assert_eq!(memory.load_i16_u(0), 0xFF80);
        memory.store_32(8, -1);
        assert_eq!(memory.load_i32_u(8), 0xFFFF_FFFF);
        assert_eq!(memory.load_i32_s(8), -1);
        Ok(())
    }

    #[test]
    fn grow_respects_maximum() -> Result<(), anyhow::Error> {
        let mut memory = LinearMemory::new(1, 3)?;
        assert_eq!(memory.grow(2), Some(1));
        assert_eq!(memory.size(), 3);
        assert_eq!(memory.grow(1), None);
        assert_eq!(memory.grow(0), Some(3));
        assert_eq!(memory.data().len(), 3 * PAGE_SIZE);
        Ok(())
    }
}
