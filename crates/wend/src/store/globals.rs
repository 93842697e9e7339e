use crate::value::{Val, ValType};

/// Typed global cells, as seen by the dispatch loop.
///
/// Mutability is enforced by validation, so `set_*` does not re-check it.
pub trait Globals {
    fn ty(&self, index: u32) -> ValType;

    fn get_bits(&self, index: u32) -> u64;

    fn set_bits(&mut self, index: u32, bits: u64);

    fn get_i32(&self, index: u32) -> i32 {
        self.get_bits(index) as u32 as i32
    }

    fn get_i64(&self, index: u32) -> i64 {
        self.get_bits(index) as i64
    }

    fn get_f32(&self, index: u32) -> f32 {
        f32::from_bits(self.get_bits(index) as u32)
    }

    fn get_f64(&self, index: u32) -> f64 {
        f64::from_bits(self.get_bits(index))
    }

    fn set_i32(&mut self, index: u32, v: i32) {
        self.set_bits(index, v as u32 as u64);
    }

    fn set_i64(&mut self, index: u32, v: i64) {
        self.set_bits(index, v as u64);
    }

    fn set_f32(&mut self, index: u32, v: f32) {
        self.set_bits(index, v.to_bits() as u64);
    }

    fn set_f64(&mut self, index: u32, v: f64) {
        self.set_bits(index, v.to_bits());
    }
}

#[derive(Debug, Clone, Copy)]
struct GlobalCell {
    ty: ValType,
    mutable: bool,
    bits: u64,
}

/// Global storage for one instance: imported globals first, then the
/// module's own, in index order.
#[derive(Debug, Clone, Default)]
pub struct GlobalCells {
    cells: Vec<GlobalCell>,
}

impl GlobalCells {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a global and return its index.
    pub fn push(&mut self, init: Val, mutable: bool) -> u32 {
        self.cells.push(GlobalCell {
            ty: init.ty(),
            mutable,
            bits: init.to_bits(),
        });
        self.cells.len() as u32 - 1
    }

    pub fn get(&self, index: u32) -> Option<Val> {
        let cell = self.cells.get(index as usize)?;
        Some(Val::from_bits(cell.bits, cell.ty))
    }

    pub fn is_mutable(&self, index: u32) -> bool {
        self.cells
            .get(index as usize)
            .is_some_and(|cell| cell.mutable)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl Globals for GlobalCells {
    #[inline]
    fn ty(&self, index: u32) -> ValType {
        self.cells[index as usize].ty
    }

    #[inline]
    fn get_bits(&self, index: u32) -> u64 {
        self.cells[index as usize].bits
    }

    #[inline]
    fn set_bits(&mut self, index: u32, bits: u64) {
        self.cells[index as usize].bits = bits;
    }
}
