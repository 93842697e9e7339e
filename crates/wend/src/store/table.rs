use crate::parse::func::FuncIdx;

/// Indirect-call function table, as seen by the dispatch loop.
pub trait Table {
    fn validate_index(&self, index: u32) -> bool;

    /// Function stored at a validated index, `None` if the slot was never
    /// initialized.
    fn function_index_at(&self, index: u32) -> Option<FuncIdx>;
}

/// The single `funcref` table of an instance.
#[derive(Debug, Clone, Default)]
pub struct FuncTable {
    slots: Vec<Option<FuncIdx>>,
}

impl FuncTable {
    pub fn new(initial: u32) -> Self {
        Self {
            slots: vec![None; initial as usize],
        }
    }

    /// Copy an element segment into the table starting at `offset`.
    pub fn init(&mut self, offset: u32, funcs: &[Option<FuncIdx>]) -> Result<(), anyhow::Error> {
        let start = offset as usize;
        let end = start + funcs.len();
        anyhow::ensure!(
            end <= self.slots.len(),
            "element segment {start}..{end} does not fit table of size {}",
            self.slots.len()
        );
        self.slots[start..end].copy_from_slice(funcs);
        Ok(())
    }

    pub fn set(&mut self, index: u32, func: Option<FuncIdx>) -> Result<(), anyhow::Error> {
        let slot = self
            .slots
            .get_mut(index as usize)
            .ok_or_else(|| anyhow::anyhow!("table index {index} out of bounds"))?;
        *slot = func;
        Ok(())
    }

    pub fn len(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Table for FuncTable {
    #[inline]
    fn validate_index(&self, index: u32) -> bool {
        (index as usize) < self.slots.len()
    }

    #[inline]
    fn function_index_at(&self, index: u32) -> Option<FuncIdx> {
        self.slots.get(index as usize).copied().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_and_lookup() -> Result<(), anyhow::Error> {
        let mut table = FuncTable::new(4);
        table.init(1, &[Some(FuncIdx(3)), Some(FuncIdx(0))])?;
        assert!(table.validate_index(3));
        assert!(!table.validate_index(4));
        assert_eq!(table.function_index_at(0), None);
        assert_eq!(table.function_index_at(1), Some(FuncIdx(3)));
        assert_eq!(table.function_index_at(2), Some(FuncIdx(0)));
        assert!(table.init(3, &[None, None]).is_err());
        table.set(1, None)?;
        assert_eq!(table.function_index_at(1), None);
        Ok(())
    }
}
