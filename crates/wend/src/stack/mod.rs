/// Operand stack for one function activation.
///
/// Fixed-width 64-bit slots with no per-slot tags: each slot's bit pattern
/// is reinterpreted by the instruction that reads it. The slot count is the
/// function's statically computed maximum depth, so the stack never grows.
///
/// The stack pointer is not stored here. Each scope executor keeps its own
/// `sp` as a local and passes it in, which lets nested scopes share one
/// slot array while tracking positions independently.
///
/// Indexing relies on validation: a well-typed body never pops below its
/// scope's entry height or pushes past the preallocated depth.
pub(crate) struct OperandStack {
    slots: Box<[u64]>,
}

impl OperandStack {
    pub(crate) fn new(max_depth: u32) -> Self {
        Self {
            slots: vec![0u64; max_depth as usize].into_boxed_slice(),
        }
    }

    #[inline(always)]
    pub(crate) fn get(&self, at: u32) -> u64 {
        self.slots[at as usize]
    }

    #[inline(always)]
    pub(crate) fn push(&mut self, sp: &mut u32, bits: u64) {
        self.slots[*sp as usize] = bits;
        *sp += 1;
    }

    #[inline(always)]
    pub(crate) fn pop(&mut self, sp: &mut u32) -> u64 {
        *sp -= 1;
        self.slots[*sp as usize]
    }

    #[inline(always)]
    pub(crate) fn push_i32(&mut self, sp: &mut u32, v: i32) {
        self.push(sp, v as u32 as u64);
    }

    #[inline(always)]
    pub(crate) fn pop_i32(&mut self, sp: &mut u32) -> i32 {
        self.pop(sp) as u32 as i32
    }

    #[inline(always)]
    pub(crate) fn push_i64(&mut self, sp: &mut u32, v: i64) {
        self.push(sp, v as u64);
    }

    #[inline(always)]
    pub(crate) fn pop_i64(&mut self, sp: &mut u32) -> i64 {
        self.pop(sp) as i64
    }

    #[inline(always)]
    pub(crate) fn push_f32(&mut self, sp: &mut u32, v: f32) {
        self.push(sp, v.to_bits() as u64);
    }

    #[inline(always)]
    pub(crate) fn pop_f32(&mut self, sp: &mut u32) -> f32 {
        f32::from_bits(self.pop(sp) as u32)
    }

    #[inline(always)]
    pub(crate) fn push_f64(&mut self, sp: &mut u32, v: f64) {
        self.push(sp, v.to_bits());
    }

    #[inline(always)]
    pub(crate) fn pop_f64(&mut self, sp: &mut u32) -> f64 {
        f64::from_bits(self.pop(sp))
    }

    /// Move the top `arity` slots below `from` down to `to`, discarding
    /// everything in between. The caller's new stack pointer is
    /// `to + arity`.
    ///
    /// Relative order is preserved: the deepest moved value lands at `to`.
    pub(crate) fn unwind(&mut self, from: u32, to: u32, arity: u32) {
        let src = (from - arity) as usize;
        if src != to as usize {
            self.slots.copy_within(src..from as usize, to as usize);
        }
    }
}
