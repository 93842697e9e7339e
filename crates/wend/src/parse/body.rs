use std::fmt;

use anyhow::Context;
use wasmparser::{BlockType, BrTable, FunctionBody, Operator};

use super::func::{FuncIdx, FuncSig, TypeIdx};
use super::opcode::Opcode;
use crate::interpreter::call_site::CallSite;
use crate::value::ValType;


/// Positions in the four side tables of a [`CodeEntry`].
///
/// Used both as the live cursors of an executing scope and as counts of
/// entries a construct consumes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Cursors {
    pub(crate) byte_constant: u32,
    pub(crate) int_constant: u32,
    pub(crate) numeric_literal: u32,
    pub(crate) branch_table: u32,
}

impl Cursors {
    #[inline(always)]
    pub(crate) fn advance(&mut self, by: &Cursors) {
        self.byte_constant += by.byte_constant;
        self.int_constant += by.int_constant;
        self.numeric_literal += by.numeric_literal;
        self.branch_table += by.branch_table;
    }

    fn since(&self, entry: &Cursors) -> Cursors {
        Cursors {
            byte_constant: self.byte_constant - entry.byte_constant,
            int_constant: self.int_constant - entry.int_constant,
            numeric_literal: self.numeric_literal - entry.numeric_literal,
            branch_table: self.branch_table - entry.branch_table,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockKind {
    /// Implicit function-level scope (always descriptor 0).
    Body,
    Block,
    Loop,
    /// The `then` arm; `alternative` names the `else` arm's descriptor.
    If { alternative: Option<u32> },
    Else,
}

/// One static nested scope of a function body.
#[derive(Debug, Clone)]
pub(crate) struct BlockDescriptor {
    pub(crate) kind: BlockKind,
    /// Offset of the scope's first instruction.
    pub(crate) start: u32,
    /// Offset of the `else`/`end` that closes the scope (not executed).
    pub(crate) end: u32,
    /// Bytes the parent skips after the opener once the whole construct
    /// (both arms for an `if`) has run.
    pub(crate) extent: u32,
    pub(crate) result: Option<ValType>,
    /// Side-table cursors valid at the scope's first instruction.
    pub(crate) entry: Cursors,
    /// Side-table entries consumed by the whole construct.
    pub(crate) owned: Cursors,
    /// Operand-stack pointer at scope entry; also the continuation stack
    /// pointer for branches targeting this scope.
    pub(crate) entry_sp: u32,
    /// Nested constructs in program order. An `if` appears once; its
    /// `else` arm is reached through [`BlockKind::If`].
    pub(crate) children: Box<[u32]>,
    /// Call instructions directly inside this scope, in program order.
    pub(crate) call_sites: Box<[CallSite]>,
}

impl BlockDescriptor {
    pub(crate) fn arity(&self) -> u32 {
        self.result.is_some() as u32
    }
}

/// Where a `br_table` slot sends control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BranchTarget {
    pub(crate) depth: u32,
    pub(crate) continuation_sp: u32,
    pub(crate) arity: u32,
}

/// One `br_table`: its targets with the default as the final slot.
#[derive(Debug, Clone)]
pub(crate) struct BranchTable {
    pub(crate) targets: Box<[BranchTarget]>,
}

impl BranchTable {
    /// Out-of-range indices clamp to the default target.
    #[inline]
    pub(crate) fn select(&self, index: u32) -> BranchTarget {
        let last = self.targets.len() - 1;
        self.targets[(index as usize).min(last)]
    }
}

/// Decoded code of one defined function: the raw instruction bytes plus
/// side tables consumed in lock-step with the instruction cursor.
///
/// Immutable after translation except for the one-way resolution cells in
/// each [`CallSite`], so a `CodeEntry` can be executed from many threads.
#[derive(Debug)]
pub(crate) struct CodeEntry {
    pub(crate) func: FuncIdx,
    pub(crate) sig: FuncSig,
    /// Parameters followed by declared locals.
    pub(crate) locals: Box<[ValType]>,
    /// Operator bytes exactly as encoded, immediates left in place.
    pub(crate) data: Box<[u8]>,
    /// Encoded width of every LEB128 immediate the dispatch loop skips.
    pub(crate) byte_constants: Box<[u8]>,
    /// `(continuation_sp, arity)` per `br`/`br_if`, `arity` per `return`.
    pub(crate) int_constants: Box<[u32]>,
    /// Decoded immediates: indices, depths, offsets, constant bits.
    pub(crate) numeric_literals: Box<[u64]>,
    pub(crate) branch_tables: Box<[BranchTable]>,
    /// Scope arena; index 0 is the function body.
    pub(crate) blocks: Box<[BlockDescriptor]>,
    /// Deepest operand stack any path through the body reaches.
    pub(crate) max_stack: u32,
}

/// Module-level facts the translator needs for stack effects.
pub(crate) struct TranslateEnv<'a> {
    pub(crate) types: &'a [FuncSig],
    pub(crate) funcs: &'a [TypeIdx],
}

impl TranslateEnv<'_> {
    fn func_sig(&self, func: u32) -> Result<&FuncSig, anyhow::Error> {
        let ty = self
            .funcs
            .get(func as usize)
            .ok_or_else(|| anyhow::anyhow!("function index {func} out of range"))?;
        self.type_sig(ty.0)
    }

    fn type_sig(&self, ty: u32) -> Result<&FuncSig, anyhow::Error> {
        self.types
            .get(ty as usize)
            .ok_or_else(|| anyhow::anyhow!("type index {ty} out of range"))
    }
}

impl CodeEntry {
    /// Translate one code-section body of function `func`.
    ///
    /// `module_bytes` is the buffer the body was parsed from; the raw
    /// operator bytes are copied out of it.
    pub(crate) fn translate(
        func: FuncIdx,
        body: &FunctionBody,
        module_bytes: &[u8],
        env: &TranslateEnv,
    ) -> Result<Self, anyhow::Error> {
        let sig = env.func_sig(func.0)?.clone();

        let mut locals: Vec<ValType> = sig.params.to_vec();
        for local in body.get_locals_reader()? {
            let (count, ty) = local?;
            let ty = ValType::try_from(ty)?;
            locals.extend(std::iter::repeat_n(ty, count as usize));
        }

        let ops = body.get_operators_reader()?;
        let base = ops.original_position();
        let data = module_bytes
            .get(base..body.range().end)
            .context("function body out of range")?;

        let mut positioned = Vec::new();
        for item in ops.into_iter_with_offsets() {
            let (op, offset) = item?;
            positioned.push((op, offset - base));
        }

        let mut translator = Translator::new(data, env, sig.result);
        for (i, (op, at)) in positioned.iter().enumerate() {
            let next = positioned
                .get(i + 1)
                .map_or(data.len(), |(_, offset)| *offset);
            translator
                .translate_op(op, *at, next)
                .with_context(|| format!("function {} at offset {at:#x}", func.0))?;
        }

        Ok(translator.finish(func, sig, locals, data))
    }

    #[cfg(test)]
    pub(crate) fn body(&self) -> &BlockDescriptor {
        &self.blocks[0]
    }
}

/// An open scope during translation.
struct Control {
    /// Descriptor of the arm currently being filled.
    block: u32,
    /// Descriptor registered with the parent (the `then` arm for an `if`).
    construct: u32,
    /// Offset of the opener instruction.
    opener: usize,
    entry_sp: u32,
    /// Values a branch to this label carries (zero for loops).
    label_arity: u32,
    result: Option<ValType>,
}

struct PendingBlock {
    descriptor: BlockDescriptor,
    children: Vec<u32>,
    call_sites: Vec<CallSite>,
}

struct Translator<'a> {
    data: &'a [u8],
    env: &'a TranslateEnv<'a>,
    byte_constants: Vec<u8>,
    int_constants: Vec<u32>,
    numeric_literals: Vec<u64>,
    branch_tables: Vec<BranchTable>,
    blocks: Vec<PendingBlock>,
    control: Vec<Control>,
    height: u32,
    max_height: u32,
}

impl<'a> Translator<'a> {
    fn new(data: &'a [u8], env: &'a TranslateEnv<'a>, result: Option<ValType>) -> Self {
        let mut translator = Self {
            data,
            env,
            byte_constants: Vec::new(),
            int_constants: Vec::new(),
            numeric_literals: Vec::new(),
            branch_tables: Vec::new(),
            blocks: Vec::new(),
            control: Vec::new(),
            height: 0,
            max_height: 0,
        };
        let body = translator.new_block(BlockKind::Body, 0, result);
        translator.control.push(Control {
            block: body,
            construct: body,
            opener: 0,
            entry_sp: 0,
            label_arity: result.is_some() as u32,
            result,
        });
        translator
    }

    fn cursors(&self) -> Cursors {
        Cursors {
            byte_constant: self.byte_constants.len() as u32,
            int_constant: self.int_constants.len() as u32,
            numeric_literal: self.numeric_literals.len() as u32,
            branch_table: self.branch_tables.len() as u32,
        }
    }

    fn new_block(&mut self, kind: BlockKind, start: usize, result: Option<ValType>) -> u32 {
        let idx = self.blocks.len() as u32;
        self.blocks.push(PendingBlock {
            descriptor: BlockDescriptor {
                kind,
                start: start as u32,
                end: 0,
                extent: 0,
                result,
                entry: self.cursors(),
                owned: Cursors::default(),
                entry_sp: self.height,
                children: Box::default(),
                call_sites: Box::default(),
            },
            children: Vec::new(),
            call_sites: Vec::new(),
        });
        idx
    }

    fn top(&self) -> Result<&Control, anyhow::Error> {
        self.control.last().context("instruction after function end")
    }

    fn current_block(&mut self) -> Result<&mut PendingBlock, anyhow::Error> {
        let idx = self.top()?.block;
        Ok(&mut self.blocks[idx as usize])
    }

    fn push(&mut self, n: u32) {
        self.height += n;
        self.max_height = self.max_height.max(self.height);
    }

    /// Pop `n` values, never below the current scope's base. Unreachable
    /// code is stack-polymorphic, so it may pop more than it pushed.
    fn pop(&mut self, n: u32) {
        let base = self.control.last().map_or(0, |c| c.entry_sp);
        self.height = self.height.saturating_sub(n).max(base);
    }

    /// The rest of the current scope is unreachable.
    fn set_unreachable(&mut self) {
        self.height = self.control.last().map_or(0, |c| c.entry_sp);
    }

    /// Continuation stack pointer and arity of the label `depth` levels out.
    fn label(&self, depth: u32) -> Result<(u32, u32), anyhow::Error> {
        let idx = self
            .control
            .len()
            .checked_sub(1 + depth as usize)
            .context("branch depth out of range")?;
        let target = &self.control[idx];
        Ok((target.entry_sp, target.label_arity))
    }

    fn leb(&self, at: usize) -> Result<(u64, u8), anyhow::Error> {
        read_leb(self.data, at)
    }

    /// Record one LEB immediate at `at` as a byte constant and a numeric
    /// literal carrying `value`.
    fn index_immediate(&mut self, at: usize, value: u64) -> Result<(), anyhow::Error> {
        let (_, width) = self.leb(at)?;
        self.byte_constants.push(width);
        self.numeric_literals.push(value);
        Ok(())
    }

    fn block_result(&self, blockty: BlockType) -> Result<Option<ValType>, anyhow::Error> {
        match blockty {
            BlockType::Empty => Ok(None),
            BlockType::Type(ty) => Ok(Some(ValType::try_from(ty)?)),
            BlockType::FuncType(idx) => {
                let sig = self.env.type_sig(idx)?;
                anyhow::ensure!(
                    sig.params.is_empty(),
                    "blocks with parameters are not supported"
                );
                Ok(sig.result)
            }
        }
    }

    fn translate_op(&mut self, op: &Operator, at: usize, next: usize) -> Result<(), anyhow::Error> {
        let opcode = self
            .data
            .get(at)
            .and_then(|&byte| Opcode::from_byte(byte))
            .ok_or_else(|| anyhow::anyhow!("unsupported instruction {op:?}"))?;
        let imm = at + 1;

        match *op {
            Operator::Block { blockty } => self.open(BlockKind::Block, blockty, at, next)?,
            Operator::Loop { blockty } => self.open(BlockKind::Loop, blockty, at, next)?,
            Operator::If { blockty } => {
                self.pop(1);
                self.open(BlockKind::If { alternative: None }, blockty, at, next)?;
            }
            Operator::Else => self.else_arm(at, next)?,
            Operator::End => self.end(at, next)?,

            Operator::Br { relative_depth } => {
                self.branch(imm, relative_depth)?;
                self.set_unreachable();
            }
            Operator::BrIf { relative_depth } => {
                self.pop(1);
                self.branch(imm, relative_depth)?;
            }
            Operator::BrTable { ref targets } => {
                self.pop(1);
                self.branch_table(targets)?;
                self.set_unreachable();
            }
            Operator::Return => {
                let (_, arity) = self.label(self.control.len() as u32 - 1)?;
                self.int_constants.push(arity);
                self.set_unreachable();
            }
            Operator::Unreachable => self.set_unreachable(),

            Operator::Call { function_index } => {
                self.index_immediate(imm, function_index as u64)?;
                let sig = self.env.func_sig(function_index)?;
                let (pops, pushes) = (sig.params.len() as u32, sig.arity());
                self.current_block()?
                    .call_sites
                    .push(CallSite::direct(FuncIdx(function_index)));
                self.pop(pops);
                self.push(pushes);
            }
            Operator::CallIndirect { type_index, .. } => {
                let (_, type_width) = self.leb(imm)?;
                let (_, table_width) = self.leb(imm + type_width as usize)?;
                self.byte_constants.extend([type_width, table_width]);
                self.numeric_literals.push(type_index as u64);
                let sig = self.env.type_sig(type_index)?;
                let (pops, pushes) = (sig.params.len() as u32 + 1, sig.arity());
                self.current_block()?
                    .call_sites
                    .push(CallSite::indirect(TypeIdx(type_index)));
                self.pop(pops);
                self.push(pushes);
            }

            Operator::LocalGet { local_index }
            | Operator::LocalSet { local_index }
            | Operator::LocalTee { local_index } => {
                self.index_immediate(imm, local_index as u64)?;
            }
            Operator::GlobalGet { global_index } | Operator::GlobalSet { global_index } => {
                self.index_immediate(imm, global_index as u64)?;
            }

            Operator::I32Const { value } => self.index_immediate(imm, value as u32 as u64)?,
            Operator::I64Const { value } => self.index_immediate(imm, value as u64)?,
            Operator::F32Const { value } => self.numeric_literals.push(value.bits() as u64),
            Operator::F64Const { value } => self.numeric_literals.push(value.bits()),

            Operator::MemorySize { .. } | Operator::MemoryGrow { .. } => {
                let (_, width) = self.leb(imm)?;
                self.byte_constants.push(width);
            }

            _ if opcode.is_load() || opcode.is_store() => {
                let (_, align_width) = self.leb(imm)?;
                let (offset, offset_width) = self.leb(imm + align_width as usize)?;
                self.byte_constants.extend([align_width, offset_width]);
                self.numeric_literals.push(offset);
            }

            _ => {}
        }

        if let Some(effect) = opcode.stack_effect() {
            self.pop(effect.pops);
            self.push(effect.pushes);
        }
        Ok(())
    }

    fn branch(&mut self, imm: usize, depth: u32) -> Result<(), anyhow::Error> {
        self.index_immediate(imm, depth as u64)?;
        let (continuation_sp, arity) = self.label(depth)?;
        self.int_constants.extend([continuation_sp, arity]);
        Ok(())
    }

    fn branch_table(&mut self, table: &BrTable) -> Result<(), anyhow::Error> {
        let mut targets = Vec::with_capacity(table.len() as usize + 1);
        for depth in table.targets().chain(std::iter::once(Ok(table.default()))) {
            let depth = depth?;
            let (continuation_sp, arity) = self.label(depth)?;
            targets.push(BranchTarget {
                depth,
                continuation_sp,
                arity,
            });
        }
        self.branch_tables.push(BranchTable {
            targets: targets.into(),
        });
        Ok(())
    }

    fn open(
        &mut self,
        kind: BlockKind,
        blockty: BlockType,
        at: usize,
        next: usize,
    ) -> Result<(), anyhow::Error> {
        let result = self.block_result(blockty)?;
        let idx = self.new_block(kind, next, result);
        self.current_block()?.children.push(idx);
        self.control.push(Control {
            block: idx,
            construct: idx,
            opener: at,
            entry_sp: self.height,
            label_arity: match kind {
                BlockKind::Loop => 0,
                _ => result.is_some() as u32,
            },
            result,
        });
        Ok(())
    }

    fn else_arm(&mut self, at: usize, next: usize) -> Result<(), anyhow::Error> {
        let (then_arm, entry_sp, result) = {
            let top = self.top()?;
            (top.block, top.entry_sp, top.result)
        };
        self.blocks[then_arm as usize].descriptor.end = at as u32;

        self.height = entry_sp;
        let else_arm = self.new_block(BlockKind::Else, next, result);
        self.blocks[then_arm as usize].descriptor.kind = BlockKind::If {
            alternative: Some(else_arm),
        };
        if let Some(top) = self.control.last_mut() {
            top.block = else_arm;
        }
        Ok(())
    }

    fn end(&mut self, at: usize, next: usize) -> Result<(), anyhow::Error> {
        let control = self.control.pop().context("unbalanced end")?;
        self.blocks[control.block as usize].descriptor.end = at as u32;

        let consumed = self.cursors();
        let construct = &mut self.blocks[control.construct as usize].descriptor;
        construct.extent = (next - (control.opener + 1)) as u32;
        construct.owned = consumed.since(&construct.entry);

        self.height = control.entry_sp + control.result.is_some() as u32;
        self.max_height = self.max_height.max(self.height);
        Ok(())
    }

    fn finish(self, func: FuncIdx, sig: FuncSig, locals: Vec<ValType>, data: &[u8]) -> CodeEntry {
        let blocks = self
            .blocks
            .into_iter()
            .map(|pending| BlockDescriptor {
                children: pending.children.into(),
                call_sites: pending.call_sites.into(),
                ..pending.descriptor
            })
            .collect();
        CodeEntry {
            func,
            max_stack: self.max_height.max(sig.arity()),
            sig,
            locals: locals.into(),
            data: data.into(),
            byte_constants: self.byte_constants.into(),
            int_constants: self.int_constants.into(),
            numeric_literals: self.numeric_literals.into(),
            branch_tables: self.branch_tables.into(),
            blocks,
        }
    }
}

/// Decode an unsigned LEB128 at `at`, returning the value and its encoded
/// width. Signed immediates have the same width, so this also measures them.
pub(crate) fn read_leb(data: &[u8], at: usize) -> Result<(u64, u8), anyhow::Error> {
    let mut value = 0u64;
    let mut width = 0u8;
    loop {
        let byte = *data
            .get(at + width as usize)
            .context("truncated immediate")?;
        let shift = 7 * width as u32;
        if shift < 64 {
            value |= ((byte & 0x7F) as u64) << shift;
        }
        width += 1;
        if byte & 0x80 == 0 {
            return Ok((value, width));
        }
        anyhow::ensure!(width < 10, "immediate too long");
    }
}

impl fmt::Display for CodeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Function {} {} ===", self.func.0, self.sig)?;
        writeln!(
            f,
            "locals: {}, code bytes: {}, max stack: {}",
            self.locals.len(),
            self.data.len(),
            self.max_stack
        )?;
        writeln!(
            f,
            "side tables: byte constants {}, int constants {}, numeric literals {}, branch tables {}",
            self.byte_constants.len(),
            self.int_constants.len(),
            self.numeric_literals.len(),
            self.branch_tables.len()
        )?;
        writeln!(f, "--- blocks ({}) ---", self.blocks.len())?;
        for (i, block) in self.blocks.iter().enumerate() {
            writeln!(
                f,
                "  [{i:3}] {:?} {:#06x}..{:#06x} extent {} sp {} result {:?} children {:?} calls {}",
                block.kind,
                block.start,
                block.end,
                block.extent,
                block.entry_sp,
                block.result,
                block.children,
                block.call_sites.len()
            )?;
        }
        Ok(())
    }
}
