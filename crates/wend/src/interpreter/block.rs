use tracing::trace;

use super::call_site::CallSite;
use super::numeric::{self, wasm_max, wasm_min};
use super::{CallContext, ExecError, Frame, Trap, check_native_stack, invoke};
use crate::parse::body::{BlockDescriptor, BlockKind, CodeEntry};
use crate::parse::opcode::Opcode;
use crate::value::ValType;

/// How a scope finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Signal {
    /// Ran off the end of the scope.
    FellThrough,
    /// Branch to the scope `n` levels out, counted from the receiving
    /// parent: `Branch(0)` names the scope that just returned it.
    Branch(u32),
    /// Function-level `return`; results are already at slot 0.
    Return,
}

/// Executes one scope of a function body.
///
/// Stateless apart from the descriptor it runs: all cursors live on the
/// Rust stack, so one `CodeEntry` may be executed by any number of
/// concurrent activations.
pub(crate) struct BlockExecutor<'a> {
    code: &'a CodeEntry,
    index: u32,
    block: &'a BlockDescriptor,
}

impl<'a> BlockExecutor<'a> {
    pub(crate) fn new(code: &'a CodeEntry, index: u32) -> Self {
        Self {
            code,
            index,
            block: &code.blocks[index as usize],
        }
    }

    pub(crate) fn execute(
        &self,
        ctx: &mut CallContext<'_>,
        frame: &mut Frame,
    ) -> Result<Signal, ExecError> {
        trace!(func = self.code.func.0, block = self.index, "scope enter");
        let signal = self.run(ctx, frame)?;
        trace!(func = self.code.func.0, block = self.index, ?signal, "scope exit");
        Ok(signal)
    }

    fn run(&self, ctx: &mut CallContext<'_>, frame: &mut Frame) -> Result<Signal, ExecError> {
        let code = self.code;
        let block = self.block;
        let data = &code.data[..];
        let end = block.end as usize;

        let mut offset = block.start as usize;
        let mut cursors = block.entry;
        let mut sp = block.entry_sp;
        let mut child = 0usize;
        let mut call = 0usize;

        macro_rules! byte_constant {
            () => {{
                let width = code.byte_constants[cursors.byte_constant as usize];
                cursors.byte_constant += 1;
                width as usize
            }};
        }

        macro_rules! int_constant {
            () => {{
                let value = code.int_constants[cursors.int_constant as usize];
                cursors.int_constant += 1;
                value
            }};
        }

        macro_rules! numeric_literal {
            () => {{
                let value = code.numeric_literals[cursors.numeric_literal as usize];
                cursors.numeric_literal += 1;
                value
            }};
        }

        macro_rules! unop {
            ($pop:ident, $push:ident, |$a:ident| $e:expr) => {{
                let $a = frame.stack.$pop(&mut sp);
                frame.stack.$push(&mut sp, $e);
            }};
        }

        macro_rules! binop {
            ($pop:ident, $push:ident, |$a:ident, $b:ident| $e:expr) => {{
                let $b = frame.stack.$pop(&mut sp);
                let $a = frame.stack.$pop(&mut sp);
                frame.stack.$push(&mut sp, $e);
            }};
        }

        // Effective address of a memory access; pops the base operand.
        macro_rules! address {
            ($bits:expr) => {{
                let align_width = byte_constant!();
                let offset_width = byte_constant!();
                offset += align_width + offset_width;
                let static_offset = numeric_literal!();
                let base = frame.stack.pop_i32(&mut sp) as u32 as u64;
                let addr = base + static_offset;
                ctx.memory.validate_address(addr, $bits)?;
                addr as usize
            }};
        }

        macro_rules! load {
            ($bits:expr, $read:ident, $push:ident, $ty:ty) => {{
                let addr = address!($bits);
                let value = ctx.memory.$read(addr);
                frame.stack.$push(&mut sp, value as $ty);
            }};
        }

        macro_rules! store {
            ($bits:expr, $pop:ident, $write:ident, $ty:ty) => {{
                let value = frame.stack.$pop(&mut sp);
                let addr = address!($bits);
                ctx.memory.$write(addr, value as $ty);
            }};
        }

        while offset < end {
            if let Some(fuel) = ctx.fuel.as_mut() {
                if *fuel == 0 {
                    return Err(Trap::OutOfFuel.into());
                }
                *fuel -= 1;
            }

            let opcode =
                Opcode::from_byte(data[offset]).ok_or(ExecError::Malformed(offset))?;
            offset += 1;

            match opcode {
                Opcode::Unreachable => return Err(Trap::Unreachable.into()),
                Opcode::Nop | Opcode::Else | Opcode::End => {}

                Opcode::Block | Opcode::Loop | Opcode::If => {
                    let idx = block.children[child];
                    child += 1;
                    let nested = &code.blocks[idx as usize];

                    match self.nested(ctx, frame, opcode, idx, &mut sp)? {
                        Signal::FellThrough | Signal::Branch(0) => {}
                        Signal::Branch(depth) => return Ok(Signal::Branch(depth - 1)),
                        Signal::Return => return Ok(Signal::Return),
                    }

                    offset += nested.extent as usize;
                    cursors.advance(&nested.owned);
                    sp += nested.arity();
                }

                Opcode::Br => {
                    let depth = numeric_literal!() as u32;
                    let continuation = int_constant!();
                    let arity = int_constant!();
                    frame.stack.unwind(sp, continuation, arity);
                    trace!(depth, continuation, arity, "br");
                    return Ok(Signal::Branch(depth));
                }
                Opcode::BrIf => {
                    let condition = frame.stack.pop_i32(&mut sp);
                    if condition != 0 {
                        let depth = numeric_literal!() as u32;
                        let continuation = int_constant!();
                        let arity = int_constant!();
                        frame.stack.unwind(sp, continuation, arity);
                        trace!(depth, continuation, arity, "br_if taken");
                        return Ok(Signal::Branch(depth));
                    }
                    cursors.numeric_literal += 1;
                    cursors.int_constant += 2;
                    offset += byte_constant!();
                }
                Opcode::BrTable => {
                    let index = frame.stack.pop_i32(&mut sp) as u32;
                    let table = &code.branch_tables[cursors.branch_table as usize];
                    let target = table.select(index);
                    frame
                        .stack
                        .unwind(sp, target.continuation_sp, target.arity);
                    trace!(index, depth = target.depth, "br_table");
                    return Ok(Signal::Branch(target.depth));
                }
                Opcode::Return => {
                    let arity = int_constant!();
                    frame.stack.unwind(sp, 0, arity);
                    trace!(func = code.func.0, arity, "return");
                    return Ok(Signal::Return);
                }

                // The call site is the authority on the callee; the index
                // literal is only skipped to keep the cursors aligned.
                Opcode::Call => {
                    offset += byte_constant!();
                    cursors.numeric_literal += 1;
                    let site = &block.call_sites[call];
                    call += 1;
                    self.call_direct(ctx, frame, site, &mut sp, offset)?;
                }
                Opcode::CallIndirect => {
                    let type_width = byte_constant!();
                    let table_width = byte_constant!();
                    offset += type_width + table_width;
                    cursors.numeric_literal += 1;
                    let site = &block.call_sites[call];
                    call += 1;
                    self.call_indirect(ctx, frame, site, &mut sp, offset)?;
                }

                Opcode::Drop => sp -= 1,
                Opcode::Select => {
                    let condition = frame.stack.pop_i32(&mut sp);
                    let b = frame.stack.pop(&mut sp);
                    let a = frame.stack.pop(&mut sp);
                    frame.stack.push(&mut sp, if condition != 0 { a } else { b });
                }

                Opcode::LocalGet => {
                    offset += byte_constant!();
                    let index = numeric_literal!() as usize;
                    frame.stack.push(&mut sp, frame.locals[index]);
                }
                Opcode::LocalSet => {
                    offset += byte_constant!();
                    let index = numeric_literal!() as usize;
                    frame.locals[index] = frame.stack.pop(&mut sp);
                }
                Opcode::LocalTee => {
                    offset += byte_constant!();
                    let index = numeric_literal!() as usize;
                    frame.locals[index] = frame.stack.get(sp - 1);
                }
                Opcode::GlobalGet => {
                    offset += byte_constant!();
                    let index = numeric_literal!() as u32;
                    match ctx.globals.ty(index) {
                        ValType::I32 => frame.stack.push_i32(&mut sp, ctx.globals.get_i32(index)),
                        ValType::I64 => frame.stack.push_i64(&mut sp, ctx.globals.get_i64(index)),
                        ValType::F32 => frame.stack.push_f32(&mut sp, ctx.globals.get_f32(index)),
                        ValType::F64 => frame.stack.push_f64(&mut sp, ctx.globals.get_f64(index)),
                    }
                }
                Opcode::GlobalSet => {
                    offset += byte_constant!();
                    let index = numeric_literal!() as u32;
                    match ctx.globals.ty(index) {
                        ValType::I32 => ctx.globals.set_i32(index, frame.stack.pop_i32(&mut sp)),
                        ValType::I64 => ctx.globals.set_i64(index, frame.stack.pop_i64(&mut sp)),
                        ValType::F32 => ctx.globals.set_f32(index, frame.stack.pop_f32(&mut sp)),
                        ValType::F64 => ctx.globals.set_f64(index, frame.stack.pop_f64(&mut sp)),
                    }
                }

                Opcode::I32Load => load!(32, load_i32, push_i32, i32),
                Opcode::I64Load => load!(64, load_i64, push_i64, i64),
                Opcode::F32Load => load!(32, load_f32, push_f32, f32),
                Opcode::F64Load => load!(64, load_f64, push_f64, f64),
                Opcode::I32Load8S => load!(8, load_i8_s, push_i32, i32),
                Opcode::I32Load8U => load!(8, load_i8_u, push_i32, i32),
                Opcode::I32Load16S => load!(16, load_i16_s, push_i32, i32),
                Opcode::I32Load16U => load!(16, load_i16_u, push_i32, i32),
                Opcode::I64Load8S => load!(8, load_i8_s, push_i64, i64),
                Opcode::I64Load8U => load!(8, load_i8_u, push_i64, i64),
                Opcode::I64Load16S => load!(16, load_i16_s, push_i64, i64),
                Opcode::I64Load16U => load!(16, load_i16_u, push_i64, i64),
                Opcode::I64Load32S => load!(32, load_i32_s, push_i64, i64),
                Opcode::I64Load32U => load!(32, load_i32_u, push_i64, i64),
                Opcode::I32Store => store!(32, pop_i32, store_i32, i32),
                Opcode::I64Store => store!(64, pop_i64, store_i64, i64),
                Opcode::F32Store => store!(32, pop_f32, store_f32, f32),
                Opcode::F64Store => store!(64, pop_f64, store_f64, f64),
                Opcode::I32Store8 => store!(8, pop_i32, store_8, i64),
                Opcode::I32Store16 => store!(16, pop_i32, store_16, i64),
                Opcode::I64Store8 => store!(8, pop_i64, store_8, i64),
                Opcode::I64Store16 => store!(16, pop_i64, store_16, i64),
                Opcode::I64Store32 => store!(32, pop_i64, store_32, i64),
                Opcode::MemorySize => {
                    offset += byte_constant!();
                    frame.stack.push_i32(&mut sp, ctx.memory.size() as i32);
                }
                Opcode::MemoryGrow => {
                    offset += byte_constant!();
                    let delta = frame.stack.pop_i32(&mut sp) as u32;
                    let previous = ctx.memory.grow(delta).map_or(-1, |pages| pages as i32);
                    frame.stack.push_i32(&mut sp, previous);
                }

                Opcode::I32Const | Opcode::I64Const => {
                    offset += byte_constant!();
                    frame.stack.push(&mut sp, numeric_literal!());
                }
                Opcode::F32Const => {
                    offset += 4;
                    frame.stack.push(&mut sp, numeric_literal!());
                }
                Opcode::F64Const => {
                    offset += 8;
                    frame.stack.push(&mut sp, numeric_literal!());
                }

                Opcode::I32Eqz => unop!(pop_i32, push_i32, |a| (a == 0) as i32),
                Opcode::I32Eq => binop!(pop_i32, push_i32, |a, b| (a == b) as i32),
                Opcode::I32Ne => binop!(pop_i32, push_i32, |a, b| (a != b) as i32),
                Opcode::I32LtS => binop!(pop_i32, push_i32, |a, b| (a < b) as i32),
                Opcode::I32LtU => binop!(pop_i32, push_i32, |a, b| ((a as u32) < (b as u32)) as i32),
                Opcode::I32GtS => binop!(pop_i32, push_i32, |a, b| (a > b) as i32),
                Opcode::I32GtU => binop!(pop_i32, push_i32, |a, b| ((a as u32) > (b as u32)) as i32),
                Opcode::I32LeS => binop!(pop_i32, push_i32, |a, b| (a <= b) as i32),
                Opcode::I32LeU => binop!(pop_i32, push_i32, |a, b| ((a as u32) <= (b as u32)) as i32),
                Opcode::I32GeS => binop!(pop_i32, push_i32, |a, b| (a >= b) as i32),
                Opcode::I32GeU => binop!(pop_i32, push_i32, |a, b| ((a as u32) >= (b as u32)) as i32),

                Opcode::I64Eqz => unop!(pop_i64, push_i32, |a| (a == 0) as i32),
                Opcode::I64Eq => binop!(pop_i64, push_i32, |a, b| (a == b) as i32),
                Opcode::I64Ne => binop!(pop_i64, push_i32, |a, b| (a != b) as i32),
                Opcode::I64LtS => binop!(pop_i64, push_i32, |a, b| (a < b) as i32),
                Opcode::I64LtU => binop!(pop_i64, push_i32, |a, b| ((a as u64) < (b as u64)) as i32),
                Opcode::I64GtS => binop!(pop_i64, push_i32, |a, b| (a > b) as i32),
                Opcode::I64GtU => binop!(pop_i64, push_i32, |a, b| ((a as u64) > (b as u64)) as i32),
                Opcode::I64LeS => binop!(pop_i64, push_i32, |a, b| (a <= b) as i32),
                Opcode::I64LeU => binop!(pop_i64, push_i32, |a, b| ((a as u64) <= (b as u64)) as i32),
                Opcode::I64GeS => binop!(pop_i64, push_i32, |a, b| (a >= b) as i32),
                Opcode::I64GeU => binop!(pop_i64, push_i32, |a, b| ((a as u64) >= (b as u64)) as i32),

                Opcode::F32Eq => binop!(pop_f32, push_i32, |a, b| (a == b) as i32),
                Opcode::F32Ne => binop!(pop_f32, push_i32, |a, b| (a != b) as i32),
                Opcode::F32Lt => binop!(pop_f32, push_i32, |a, b| (a < b) as i32),
                Opcode::F32Gt => binop!(pop_f32, push_i32, |a, b| (a > b) as i32),
                Opcode::F32Le => binop!(pop_f32, push_i32, |a, b| (a <= b) as i32),
                Opcode::F32Ge => binop!(pop_f32, push_i32, |a, b| (a >= b) as i32),
                Opcode::F64Eq => binop!(pop_f64, push_i32, |a, b| (a == b) as i32),
                Opcode::F64Ne => binop!(pop_f64, push_i32, |a, b| (a != b) as i32),
                Opcode::F64Lt => binop!(pop_f64, push_i32, |a, b| (a < b) as i32),
                Opcode::F64Gt => binop!(pop_f64, push_i32, |a, b| (a > b) as i32),
                Opcode::F64Le => binop!(pop_f64, push_i32, |a, b| (a <= b) as i32),
                Opcode::F64Ge => binop!(pop_f64, push_i32, |a, b| (a >= b) as i32),

                Opcode::I32Clz => unop!(pop_i32, push_i32, |a| a.leading_zeros() as i32),
                Opcode::I32Ctz => unop!(pop_i32, push_i32, |a| a.trailing_zeros() as i32),
                Opcode::I32Popcnt => unop!(pop_i32, push_i32, |a| a.count_ones() as i32),
                Opcode::I32Add => binop!(pop_i32, push_i32, |a, b| a.wrapping_add(b)),
                Opcode::I32Sub => binop!(pop_i32, push_i32, |a, b| a.wrapping_sub(b)),
                Opcode::I32Mul => binop!(pop_i32, push_i32, |a, b| a.wrapping_mul(b)),
                Opcode::I32DivS => binop!(pop_i32, push_i32, |a, b| numeric::i32_div_s(a, b)?),
                Opcode::I32DivU => binop!(pop_i32, push_i32, |a, b| numeric::i32_div_u(a, b)?),
                Opcode::I32RemS => binop!(pop_i32, push_i32, |a, b| numeric::i32_rem_s(a, b)?),
                Opcode::I32RemU => binop!(pop_i32, push_i32, |a, b| numeric::i32_rem_u(a, b)?),
                Opcode::I32And => binop!(pop_i32, push_i32, |a, b| a & b),
                Opcode::I32Or => binop!(pop_i32, push_i32, |a, b| a | b),
                Opcode::I32Xor => binop!(pop_i32, push_i32, |a, b| a ^ b),
                Opcode::I32Shl => binop!(pop_i32, push_i32, |a, b| a.wrapping_shl(b as u32)),
                Opcode::I32ShrS => binop!(pop_i32, push_i32, |a, b| a.wrapping_shr(b as u32)),
                Opcode::I32ShrU => {
                    binop!(pop_i32, push_i32, |a, b| (a as u32).wrapping_shr(b as u32) as i32)
                }
                Opcode::I32Rotl => binop!(pop_i32, push_i32, |a, b| a.rotate_left(b as u32)),
                Opcode::I32Rotr => binop!(pop_i32, push_i32, |a, b| a.rotate_right(b as u32)),

                Opcode::I64Clz => unop!(pop_i64, push_i64, |a| a.leading_zeros() as i64),
                Opcode::I64Ctz => unop!(pop_i64, push_i64, |a| a.trailing_zeros() as i64),
                Opcode::I64Popcnt => unop!(pop_i64, push_i64, |a| a.count_ones() as i64),
                Opcode::I64Add => binop!(pop_i64, push_i64, |a, b| a.wrapping_add(b)),
                Opcode::I64Sub => binop!(pop_i64, push_i64, |a, b| a.wrapping_sub(b)),
                Opcode::I64Mul => binop!(pop_i64, push_i64, |a, b| a.wrapping_mul(b)),
                Opcode::I64DivS => binop!(pop_i64, push_i64, |a, b| numeric::i64_div_s(a, b)?),
                Opcode::I64DivU => binop!(pop_i64, push_i64, |a, b| numeric::i64_div_u(a, b)?),
                Opcode::I64RemS => binop!(pop_i64, push_i64, |a, b| numeric::i64_rem_s(a, b)?),
                Opcode::I64RemU => binop!(pop_i64, push_i64, |a, b| numeric::i64_rem_u(a, b)?),
                Opcode::I64And => binop!(pop_i64, push_i64, |a, b| a & b),
                Opcode::I64Or => binop!(pop_i64, push_i64, |a, b| a | b),
                Opcode::I64Xor => binop!(pop_i64, push_i64, |a, b| a ^ b),
                Opcode::I64Shl => binop!(pop_i64, push_i64, |a, b| a.wrapping_shl(b as u32)),
                Opcode::I64ShrS => binop!(pop_i64, push_i64, |a, b| a.wrapping_shr(b as u32)),
                Opcode::I64ShrU => {
                    binop!(pop_i64, push_i64, |a, b| (a as u64).wrapping_shr(b as u32) as i64)
                }
                Opcode::I64Rotl => binop!(pop_i64, push_i64, |a, b| a.rotate_left(b as u32)),
                Opcode::I64Rotr => binop!(pop_i64, push_i64, |a, b| a.rotate_right(b as u32)),

                Opcode::F32Abs => unop!(pop_f32, push_f32, |a| a.abs()),
                Opcode::F32Neg => unop!(pop_f32, push_f32, |a| -a),
                Opcode::F32Ceil => unop!(pop_f32, push_f32, |a| a.ceil()),
                Opcode::F32Floor => unop!(pop_f32, push_f32, |a| a.floor()),
                Opcode::F32Trunc => unop!(pop_f32, push_f32, |a| a.trunc()),
                Opcode::F32Nearest => unop!(pop_f32, push_f32, |a| a.round_ties_even()),
                Opcode::F32Sqrt => unop!(pop_f32, push_f32, |a| a.sqrt()),
                Opcode::F32Add => binop!(pop_f32, push_f32, |a, b| a + b),
                Opcode::F32Sub => binop!(pop_f32, push_f32, |a, b| a - b),
                Opcode::F32Mul => binop!(pop_f32, push_f32, |a, b| a * b),
                Opcode::F32Div => binop!(pop_f32, push_f32, |a, b| a / b),
                Opcode::F32Min => binop!(pop_f32, push_f32, |a, b| wasm_min(a, b)),
                Opcode::F32Max => binop!(pop_f32, push_f32, |a, b| wasm_max(a, b)),
                Opcode::F32Copysign => binop!(pop_f32, push_f32, |a, b| a.copysign(b)),

                Opcode::F64Abs => unop!(pop_f64, push_f64, |a| a.abs()),
                Opcode::F64Neg => unop!(pop_f64, push_f64, |a| -a),
                Opcode::F64Ceil => unop!(pop_f64, push_f64, |a| a.ceil()),
                Opcode::F64Floor => unop!(pop_f64, push_f64, |a| a.floor()),
                Opcode::F64Trunc => unop!(pop_f64, push_f64, |a| a.trunc()),
                Opcode::F64Nearest => unop!(pop_f64, push_f64, |a| a.round_ties_even()),
                Opcode::F64Sqrt => unop!(pop_f64, push_f64, |a| a.sqrt()),
                Opcode::F64Add => binop!(pop_f64, push_f64, |a, b| a + b),
                Opcode::F64Sub => binop!(pop_f64, push_f64, |a, b| a - b),
                Opcode::F64Mul => binop!(pop_f64, push_f64, |a, b| a * b),
                Opcode::F64Div => binop!(pop_f64, push_f64, |a, b| a / b),
                Opcode::F64Min => binop!(pop_f64, push_f64, |a, b| wasm_min(a, b)),
                Opcode::F64Max => binop!(pop_f64, push_f64, |a, b| wasm_max(a, b)),
                Opcode::F64Copysign => binop!(pop_f64, push_f64, |a, b| a.copysign(b)),

                Opcode::I32WrapI64 => unop!(pop_i64, push_i32, |a| a as i32),
                Opcode::I32TruncF32S => unop!(pop_f32, push_i32, |a| numeric::i32_trunc_f32_s(a)?),
                Opcode::I32TruncF32U => {
                    unop!(pop_f32, push_i32, |a| numeric::i32_trunc_f32_u(a)? as i32)
                }
                Opcode::I32TruncF64S => unop!(pop_f64, push_i32, |a| numeric::i32_trunc_f64_s(a)?),
                Opcode::I32TruncF64U => {
                    unop!(pop_f64, push_i32, |a| numeric::i32_trunc_f64_u(a)? as i32)
                }
                Opcode::I64ExtendI32S => unop!(pop_i32, push_i64, |a| a as i64),
                Opcode::I64ExtendI32U => unop!(pop_i32, push_i64, |a| a as u32 as i64),
                Opcode::I64TruncF32S => unop!(pop_f32, push_i64, |a| numeric::i64_trunc_f32_s(a)?),
                Opcode::I64TruncF32U => {
                    unop!(pop_f32, push_i64, |a| numeric::i64_trunc_f32_u(a)? as i64)
                }
                Opcode::I64TruncF64S => unop!(pop_f64, push_i64, |a| numeric::i64_trunc_f64_s(a)?),
                Opcode::I64TruncF64U => {
                    unop!(pop_f64, push_i64, |a| numeric::i64_trunc_f64_u(a)? as i64)
                }
                Opcode::F32ConvertI32S => unop!(pop_i32, push_f32, |a| a as f32),
                Opcode::F32ConvertI32U => unop!(pop_i32, push_f32, |a| a as u32 as f32),
                Opcode::F32ConvertI64S => unop!(pop_i64, push_f32, |a| a as f32),
                Opcode::F32ConvertI64U => unop!(pop_i64, push_f32, |a| a as u64 as f32),
                Opcode::F64ConvertI32S => unop!(pop_i32, push_f64, |a| a as f64),
                Opcode::F64ConvertI32U => unop!(pop_i32, push_f64, |a| a as u32 as f64),
                Opcode::F64ConvertI64S => unop!(pop_i64, push_f64, |a| a as f64),
                Opcode::F64ConvertI64U => unop!(pop_i64, push_f64, |a| a as u64 as f64),
                Opcode::F32DemoteF64 | Opcode::F64PromoteF32 => {
                    return Err(ExecError::Unsupported(opcode));
                }
                Opcode::I32ReinterpretF32 => unop!(pop_f32, push_i32, |a| a.to_bits() as i32),
                Opcode::I64ReinterpretF64 => unop!(pop_f64, push_i64, |a| a.to_bits() as i64),
                Opcode::F32ReinterpretI32 => unop!(pop_i32, push_f32, |a| f32::from_bits(a as u32)),
                Opcode::F64ReinterpretI64 => unop!(pop_i64, push_f64, |a| f64::from_bits(a as u64)),

                Opcode::I32Extend8S => unop!(pop_i32, push_i32, |a| a as i8 as i32),
                Opcode::I32Extend16S => unop!(pop_i32, push_i32, |a| a as i16 as i32),
                Opcode::I64Extend8S => unop!(pop_i64, push_i64, |a| a as i8 as i64),
                Opcode::I64Extend16S => unop!(pop_i64, push_i64, |a| a as i16 as i64),
                Opcode::I64Extend32S => unop!(pop_i64, push_i64, |a| a as i32 as i64),
            }
        }

        Ok(Signal::FellThrough)
    }

    /// Run the construct opened by `opcode` whose descriptor is `index`.
    /// A loop absorbs `Branch(0)` by restarting; an `if` pops its
    /// condition and picks an arm.
    #[inline(never)]
    fn nested(
        &self,
        ctx: &mut CallContext<'_>,
        frame: &mut Frame,
        opcode: Opcode,
        index: u32,
        sp: &mut u32,
    ) -> Result<Signal, ExecError> {
        match opcode {
            Opcode::Loop => loop {
                match self.enter(ctx, frame, index)? {
                    Signal::Branch(0) => {
                        trace!(func = self.code.func.0, block = index, "loop restart");
                    }
                    other => return Ok(other),
                }
            },
            Opcode::If => {
                let condition = frame.stack.pop_i32(sp);
                match self.code.blocks[index as usize].kind {
                    _ if condition != 0 => self.enter(ctx, frame, index),
                    BlockKind::If {
                        alternative: Some(alternative),
                    } => self.enter(ctx, frame, alternative),
                    _ => Ok(Signal::FellThrough),
                }
            }
            _ => self.enter(ctx, frame, index),
        }
    }

    fn enter(
        &self,
        ctx: &mut CallContext<'_>,
        frame: &mut Frame,
        index: u32,
    ) -> Result<Signal, ExecError> {
        check_native_stack(ctx)?;
        BlockExecutor::new(self.code, index).execute(ctx, frame)
    }

    #[inline(never)]
    fn call_direct(
        &self,
        ctx: &mut CallContext<'_>,
        frame: &mut Frame,
        site: &CallSite,
        sp: &mut u32,
        offset: usize,
    ) -> Result<(), ExecError> {
        let CallSite::Direct { func, target } = site else {
            return Err(ExecError::Malformed(offset));
        };
        let registry = ctx.registry;
        let callable = *target.get_or_init(|| {
            trace!(func = func.0, "resolve call site");
            registry.resolve(*func)
        });
        invoke(ctx, callable, registry.signature(*func), frame, sp)
    }

    #[inline(never)]
    fn call_indirect(
        &self,
        ctx: &mut CallContext<'_>,
        frame: &mut Frame,
        site: &CallSite,
        sp: &mut u32,
        offset: usize,
    ) -> Result<(), ExecError> {
        let CallSite::Indirect { ty } = site else {
            return Err(ExecError::Malformed(offset));
        };
        let element = frame.stack.pop_i32(sp) as u32;
        if !ctx.table.validate_index(element) {
            return Err(Trap::UndefinedElement.into());
        }
        let func = ctx
            .table
            .function_index_at(element)
            .ok_or(Trap::UninitializedElement)?;
        let registry = ctx.registry;
        let signature = registry.signature(func);
        if registry.function_type(*ty) != signature {
            return Err(Trap::IndirectCallTypeMismatch.into());
        }
        invoke(ctx, registry.resolve(func), signature, frame, sp)
    }
}
