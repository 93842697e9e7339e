//! The execution core: one [`BlockExecutor`] per scope, call dispatch, and
//! the entry point used by [`Instance`](crate::Instance).

use std::sync::Arc;
use std::thread;

use anyhow::Context;
use tracing::{debug, trace};

use crate::parse::body::CodeEntry;
use crate::parse::func::{FuncIdx, FuncSig, TypeIdx};
use crate::stack::OperandStack;
use crate::store::globals::Globals;
use crate::store::memory::Memory;
use crate::store::table::Table;
use crate::value::Val;

mod block;
pub(crate) mod call_site;
mod numeric;
mod trap;

use block::BlockExecutor;
#[cfg(test)]
use block::Signal;
use call_site::Callable;
pub use trap::{ExecError, Trap};

#[cfg(test)]
mod tests;

/// A host function: receives the caller's memory and typed arguments.
pub type HostFunc =
    Arc<dyn Fn(&mut dyn Memory, &[Val]) -> Result<Option<Val>, anyhow::Error> + Send + Sync>;

/// Function lookup for one module.
pub(crate) trait FunctionRegistry: Sync {
    /// Concrete entry point of a function. Called at most once per direct
    /// call site.
    fn resolve(&self, func: FuncIdx) -> Callable;

    fn signature(&self, func: FuncIdx) -> &FuncSig;

    fn function_type(&self, ty: TypeIdx) -> &FuncSig;

    /// Code of a [`Callable::Defined`] function.
    fn code(&self, index: u32) -> &CodeEntry;
}

/// Everything an activation may touch besides its own frame.
pub(crate) struct CallContext<'a> {
    pub(crate) registry: &'a dyn FunctionRegistry,
    pub(crate) memory: &'a mut dyn Memory,
    pub(crate) globals: &'a mut dyn Globals,
    pub(crate) table: &'a dyn Table,
    /// Linked host functions by import slot.
    pub(crate) host: &'a [HostFunc],
    /// Remaining instruction budget, `None` when unmetered.
    pub(crate) fuel: Option<u64>,
    pub(crate) depth: u32,
    pub(crate) max_depth: u32,
    /// Native stack address below which entering a function or scope
    /// traps; zero disables the check.
    pub(crate) stack_limit: usize,
}

/// Per-activation state: locals and the preallocated operand stack.
pub(crate) struct Frame {
    pub(crate) locals: Box<[u64]>,
    pub(crate) stack: OperandStack,
}

/// Headroom kept below the stack limit for one scope's native frame plus
/// any host function it calls.
const NATIVE_RED_ZONE: usize = 1 << 20;

/// Approximate address of the current native stack frame.
#[inline(always)]
pub(crate) fn stack_address() -> usize {
    let marker = 0u8;
    std::hint::black_box(&marker) as *const u8 as usize
}

/// Every wasm call and nested scope costs native stack. Trap before the
/// thread's stack runs out.
#[inline]
pub(crate) fn check_native_stack(ctx: &CallContext<'_>) -> Result<(), ExecError> {
    if stack_address() < ctx.stack_limit {
        return Err(Trap::CallStackExhausted.into());
    }
    Ok(())
}

/// Run `f` on a fresh thread with a native stack of `size` bytes.
///
/// `f` receives the stack limit to put in its [`CallContext`]. A panic in
/// `f` is resumed on the calling thread.
pub(crate) fn on_native_stack<R, F>(size: usize, f: F) -> Result<R, anyhow::Error>
where
    R: Send,
    F: FnOnce(usize) -> R + Send,
{
    thread::scope(|scope| {
        let handle = thread::Builder::new()
            .name("wend-exec".to_string())
            .stack_size(size)
            .spawn_scoped(scope, move || {
                let limit = stack_address().saturating_sub(size.saturating_sub(NATIVE_RED_ZONE));
                f(limit)
            })
            .context("failed to spawn execution thread")?;
        match handle.join() {
            Ok(value) => Ok(value),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    })
}

/// Host entry point: run `func` with already type-checked arguments.
pub(crate) fn call(
    ctx: &mut CallContext<'_>,
    func: FuncIdx,
    args: &[Val],
) -> Result<Option<Val>, ExecError> {
    let registry = ctx.registry;
    let sig = registry.signature(func);
    debug!(func = func.0, args = args.len(), "call");

    let result = match registry.resolve(func) {
        Callable::Defined(index) => {
            let code = registry.code(index);
            let mut locals = vec![0u64; code.locals.len()].into_boxed_slice();
            for (slot, arg) in locals.iter_mut().zip(args) {
                *slot = arg.to_bits();
            }
            execute_function(ctx, code, locals)?
        }
        Callable::Host(slot) => call_host(ctx, slot, sig, args)?,
    };

    debug!(func = func.0, "call finished");
    Ok(sig.result.zip(result).map(|(ty, bits)| Val::from_bits(bits, ty)))
}

/// Call from inside wasm: pop the arguments off the caller's stack, run the
/// callee, and push its result.
pub(crate) fn invoke(
    ctx: &mut CallContext<'_>,
    callable: Callable,
    sig: &FuncSig,
    caller: &mut Frame,
    sp: &mut u32,
) -> Result<(), ExecError> {
    let registry = ctx.registry;
    let params = sig.params.len();
    let result = match callable {
        Callable::Defined(index) => {
            let code = registry.code(index);
            let mut locals = vec![0u64; code.locals.len()].into_boxed_slice();
            // Last argument is on top.
            for slot in locals[..params].iter_mut().rev() {
                *slot = caller.stack.pop(sp);
            }
            execute_function(ctx, code, locals)?
        }
        Callable::Host(slot) => {
            let mut args = vec![Val::I32(0); params];
            for (arg, &ty) in args.iter_mut().zip(sig.params.iter()).rev() {
                *arg = Val::from_bits(caller.stack.pop(sp), ty);
            }
            call_host(ctx, slot, sig, &args)?
        }
    };
    if let Some(bits) = result {
        caller.stack.push(sp, bits);
    }
    Ok(())
}

fn execute_function(
    ctx: &mut CallContext<'_>,
    code: &CodeEntry,
    locals: Box<[u64]>,
) -> Result<Option<u64>, ExecError> {
    if ctx.depth >= ctx.max_depth {
        return Err(Trap::CallStackExhausted.into());
    }
    check_native_stack(ctx)?;
    ctx.depth += 1;
    trace!(func = code.func.0, depth = ctx.depth, "enter function");

    let mut frame = Frame {
        locals,
        stack: OperandStack::new(code.max_stack),
    };
    let outcome = BlockExecutor::new(code, 0).execute(ctx, &mut frame);
    ctx.depth -= 1;

    // Every signal out of the body ends the function: a branch to the
    // body's label or a return both leave the results at slot 0.
    let signal = outcome?;
    trace!(func = code.func.0, ?signal, "exit function");
    Ok(code.sig.result.map(|_| frame.stack.get(0)))
}

fn call_host(
    ctx: &mut CallContext<'_>,
    slot: u32,
    sig: &FuncSig,
    args: &[Val],
) -> Result<Option<u64>, ExecError> {
    let hosts = ctx.host;
    let host = hosts
        .get(slot as usize)
        .ok_or_else(|| ExecError::Host(format!("import {slot} is not linked")))?;
    let result = (**host)(&mut *ctx.memory, args).map_err(|e| ExecError::Host(format!("{e:#}")))?;
    match (result, sig.result) {
        (None, None) => Ok(None),
        (Some(val), Some(ty)) if val.ty() == ty => Ok(Some(val.to_bits())),
        (got, _) => Err(ExecError::Host(format!(
            "host function returned {got:?}, expected {sig}"
        ))),
    }
}
