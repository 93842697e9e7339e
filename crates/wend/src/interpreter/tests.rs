use std::sync::atomic::{AtomicUsize, Ordering};

use super::*;
use super::call_site::CallSite;
use crate::Engine;
use crate::parse::opcode::Opcode;
use crate::parse::{ParsedModule, parse};
use crate::store::globals::GlobalCells;
use crate::store::memory::LinearMemory;
use crate::store::table::FuncTable;

fn module(wat: &str) -> ParsedModule {
    let engine = Engine::default();
    let bytes = wat::parse_str(wat).unwrap();
    parse(&engine, &bytes).unwrap()
}

struct Env {
    memory: LinearMemory,
    globals: GlobalCells,
    table: FuncTable,
}

impl Env {
    fn new() -> Self {
        Self {
            memory: LinearMemory::new(1, 4).unwrap(),
            globals: GlobalCells::new(),
            table: FuncTable::default(),
        }
    }

    fn context<'a>(&'a mut self, registry: &'a dyn FunctionRegistry) -> CallContext<'a> {
        CallContext {
            registry,
            memory: &mut self.memory,
            globals: &mut self.globals,
            table: &self.table,
            host: &[],
            fuel: None,
            depth: 0,
            max_depth: 64,
            stack_limit: 0,
        }
    }
}

/// Run one scope of the first function directly, returning its signal and
/// the frame it ran in.
fn run_block(module: &ParsedModule, block: u32) -> (Result<Signal, ExecError>, Frame) {
    let code = &module.codes[0];
    let mut env = Env::new();
    let mut ctx = env.context(module);
    let mut frame = Frame {
        locals: vec![0u64; code.locals.len()].into_boxed_slice(),
        stack: OperandStack::new(code.max_stack),
    };
    let signal = BlockExecutor::new(code, block).execute(&mut ctx, &mut frame);
    (signal, frame)
}

fn call_i32(module: &ParsedModule, func: u32, args: &[Val]) -> Result<Option<Val>, ExecError> {
    let mut env = Env::new();
    let mut ctx = env.context(module);
    call(&mut ctx, FuncIdx(func), args)
}

#[test]
fn fall_through_leaves_result_at_slot_zero() {
    let module = module(
        r#"
        (module
            (func (result i32)
                i32.const 4
                i32.const 5
                i32.add))
    "#,
    );
    let (signal, frame) = run_block(&module, 0);
    assert_eq!(signal.unwrap(), Signal::FellThrough);
    assert_eq!(frame.stack.get(0), 9);
}

#[test]
fn branch_to_body_ends_function() {
    let module = module(
        r#"
        (module
            (func (result i32)
                i32.const 4
                br 0))
    "#,
    );
    let (signal, frame) = run_block(&module, 0);
    assert_eq!(signal.unwrap(), Signal::Branch(0));
    assert_eq!(frame.stack.get(0), 4);
}

#[test]
fn branch_depth_decrements_per_scope() {
    let module = module(
        r#"
        (module
            (func
                (block
                    (block
                        br 2))))
    "#,
    );
    assert_eq!(run_block(&module, 2).0.unwrap(), Signal::Branch(2));
    assert_eq!(run_block(&module, 1).0.unwrap(), Signal::Branch(1));
    assert_eq!(run_block(&module, 0).0.unwrap(), Signal::Branch(0));
}

#[test]
fn return_crosses_every_scope() {
    let module = module(
        r#"
        (module
            (func (result i32)
                (block
                    (block
                        (return (i32.const 7))))
                i32.const 0))
    "#,
    );
    let (signal, frame) = run_block(&module, 0);
    assert_eq!(signal.unwrap(), Signal::Return);
    assert_eq!(frame.stack.get(0), 7);
}

#[test]
fn branch_carries_value_past_leftovers() {
    let module = module(
        r#"
        (module
            (func (result i32)
                (block (result i32)
                    i32.const 1
                    i32.const 2
                    i32.const 3
                    br 0)
                i32.const 10
                i32.add))
    "#,
    );
    assert_eq!(call_i32(&module, 0, &[]).unwrap(), Some(Val::I32(13)));
}

#[test]
fn loop_restarts_until_fall_through() {
    let module = module(
        r#"
        (module
            (func (result i32) (local i32)
                (loop
                    (local.set 0 (i32.add (local.get 0) (i32.const 1)))
                    (br_if 0 (i32.lt_u (local.get 0) (i32.const 3))))
                local.get 0))
    "#,
    );
    assert_eq!(call_i32(&module, 0, &[]).unwrap(), Some(Val::I32(3)));
}

#[test]
fn if_selects_arm() {
    let module = module(
        r#"
        (module
            (func (param i32) (result i32)
                (if (result i32) (local.get 0)
                    (then (i32.const 10))
                    (else (i32.const 20)))
                i32.const 1
                i32.add))
    "#,
    );
    assert_eq!(call_i32(&module, 0, &[Val::I32(1)]).unwrap(), Some(Val::I32(11)));
    assert_eq!(call_i32(&module, 0, &[Val::I32(0)]).unwrap(), Some(Val::I32(21)));
}

#[test]
fn br_table_out_of_range_takes_default() {
    let module = module(
        r#"
        (module
            (func (param i32) (result i32)
                (block
                    (block
                        (block
                            (br_table 0 1 2 (local.get 0)))
                        (return (i32.const 10)))
                    (return (i32.const 11)))
                i32.const 12))
    "#,
    );
    let expected = [(0, 10), (1, 11), (2, 12), (99, 12), (-1, 12)];
    for (index, result) in expected {
        assert_eq!(
            call_i32(&module, 0, &[Val::I32(index)]).unwrap(),
            Some(Val::I32(result)),
            "index {index}"
        );
    }
}

struct CountingRegistry {
    module: ParsedModule,
    watched: FuncIdx,
    resolved: AtomicUsize,
}

impl FunctionRegistry for CountingRegistry {
    fn resolve(&self, func: FuncIdx) -> Callable {
        if func == self.watched {
            self.resolved.fetch_add(1, Ordering::Relaxed);
        }
        self.module.resolve(func)
    }

    fn signature(&self, func: FuncIdx) -> &FuncSig {
        self.module.signature(func)
    }

    fn function_type(&self, ty: TypeIdx) -> &FuncSig {
        self.module.function_type(ty)
    }

    fn code(&self, index: u32) -> &CodeEntry {
        self.module.code(index)
    }
}

#[test]
fn call_sites_resolve_once() {
    let registry = CountingRegistry {
        module: module(
            r#"
            (module
                (func $leaf (result i32) i32.const 5)
                (func (result i32)
                    (i32.add (call $leaf) (call $leaf))))
        "#,
        ),
        watched: FuncIdx(0),
        resolved: AtomicUsize::new(0),
    };

    let mut env = Env::new();
    for _ in 0..10 {
        let mut ctx = env.context(&registry);
        assert_eq!(call(&mut ctx, FuncIdx(1), &[]).unwrap(), Some(Val::I32(10)));
    }
    // one resolution per call site, none after
    assert_eq!(registry.resolved.load(Ordering::Relaxed), 2);
    assert!(
        registry.module.codes[1]
            .body()
            .call_sites
            .iter()
            .all(CallSite::is_resolved)
    );
}

#[test]
fn recursion_passes_arguments_in_order() {
    let module = module(
        r#"
        (module
            (func $sub (param i32 i32) (result i32)
                (i32.sub (local.get 0) (local.get 1)))
            (func $fac (param i64) (result i64)
                (if (result i64) (i64.eqz (local.get 0))
                    (then (i64.const 1))
                    (else
                        (i64.mul
                            (local.get 0)
                            (call $fac (i64.sub (local.get 0) (i64.const 1)))))))
            (func (result i32)
                (call $sub (i32.const 10) (i32.const 3))))
    "#,
    );
    assert_eq!(call_i32(&module, 2, &[]).unwrap(), Some(Val::I32(7)));
    assert_eq!(
        call_i32(&module, 1, &[Val::I64(10)]).unwrap(),
        Some(Val::I64(3_628_800))
    );
}

#[test]
fn float_narrowing_is_unsupported() {
    let module = module(
        r#"
        (module
            (func (param f64) (result f32)
                (f32.demote_f64 (local.get 0)))
            (func (param f32) (result f64)
                (f64.promote_f32 (local.get 0))))
    "#,
    );
    assert_eq!(
        call_i32(&module, 0, &[Val::F64(1.0)]).unwrap_err(),
        ExecError::Unsupported(Opcode::F32DemoteF64)
    );
    assert_eq!(
        call_i32(&module, 1, &[Val::F32(1.0)]).unwrap_err(),
        ExecError::Unsupported(Opcode::F64PromoteF32)
    );
}

#[test]
fn trap_restores_call_depth() {
    let module = module(
        r#"
        (module
            (func $div (param i32) (result i32)
                (i32.div_u (i32.const 1) (local.get 0)))
            (func (param i32) (result i32)
                (call $div (local.get 0))))
    "#,
    );
    let mut env = Env::new();
    let mut ctx = env.context(&module);
    let err = call(&mut ctx, FuncIdx(1), &[Val::I32(0)]).unwrap_err();
    assert_eq!(err.trap(), Some(Trap::IntegerDivideByZero));
    assert_eq!(ctx.depth, 0);

    let ok = call(&mut ctx, FuncIdx(1), &[Val::I32(1)]).unwrap();
    assert_eq!(ok, Some(Val::I32(1)));
}

#[test]
fn unbounded_recursion_exhausts_call_stack() {
    let module = module(
        r#"
        (module
            (func $f (call $f)))
    "#,
    );
    let mut env = Env::new();
    let mut ctx = env.context(&module);
    ctx.max_depth = 16;
    let err = call(&mut ctx, FuncIdx(0), &[]).unwrap_err();
    assert_eq!(err, ExecError::Trap(Trap::CallStackExhausted));
    assert_eq!(ctx.depth, 0);
}

#[test]
fn native_stack_limit_traps_before_entry() {
    let module = module(
        r#"
        (module
            (func (result i32) (i32.const 1)))
    "#,
    );
    let mut env = Env::new();
    let mut ctx = env.context(&module);
    ctx.stack_limit = usize::MAX;
    let err = call(&mut ctx, FuncIdx(0), &[]).unwrap_err();
    assert_eq!(err, ExecError::Trap(Trap::CallStackExhausted));
    assert_eq!(ctx.depth, 0);

    ctx.stack_limit = 0;
    assert_eq!(call(&mut ctx, FuncIdx(0), &[]).unwrap(), Some(Val::I32(1)));
}

#[test]
fn execution_thread_reports_limit_within_its_stack() {
    let size = crate::engine::MIN_NATIVE_STACK_SIZE;
    let (limit, inside) = on_native_stack(size, |limit| (limit, stack_address())).unwrap();
    assert!(limit > 0);
    assert!(limit < inside);
    assert!(inside - limit < size);
}

#[test]
fn deep_recursion_on_execution_thread_traps() {
    let module = module(
        r#"
        (module
            (func $f (call $f)))
    "#,
    );
    let mut env = Env::new();
    let result = on_native_stack(crate::engine::MIN_NATIVE_STACK_SIZE, |stack_limit| {
        let mut ctx = env.context(&module);
        ctx.max_depth = u32::MAX;
        ctx.stack_limit = stack_limit;
        call(&mut ctx, FuncIdx(0), &[])
    })
    .unwrap();
    assert_eq!(result.unwrap_err(), ExecError::Trap(Trap::CallStackExhausted));
}

#[test]
fn fuel_runs_out_in_infinite_loop() {
    let module = module(
        r#"
        (module
            (func (loop (br 0))))
    "#,
    );
    let mut env = Env::new();
    let mut ctx = env.context(&module);
    ctx.fuel = Some(100);
    let err = call(&mut ctx, FuncIdx(0), &[]).unwrap_err();
    assert_eq!(err.trap(), Some(Trap::OutOfFuel));
    assert_eq!(ctx.fuel, Some(0));
}

#[test]
fn fuel_counts_instructions() {
    let module = module(
        r#"
        (module
            (func (result i32)
                i32.const 1
                i32.const 2
                i32.add))
    "#,
    );
    let mut env = Env::new();
    let mut ctx = env.context(&module);
    ctx.fuel = Some(10);
    assert_eq!(call(&mut ctx, FuncIdx(0), &[]).unwrap(), Some(Val::I32(3)));
    // three operators; the closing end is not executed
    assert_eq!(ctx.fuel, Some(7));
}

#[test]
fn memory_access_out_of_bounds_traps() {
    let module = module(
        r#"
        (module
            (memory 1)
            (func (param i32) (result i32)
                (i32.load (local.get 0))))
    "#,
    );
    let last = (crate::PAGE_SIZE - 4) as i32;
    assert_eq!(call_i32(&module, 0, &[Val::I32(last)]).unwrap(), Some(Val::I32(0)));
    assert_eq!(
        call_i32(&module, 0, &[Val::I32(last + 1)]).unwrap_err(),
        ExecError::Trap(Trap::MemoryOutOfBounds)
    );
}
