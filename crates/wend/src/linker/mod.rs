//! Named import registry for module instantiation.
//!
//! The [`Linker`] collects host functions and globals by `(module, name)`
//! and resolves them against a module's declared imports during
//! instantiation.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use tracing::debug;

use crate::interpreter::HostFunc;
use crate::parse::func::FuncSig;
use crate::parse::{ConstExpr, ImportName};
use crate::store::globals::GlobalCells;
use crate::store::memory::{LinearMemory, Memory, PAGE_SIZE};
use crate::store::table::FuncTable;
use crate::value::Val;
use crate::{Engine, Instance, Module, Store};

struct HostDefinition {
    sig: FuncSig,
    func: HostFunc,
}

struct HostGlobal {
    value: Val,
    mutable: bool,
}

/// A named import registry that resolves module imports during
/// instantiation.
///
/// # Examples
///
/// ```
/// use wend::{Engine, FuncSig, Linker, Module, Store, Val, ValType};
///
/// let engine = Engine::default();
/// let module = Module::new(&engine, r#"
///     (module
///         (import "env" "double" (func $double (param i32) (result i32)))
///         (func (export "run") (result i32) (call $double (i32.const 21))))
/// "#)?;
/// let mut linker = Linker::new(&engine);
/// linker.func(
///     "env",
///     "double",
///     FuncSig::new([ValType::I32], Some(ValType::I32)),
///     |_memory, args| match args {
///         [Val::I32(v)] => Ok(Some(Val::I32(v * 2))),
///         _ => anyhow::bail!("bad arguments"),
///     },
/// );
/// let mut store = Store::new(&engine, ());
/// let mut instance = linker.instantiate(&mut store, &module)?;
/// let (answer,): (i32,) = instance.call(&mut store, "run", ())?;
/// assert_eq!(answer, 42);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub struct Linker {
    max_call_depth: u32,
    max_memory_pages: u32,
    native_stack_size: usize,
    funcs: HashMap<(String, String), HostDefinition>,
    globals: HashMap<(String, String), HostGlobal>,
}

impl Linker {
    /// Create an empty linker.
    pub fn new(engine: &Engine) -> Self {
        let config = engine.config();
        Linker {
            max_call_depth: config.max_call_depth,
            max_memory_pages: config.max_memory_pages,
            native_stack_size: config.native_stack_size,
            funcs: HashMap::new(),
            globals: HashMap::new(),
        }
    }

    /// Register a host function import.
    pub fn func<F>(&mut self, module: &str, name: &str, sig: FuncSig, func: F) -> &mut Self
    where
        F: Fn(&mut dyn Memory, &[Val]) -> Result<Option<Val>, anyhow::Error>
            + Send
            + Sync
            + 'static,
    {
        self.funcs.insert(
            (module.to_string(), name.to_string()),
            HostDefinition {
                sig,
                func: Arc::new(func),
            },
        );
        self
    }

    /// Register a global import.
    pub fn global(&mut self, module: &str, name: &str, value: Val, mutable: bool) -> &mut Self {
        self.globals
            .insert((module.to_string(), name.to_string()), HostGlobal { value, mutable });
        self
    }

    /// Check whether an import name is already registered.
    pub fn has(&self, module: &str, name: &str) -> bool {
        let key = (module.to_string(), name.to_string());
        self.funcs.contains_key(&key) || self.globals.contains_key(&key)
    }

    /// Resolve a module's imports and instantiate it.
    ///
    /// Builds memory, globals and the table, applies active element and
    /// data segments, then runs the start function if there is one.
    /// Returns an error if any import is missing or mismatched, or a
    /// segment does not fit.
    pub fn instantiate<T>(
        &self,
        store: &mut Store<T>,
        module: &Module,
    ) -> Result<Instance, anyhow::Error> {
        let parsed = &*module.inner;

        let mut host = Vec::with_capacity(parsed.func_imports.len());
        for (i, import) in parsed.func_imports.iter().enumerate() {
            let def = self
                .funcs
                .get(&key(import))
                .ok_or_else(|| anyhow::anyhow!("import {}::{} was not found", import.module, import.name))?;
            let expected = &parsed.types[parsed.funcs[i].0 as usize];
            anyhow::ensure!(
                def.sig == *expected,
                "import {}::{}: expected {expected}, found {}",
                import.module,
                import.name,
                def.sig
            );
            host.push(def.func.clone());
        }

        let mut globals = GlobalCells::new();
        for import in &parsed.global_imports {
            let name = &import.name;
            let global = self
                .globals
                .get(&key(name))
                .ok_or_else(|| anyhow::anyhow!("import {}::{} was not found", name.module, name.name))?;
            anyhow::ensure!(
                global.value.ty() == import.ty && global.mutable == import.mutable,
                "import {}::{}: global type mismatch",
                name.module,
                name.name
            );
            globals.push(global.value, global.mutable);
        }
        for def in &parsed.globals {
            let value = eval_const(&def.init, &globals)?;
            globals.push(value, def.mutable);
        }

        let mut memory = match parsed.memory {
            Some(limits) => {
                let maximum = limits
                    .maximum
                    .unwrap_or(self.max_memory_pages)
                    .min(self.max_memory_pages);
                LinearMemory::new(limits.initial, maximum)?
            }
            None => LinearMemory::new(0, 0)?,
        };

        let mut table = match parsed.table {
            Some(limits) => FuncTable::new(limits.initial),
            None => FuncTable::default(),
        };
        for (i, segment) in parsed.elements.iter().enumerate() {
            let offset = eval_offset(&segment.offset, &globals)?;
            table
                .init(offset, &segment.funcs)
                .with_context(|| format!("element segment {i}"))?;
        }

        for (i, segment) in parsed.data.iter().enumerate() {
            let start = eval_offset(&segment.offset, &globals)? as usize;
            let end = start + segment.bytes.len();
            let bytes = memory.data_mut();
            anyhow::ensure!(
                end <= bytes.len(),
                "data segment {i} ({start}..{end}) does not fit memory of {} pages",
                bytes.len() / PAGE_SIZE
            );
            bytes[start..end].copy_from_slice(&segment.bytes);
        }

        let mut instance = Instance {
            module: module.clone(),
            memory,
            globals,
            table,
            host: host.into(),
            max_call_depth: self.max_call_depth,
            native_stack_size: self.native_stack_size,
        };
        debug!(
            imports = instance.host.len(),
            globals = instance.globals.len(),
            memory_pages = instance.memory.size(),
            table = instance.table.len(),
            "instantiated"
        );

        if let Some(start) = parsed.start {
            debug!(func = start.0, "running start function");
            instance
                .invoke(store, start, &[])
                .context("start function failed")?;
        }
        Ok(instance)
    }
}

impl Default for Linker {
    fn default() -> Self {
        Self::new(&Engine::default())
    }
}

fn key(name: &ImportName) -> (String, String) {
    (name.module.clone(), name.name.clone())
}

fn eval_const(expr: &ConstExpr, globals: &GlobalCells) -> Result<Val, anyhow::Error> {
    match *expr {
        ConstExpr::Value(value) => Ok(value),
        ConstExpr::GlobalGet(idx) => globals
            .get(idx)
            .ok_or_else(|| anyhow::anyhow!("constant expression reads unknown global {idx}")),
    }
}

fn eval_offset(expr: &ConstExpr, globals: &GlobalCells) -> Result<u32, anyhow::Error> {
    match eval_const(expr, globals)? {
        Val::I32(offset) => Ok(offset as u32),
        other => anyhow::bail!("segment offset must be i32, got {other:?}"),
    }
}
