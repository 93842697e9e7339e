use crate::interpreter::{self, CallContext, HostFunc};
use crate::parse::ExportKind;
use crate::parse::func::FuncIdx;
use crate::store::globals::GlobalCells;
use crate::store::memory::LinearMemory;
use crate::store::table::FuncTable;
use crate::value::{Val, WasmArgs, WasmResults};
use crate::{Module, Store};

/// An instantiated WASM module.
pub struct Instance {
    pub(crate) module: Module,
    pub(crate) memory: LinearMemory,
    pub(crate) globals: GlobalCells,
    pub(crate) table: FuncTable,
    pub(crate) host: Box<[HostFunc]>,
    pub(crate) max_call_depth: u32,
    pub(crate) native_stack_size: usize,
}

impl Instance {
    /// Call an exported function by name (typed API).
    pub fn call<T, A: WasmArgs, R: WasmResults>(
        &mut self,
        store: &mut Store<T>,
        name: &str,
        args: A,
    ) -> Result<R, anyhow::Error> {
        let vals = self.call_dynamic(store, name, &args.to_vals())?;
        R::from_vals(&vals)
    }

    /// Call an exported function by name (dynamic API).
    ///
    /// Arguments are checked against the export's signature before anything
    /// runs. Execution failures are returned as [`ExecError`](crate::ExecError)
    /// and can be recovered with `downcast_ref`.
    pub fn call_dynamic<T>(
        &mut self,
        store: &mut Store<T>,
        name: &str,
        args: &[Val],
    ) -> Result<Vec<Val>, anyhow::Error> {
        let func_idx = self.module.export_func(name)?;
        let sig = self.module.export_signature(name)?;
        anyhow::ensure!(
            args.len() == sig.params.len(),
            "{name} expects {} arguments, got {}",
            sig.params.len(),
            args.len()
        );
        for (i, (arg, ty)) in args.iter().zip(sig.params.iter()).enumerate() {
            anyhow::ensure!(
                arg.ty() == *ty,
                "argument {i} of {name}: expected {ty}, got {}",
                arg.ty()
            );
        }

        let result = self.invoke(store, func_idx, args)?;
        Ok(result.into_iter().collect())
    }

    /// Get an exported global's value by name.
    pub fn get_global<T>(&self, _store: &Store<T>, name: &str) -> Option<Val> {
        match self.module.inner.exports.get(name)? {
            ExportKind::Global(idx) => self.globals.get(*idx),
            _ => None,
        }
    }

    /// The instance's linear memory (empty if the module declares none).
    pub fn memory(&self) -> &LinearMemory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut LinearMemory {
        &mut self.memory
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub(crate) fn invoke<T>(
        &mut self,
        store: &mut Store<T>,
        func: FuncIdx,
        args: &[Val],
    ) -> Result<Option<Val>, anyhow::Error> {
        let fuel = store.fuel_mut();
        let registry = &*self.module.inner;
        let memory = &mut self.memory;
        let globals = &mut self.globals;
        let table = &self.table;
        let host = &self.host[..];
        let initial_fuel = *fuel;
        let max_depth = self.max_call_depth;

        let (result, remaining) =
            interpreter::on_native_stack(self.native_stack_size, move |stack_limit| {
                let mut ctx = CallContext {
                    registry,
                    memory,
                    globals,
                    table,
                    host,
                    fuel: initial_fuel,
                    depth: 0,
                    max_depth,
                    stack_limit,
                };
                let result = interpreter::call(&mut ctx, func, args);
                (result, ctx.fuel)
            })?;
        *fuel = remaining;
        Ok(result?)
    }
}
