use std::sync::Arc;

use crate::Engine;
use crate::parse::func::{FuncIdx, FuncSig};
use crate::parse::{ExportKind, ParsedModule, parse};

/// A parsed and translated WASM module (immutable, cheap to clone).
///
/// Clones share code, including resolved call sites, so one module may be
/// instantiated and executed on many threads at once.
#[derive(Debug, Clone)]
pub struct Module {
    pub(crate) inner: Arc<ParsedModule>,
}

impl Module {
    /// Parse a WAT string into a module.
    pub fn new(engine: &Engine, wat: &str) -> Result<Self, anyhow::Error> {
        let bytes = wat::parse_str(wat)?;
        Self::from_bytes(engine, &bytes)
    }

    /// Create a module from raw WASM bytes.
    pub fn from_bytes(engine: &Engine, bytes: &[u8]) -> Result<Self, anyhow::Error> {
        let parsed = parse(engine, bytes)?;
        Ok(Module {
            inner: Arc::new(parsed),
        })
    }

    /// Read a `.wasm` binary or `.wat` text file.
    pub fn from_file(engine: &Engine, path: impl AsRef<std::path::Path>) -> Result<Self, anyhow::Error> {
        let bytes = wat::parse_file(path)?;
        Self::from_bytes(engine, &bytes)
    }

    pub(crate) fn export_func(&self, name: &str) -> Result<FuncIdx, anyhow::Error> {
        match self.inner.exports.get(name) {
            Some(ExportKind::Func(idx)) => Ok(*idx),
            Some(other) => anyhow::bail!("export {name} is not a function: {other:?}"),
            None => anyhow::bail!("export {name} not found"),
        }
    }

    /// Signature of an exported function.
    pub fn export_signature(&self, name: &str) -> Result<&FuncSig, anyhow::Error> {
        let idx = self.export_func(name)?;
        Ok(crate::interpreter::FunctionRegistry::signature(&*self.inner, idx))
    }

    /// Names of all exported functions.
    pub fn exported_functions(&self) -> impl Iterator<Item = &str> {
        self.inner
            .exports
            .iter()
            .filter(|(_, kind)| matches!(kind, ExportKind::Func(_)))
            .map(|(name, _)| name.as_str())
    }

    /// Number of functions with a body.
    pub fn defined_functions(&self) -> usize {
        self.inner.codes.len()
    }

    /// Describe a defined function's translated code: side-table sizes and
    /// the block descriptor arena.
    pub fn dump_func(&self, idx: usize) -> Option<String> {
        self.inner.codes.get(idx).map(|code| code.to_string())
    }
}
