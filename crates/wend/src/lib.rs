//! A structured-control-flow WebAssembly interpreter.
//!
//! Function bodies execute directly from their encoded bytes. Side tables
//! built at load time supply immediate widths, branch continuations and
//! decoded constants, and every nested `block`/`loop`/`if` runs as its own
//! scope that reports how it finished to its parent.

mod engine;
mod instance;
mod interpreter;
mod linker;
mod module;
mod parse;
mod stack;
mod store;
mod value;

pub use engine::{Config, Engine};
pub use instance::Instance;
pub use interpreter::{ExecError, HostFunc, Trap};
pub use linker::Linker;
pub use module::Module;
pub use parse::func::{FuncIdx, FuncSig};
pub use parse::opcode::Opcode;
pub use store::Store;
pub use store::globals::{GlobalCells, Globals};
pub use store::memory::{LinearMemory, Memory, PAGE_SIZE};
pub use store::table::{FuncTable, Table};
pub use value::{Val, ValType, WasmArgs, WasmResults, WasmVal};
