use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use wend::{Config, Engine, Linker, Module, Store, Val};

#[derive(Parser)]
#[command(name = "wend", about = "Structured-control-flow WebAssembly interpreter")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run an exported function and print its result.
    Run {
        /// Path to a .wat or .wasm file.
        file: PathBuf,
        /// Export to call.
        #[arg(long)]
        invoke: String,
        /// Arguments, parsed against the export's parameter types.
        args: Vec<String>,
        /// Instruction budget; unlimited if omitted.
        #[arg(long)]
        fuel: Option<u64>,
        /// Maximum nested call depth.
        #[arg(long, default_value_t = 1_000)]
        max_call_depth: u32,
    },
    /// Show the translated code of every defined function: side-table
    /// sizes and the block descriptor arena.
    Inspect {
        /// Path to a .wat or .wasm file.
        file: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            file,
            invoke,
            args,
            fuel,
            max_call_depth,
        } => run(file, &invoke, &args, fuel, max_call_depth),
        Command::Inspect { file } => inspect(file),
    }
}

fn run(
    file: PathBuf,
    export: &str,
    args: &[String],
    fuel: Option<u64>,
    max_call_depth: u32,
) -> anyhow::Result<()> {
    let mut config = Config::new();
    config.fuel(fuel).max_call_depth(max_call_depth);
    let engine = Engine::new(&config);
    let module = Module::from_file(&engine, &file)
        .with_context(|| format!("loading {}", file.display()))?;

    let sig = module.export_signature(export)?;
    anyhow::ensure!(
        args.len() == sig.params.len(),
        "{export} takes {} arguments {sig}, got {}",
        sig.params.len(),
        args.len()
    );
    let vals = args
        .iter()
        .zip(sig.params.iter())
        .map(|(text, ty)| {
            Val::parse(text, *ty).with_context(|| format!("argument {text:?} is not a valid {ty}"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let linker = Linker::new(&engine);
    let mut store = Store::new(&engine, ());
    let mut instance = linker.instantiate(&mut store, &module)?;
    for result in instance.call_dynamic(&mut store, export, &vals)? {
        println!("{result}");
    }
    Ok(())
}

fn inspect(file: PathBuf) -> anyhow::Result<()> {
    let engine = Engine::default();
    let module = Module::from_file(&engine, &file)
        .with_context(|| format!("loading {}", file.display()))?;
    for idx in 0..module.defined_functions() {
        if let Some(dump) = module.dump_func(idx) {
            print!("{dump}");
        }
    }
    Ok(())
}
