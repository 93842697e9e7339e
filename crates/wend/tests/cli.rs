use std::path::PathBuf;
use std::process::{Command, Output};

const ADDER: &str = r#"
    (module
        (func (export "add") (param i32 i32) (result i32)
            (i32.add (local.get 0) (local.get 1)))
        (func (export "spin") (loop (br 0)))
    )
"#;

fn write_module(name: &str) -> Result<PathBuf, anyhow::Error> {
    let path = std::env::temp_dir().join(format!("wend-cli-{}-{name}.wat", std::process::id()));
    std::fs::write(&path, ADDER)?;
    Ok(path)
}

fn wend(args: &[&str]) -> Result<Output, anyhow::Error> {
    Ok(Command::new(env!("CARGO_BIN_EXE_wend")).args(args).output()?)
}

#[test]
fn run_prints_result() -> Result<(), anyhow::Error> {
    let path = write_module("run")?;
    let file = path.to_string_lossy();
    let output = wend(&["run", &file, "--invoke", "add", "40", "2"])?;
    assert!(output.status.success(), "{output:?}");
    assert_eq!(String::from_utf8(output.stdout)?.trim(), "42");

    // unsigned spelling wraps
    let output = wend(&["run", &file, "--invoke", "add", "4294967295", "1"])?;
    assert_eq!(String::from_utf8(output.stdout)?.trim(), "0");
    std::fs::remove_file(&path)?;
    Ok(())
}

#[test]
fn run_reports_errors() -> Result<(), anyhow::Error> {
    let path = write_module("errors")?;
    let file = path.to_string_lossy();

    let wrong_arity = wend(&["run", &file, "--invoke", "add", "1"])?;
    assert!(!wrong_arity.status.success());

    let bad_number = wend(&["run", &file, "--invoke", "add", "one", "2"])?;
    assert!(!bad_number.status.success());

    let out_of_fuel = wend(&["run", &file, "--invoke", "spin", "--fuel", "1000"])?;
    assert!(!out_of_fuel.status.success());
    assert!(String::from_utf8(out_of_fuel.stderr)?.contains("out of fuel"));
    std::fs::remove_file(&path)?;
    Ok(())
}

#[test]
fn inspect_lists_functions() -> Result<(), anyhow::Error> {
    let path = write_module("inspect")?;
    let output = wend(&["inspect", &path.to_string_lossy()])?;
    assert!(output.status.success(), "{output:?}");
    let text = String::from_utf8(output.stdout)?;
    assert!(text.contains("=== Function 0 (i32 i32) -> i32 ==="), "{text}");
    assert!(text.contains("=== Function 1 () ==="), "{text}");
    assert!(text.contains("Loop"), "{text}");
    std::fs::remove_file(&path)?;
    Ok(())
}
