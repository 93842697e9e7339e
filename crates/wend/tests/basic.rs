use wend::{Config, Engine, ExecError, Linker, Module, Store, Trap, Val};

#[test]
fn return_const_i32() -> Result<(), anyhow::Error> {
    let engine = Engine::default();
    let module = Module::new(
        &engine,
        r#"
        (module
            (func (export "answer") (result i32)
                i32.const 42
            )
        )
    "#,
    )?;
    let linker = Linker::new(&engine);
    let mut store = Store::new(&engine, ());
    let mut instance = linker.instantiate(&mut store, &module)?;
    let result: (i32,) = instance.call(&mut store, "answer", ())?;
    assert_eq!(result, (42,));
    Ok(())
}

#[test]
fn params_and_locals() -> Result<(), anyhow::Error> {
    let engine = Engine::default();
    let module = Module::new(
        &engine,
        r#"
        (module
            (func (export "sum3") (param i32 i32 i32) (result i32) (local i32)
                local.get 0
                local.get 1
                i32.add
                local.set 3
                local.get 3
                local.get 2
                i32.sub
            )
        )
    "#,
    )?;
    let linker = Linker::new(&engine);
    let mut store = Store::new(&engine, ());
    let mut instance = linker.instantiate(&mut store, &module)?;
    let (result,): (i32,) = instance.call(&mut store, "sum3", (10, 20, 5))?;
    assert_eq!(result, 25);
    Ok(())
}

#[test]
fn every_value_type_round_trips() -> Result<(), anyhow::Error> {
    let engine = Engine::default();
    let module = Module::new(
        &engine,
        r#"
        (module
            (func (export "i64") (param i64) (result i64) (i64.mul (local.get 0) (i64.const 3)))
            (func (export "f32") (param f32) (result f32) (f32.add (local.get 0) (f32.const 0.5)))
            (func (export "f64") (param f64) (result f64) (f64.sqrt (local.get 0)))
        )
    "#,
    )?;
    let linker = Linker::new(&engine);
    let mut store = Store::new(&engine, ());
    let mut instance = linker.instantiate(&mut store, &module)?;

    let (a,): (i64,) = instance.call(&mut store, "i64", (-7i64,))?;
    assert_eq!(a, -21);
    let (b,): (f32,) = instance.call(&mut store, "f32", (1.25f32,))?;
    assert_eq!(b, 1.75);
    let (c,): (f64,) = instance.call(&mut store, "f64", (2.25f64,))?;
    assert_eq!(c, 1.5);
    Ok(())
}

#[test]
fn no_result_function() -> Result<(), anyhow::Error> {
    let engine = Engine::default();
    let module = Module::new(
        &engine,
        r#"
        (module
            (func (export "nothing") nop)
        )
    "#,
    )?;
    let linker = Linker::new(&engine);
    let mut store = Store::new(&engine, ());
    let mut instance = linker.instantiate(&mut store, &module)?;
    instance.call::<_, _, ()>(&mut store, "nothing", ())?;
    assert!(instance.call_dynamic(&mut store, "nothing", &[])?.is_empty());
    Ok(())
}

#[test]
fn mutable_globals_persist_between_calls() -> Result<(), anyhow::Error> {
    let engine = Engine::default();
    let module = Module::new(
        &engine,
        r#"
        (module
            (global $counter (export "counter") (mut i32) (i32.const 100))
            (global $step i64 (i64.const 5))
            (func (export "bump") (result i32)
                (global.set $counter
                    (i32.add
                        (global.get $counter)
                        (i32.wrap_i64 (global.get $step))))
                (global.get $counter))
        )
    "#,
    )?;
    let linker = Linker::new(&engine);
    let mut store = Store::new(&engine, ());
    let mut instance = linker.instantiate(&mut store, &module)?;
    let (first,): (i32,) = instance.call(&mut store, "bump", ())?;
    let (second,): (i32,) = instance.call(&mut store, "bump", ())?;
    assert_eq!((first, second), (105, 110));
    assert_eq!(instance.get_global(&store, "counter"), Some(Val::I32(110)));
    assert_eq!(instance.get_global(&store, "bump"), None);
    Ok(())
}

#[test]
fn imported_global_initializes_defined_global() -> Result<(), anyhow::Error> {
    let engine = Engine::default();
    let module = Module::new(
        &engine,
        r#"
        (module
            (import "env" "base" (global $base i32))
            (global $derived i32 (global.get $base))
            (func (export "read") (result i32)
                (i32.add (global.get $base) (global.get $derived)))
        )
    "#,
    )?;
    let mut linker = Linker::new(&engine);
    linker.global("env", "base", Val::I32(21), false);
    assert!(linker.has("env", "base"));
    let mut store = Store::new(&engine, ());
    let mut instance = linker.instantiate(&mut store, &module)?;
    let (result,): (i32,) = instance.call(&mut store, "read", ())?;
    assert_eq!(result, 42);
    Ok(())
}

#[test]
fn start_function_runs_at_instantiation() -> Result<(), anyhow::Error> {
    let engine = Engine::default();
    let module = Module::new(
        &engine,
        r#"
        (module
            (global $ready (mut i32) (i32.const 0))
            (func $init (global.set $ready (i32.const 1)))
            (start $init)
            (func (export "ready") (result i32) (global.get $ready))
        )
    "#,
    )?;
    let linker = Linker::new(&engine);
    let mut store = Store::new(&engine, ());
    let mut instance = linker.instantiate(&mut store, &module)?;
    let (ready,): (i32,) = instance.call(&mut store, "ready", ())?;
    assert_eq!(ready, 1);
    Ok(())
}

#[test]
fn trapping_start_function_fails_instantiation() -> Result<(), anyhow::Error> {
    let engine = Engine::default();
    let module = Module::new(
        &engine,
        r#"
        (module
            (func $init unreachable)
            (start $init)
        )
    "#,
    )?;
    let linker = Linker::new(&engine);
    let mut store = Store::new(&engine, ());
    let err = linker.instantiate(&mut store, &module).err().unwrap();
    let exec = err.downcast_ref::<ExecError>().unwrap();
    assert_eq!(exec.trap(), Some(Trap::Unreachable));
    Ok(())
}

#[test]
fn dynamic_call_checks_arguments() -> Result<(), anyhow::Error> {
    let engine = Engine::default();
    let module = Module::new(
        &engine,
        r#"
        (module
            (func (export "id") (param i64) (result i64) local.get 0)
            (global (export "g") i32 (i32.const 0))
        )
    "#,
    )?;
    let linker = Linker::new(&engine);
    let mut store = Store::new(&engine, ());
    let mut instance = linker.instantiate(&mut store, &module)?;

    assert_eq!(
        instance.call_dynamic(&mut store, "id", &[Val::I64(-1)])?,
        vec![Val::I64(-1)]
    );
    assert!(instance.call_dynamic(&mut store, "id", &[Val::I32(1)]).is_err());
    assert!(instance.call_dynamic(&mut store, "id", &[]).is_err());
    assert!(instance.call_dynamic(&mut store, "missing", &[]).is_err());
    assert!(instance.call_dynamic(&mut store, "g", &[]).is_err());
    assert!(instance.call::<_, _, (i32,)>(&mut store, "id", (1i64,)).is_err());
    Ok(())
}

#[test]
fn module_introspection() -> Result<(), anyhow::Error> {
    let engine = Engine::default();
    let module = Module::new(
        &engine,
        r#"
        (module
            (func $helper (param i32) (result i32) local.get 0)
            (func (export "entry") (param i32 f64) (result i32)
                (call $helper (local.get 0)))
        )
    "#,
    )?;
    assert_eq!(module.defined_functions(), 2);
    assert_eq!(module.exported_functions().collect::<Vec<_>>(), ["entry"]);
    assert_eq!(module.export_signature("entry")?.to_string(), "(i32 f64) -> i32");

    let dump = module.dump_func(1).unwrap();
    assert!(dump.contains("Function 1"), "{dump}");
    assert!(module.dump_func(2).is_none());
    Ok(())
}

#[test]
fn invalid_modules_are_rejected() {
    let engine = Engine::default();
    // type error: i64 result from an i32 function
    assert!(
        Module::new(
            &engine,
            r#"(module (func (result i32) i64.const 1))"#
        )
        .is_err()
    );
    assert!(Module::from_bytes(&engine, b"\0asm\x02\0\0\0").is_err());
}

#[test]
fn store_fuel_comes_from_config() -> Result<(), anyhow::Error> {
    let mut config = Config::new();
    config.fuel(Some(50));
    let engine = Engine::new(&config);
    let module = Module::new(
        &engine,
        r#"
        (module
            (func (export "two") (result i32) (i32.add (i32.const 1) (i32.const 1)))
        )
    "#,
    )?;
    let linker = Linker::new(&engine);
    let mut store = Store::new(&engine, ());
    assert_eq!(store.fuel(), Some(50));
    let mut instance = linker.instantiate(&mut store, &module)?;
    let (two,): (i32,) = instance.call(&mut store, "two", ())?;
    assert_eq!(two, 2);
    assert_eq!(store.fuel(), Some(47));
    Ok(())
}
