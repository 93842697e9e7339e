use std::sync::Arc;
use std::thread;

use wend::{Engine, Linker, Module, Store};

const WORKLOAD: &str = r#"
    (module
        (memory 1)
        (func $fib (param i32) (result i32)
            (if (result i32) (i32.lt_u (local.get 0) (i32.const 2))
                (then (local.get 0))
                (else
                    (i32.add
                        (call $fib (i32.sub (local.get 0) (i32.const 1)))
                        (call $fib (i32.sub (local.get 0) (i32.const 2)))))))
        (func (export "fib") (param i32) (result i32) (call $fib (local.get 0)))
        (func (export "fill") (param $seed i32) (result i32) (local $i i32) (local $sum i32)
            (loop $write
                (i32.store8 (local.get $i) (i32.add (local.get $seed) (local.get $i)))
                (local.set $i (i32.add (local.get $i) (i32.const 1)))
                (br_if $write (i32.lt_u (local.get $i) (i32.const 64))))
            (local.set $i (i32.const 0))
            (loop $read
                (local.set $sum (i32.add (local.get $sum) (i32.load8_u (local.get $i))))
                (local.set $i (i32.add (local.get $i) (i32.const 1)))
                (br_if $read (i32.lt_u (local.get $i) (i32.const 64))))
            (local.get $sum))
    )
"#;

fn expected_fill(seed: i32) -> i32 {
    (0..64).map(|i| (seed + i) & 0xff).sum()
}

#[test]
fn shared_module_runs_on_many_threads() -> Result<(), anyhow::Error> {
    let engine = Engine::default();
    let module = Arc::new(Module::new(&engine, WORKLOAD)?);

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let engine = engine.clone();
            let module = Arc::clone(&module);
            thread::spawn(move || -> Result<(i32, i32), anyhow::Error> {
                let linker = Linker::new(&engine);
                let mut store = Store::new(&engine, ());
                let mut instance = linker.instantiate(&mut store, &module)?;
                let mut fib = 0;
                for _ in 0..20 {
                    let (value,): (i32,) = instance.call(&mut store, "fib", (12,))?;
                    fib = value;
                }
                let (sum,): (i32,) = instance.call(&mut store, "fill", (worker * 10,))?;
                Ok((fib, sum))
            })
        })
        .collect();

    for (worker, handle) in handles.into_iter().enumerate() {
        let (fib, sum) = handle.join().unwrap()?;
        assert_eq!(fib, 144);
        // each instance owns its memory
        assert_eq!(sum, expected_fill(worker as i32 * 10));
    }
    Ok(())
}

#[test]
fn instances_from_one_module_are_isolated() -> Result<(), anyhow::Error> {
    let engine = Engine::default();
    let module = Module::new(
        &engine,
        r#"
        (module
            (global $n (mut i32) (i32.const 0))
            (func (export "next") (result i32)
                (global.set $n (i32.add (global.get $n) (i32.const 1)))
                (global.get $n))
        )
    "#,
    )?;
    let linker = Linker::new(&engine);
    let mut store = Store::new(&engine, ());
    let mut a = linker.instantiate(&mut store, &module)?;
    let mut b = linker.instantiate(&mut store, &module.clone())?;
    for _ in 0..3 {
        let _: (i32,) = a.call(&mut store, "next", ())?;
    }
    let (from_a,): (i32,) = a.call(&mut store, "next", ())?;
    let (from_b,): (i32,) = b.call(&mut store, "next", ())?;
    assert_eq!((from_a, from_b), (4, 1));
    Ok(())
}
