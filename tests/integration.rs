//! End-to-end scenarios (`spec.md` §8). Every scenario runs against both
//! compiler backends — agreement between them is the strongest oracle this
//! crate has, short of a full spec test suite.

use wasmforge::{Backend, Config, Engine, Error, ImportsBuilder, TrapCode, TrapError, Value};

fn engines() -> [Engine; 2] {
    [
        Engine::new(Config::default().with_backend(Backend::High)),
        Engine::new(Config::default().with_backend(Backend::Low)),
    ]
}

fn instantiate(engine: &Engine, wat: &str) -> wasmforge::Instance {
    let wasm = wat::parse_str(wat).expect("valid wat");
    let module = engine.compile(&wasm).expect("module compiles");
    engine
        .instantiate(module, &ImportsBuilder::new())
        .expect("instantiation succeeds")
}

#[test]
fn add() {
    let wat = r#"
        (module
            (func (export "add") (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.add))
    "#;
    for engine in engines() {
        let instance = instantiate(&engine, wat);
        let result = instance
            .invoke_export("add", &[Value::I32(7), Value::I32(5)], &mut wasmforge::NopExternals)
            .unwrap();
        assert_eq!(result, Some(Value::I32(12)));
    }
}

#[test]
fn fibonacci() {
    let wat = r#"
        (module
            (func (export "fib") (param i32) (result i32)
                local.get 0
                i32.const 2
                i32.lt_s
                if (result i32)
                    local.get 0
                else
                    local.get 0
                    i32.const 1
                    i32.sub
                    call 0
                    local.get 0
                    i32.const 2
                    i32.sub
                    call 0
                    i32.add
                end))
    "#;
    for engine in engines() {
        let instance = instantiate(&engine, wat);
        let result = instance
            .invoke_export("fib", &[Value::I32(10)], &mut wasmforge::NopExternals)
            .unwrap();
        assert_eq!(result, Some(Value::I32(55)));
    }
}

#[test]
fn memory_init() {
    let wat = r#"
        (module
            (memory (export "mem") 1)
            (data (i32.const 100) "Hello"))
    "#;
    for engine in engines() {
        let instance = instantiate(&engine, wat);
        let memory = instance.exported_memory("mem").unwrap();
        let mut buf = [0u8; 5];
        memory.get_into(100, &mut buf).unwrap();
        assert_eq!(&buf, b"Hello");
        memory.get_into(0, &mut buf).unwrap();
        assert_eq!(buf, [0u8; 5]);
    }
}

#[test]
fn trap_on_divide_leaves_instance_usable() {
    let wat = r#"
        (module
            (func (export "div") (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.div_s))
    "#;
    for engine in engines() {
        let instance = instantiate(&engine, wat);
        let mut externals = wasmforge::NopExternals;
        let trapped = instance.invoke_export("div", &[Value::I32(1), Value::I32(0)], &mut externals);
        assert!(matches!(
            trapped,
            Err(Error::Trap(TrapError::Code(TrapCode::DivisionByZero)))
        ));

        let ok = instance
            .invoke_export("div", &[Value::I32(10), Value::I32(2)], &mut externals)
            .unwrap();
        assert_eq!(ok, Some(Value::I32(5)));
    }
}

#[test]
fn brtable_selects_among_four_labels() {
    let wat = r#"
        (module
            (func (export "sel") (param i32) (result i32)
                block $default
                    block $c2
                        block $c1
                            block $c0
                                local.get 0
                                br_table $c0 $c1 $c2 $default
                            end
                            i32.const 10
                            return
                        end
                        i32.const 20
                        return
                    end
                    i32.const 30
                    return
                end
                i32.const 99))
    "#;
    for engine in engines() {
        let instance = instantiate(&engine, wat);
        let mut externals = wasmforge::NopExternals;
        for (arg, expected) in [(0, 10), (1, 20), (2, 30), (7, 99)] {
            let result = instance.invoke_export("sel", &[Value::I32(arg)], &mut externals).unwrap();
            assert_eq!(result, Some(Value::I32(expected)), "sel({arg})");
        }
    }
}

#[test]
fn grow_reports_previous_size_and_fails_past_maximum() {
    let wat = r#"(module (memory (export "mem") 1 2))"#;
    for engine in engines() {
        let instance = instantiate(&engine, wat);
        let memory = instance.exported_memory("mem").unwrap();
        assert_eq!(memory.grow(1), Some(1));
        assert_eq!(memory.current_pages(), 2);
        assert_eq!(memory.grow(1), None);
        assert_eq!(memory.current_pages(), 2);
    }
}
