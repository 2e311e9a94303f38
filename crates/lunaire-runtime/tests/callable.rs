//! Comptabilité des handles natifs d'un `CallableHandle`.

use lunaire_runtime::prelude::*;
use proptest::prelude::*;

struct Token;
impl UserData for Token {}

#[derive(Debug, Clone)]
enum Arg {
    Int(i64),
    Text(String),
    Func,
    Obj,
    List(Vec<Arg>),
}

fn arg() -> impl Strategy<Value = Arg> {
    let leaf = prop_oneof![
        any::<i32>().prop_map(|i| Arg::Int(i64::from(i))),
        "[a-z]{0,8}".prop_map(Arg::Text),
        Just(Arg::Func),
        Just(Arg::Obj),
    ];
    leaf.prop_recursive(2, 8, 4, |inner| prop::collection::vec(inner, 0..4).prop_map(Arg::List))
}

/// Handles qu'un argument doit allouer.
fn expected_handles(arg: &Arg) -> usize {
    match arg {
        Arg::Int(_) | Arg::Text(_) => 0,
        Arg::Func | Arg::Obj => 1,
        Arg::List(items) => items.iter().map(expected_handles).sum(),
    }
}

fn build(vm: &Vm, arg: &Arg) -> Value {
    match arg {
        Arg::Int(i) => Value::Integer(*i),
        Arg::Text(s) => Value::from(s.as_str()),
        Arg::Func => Value::Function(HostFunction::new("nop", |_| Ok(Value::Nil))),
        Arg::Obj => vm.bridge().create_object(Token).unwrap(),
        Arg::List(items) => Value::List(items.iter().map(|a| build(vm, a)).collect()),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn dispose_releases_the_sum_of_every_call(calls in prop::collection::vec(prop::collection::vec(arg(), 0..4), 0..6)) {
        let mut vm = Vm::with_sinks(Captured::new().sinks()).unwrap();
        prop_assert!(vm.do_text("sink", "function sink(...) return select('#', ...) end").unwrap());
        vm.execute().unwrap();
        let mut handle = vm.global_callable("sink").unwrap().unwrap();

        let mut total = 0usize;
        for call in &calls {
            let args: Vec<Value> = call.iter().map(|a| build(&vm, a)).collect();
            total += call.iter().map(expected_handles).sum::<usize>();
            let count = handle.call_typed::<usize>(&args).unwrap();
            prop_assert_eq!(count, Some(args.len()));
            prop_assert_eq!(handle.handle_count(), total);
        }

        prop_assert_eq!(handle.allocated_handles(), total);
        prop_assert_eq!(handle.dispose(), total);
        prop_assert_eq!(handle.handle_count(), 0);
        prop_assert_eq!(handle.dispose(), 0);
        vm.dispose();
    }
}

#[test]
fn handles_outlive_calls_until_dispose() {
    let cap = Captured::new();
    let mut vm = Vm::with_sinks(cap.sinks()).unwrap();
    vm.do_text("keep", "function keep(f) kept = f end function fire() return kept() end").unwrap();
    vm.execute().unwrap();

    let mut keep = vm.global_callable("keep").unwrap().unwrap();
    keep.call(&[Value::Function(HostFunction::new("seven", |_| Ok(Value::Integer(7))))]).unwrap();

    let mut fire = vm.global_callable("fire").unwrap().unwrap();
    assert_eq!(fire.call_typed::<u8>(&[]).unwrap(), Some(7));
    assert_eq!(keep.dispose(), 1);
    // La fonction reste joignable par la globale `kept` : le handle ne
    // garantissait que l'ancrage, pas la seule référence.
    assert_eq!(fire.call_typed::<u8>(&[]).unwrap(), Some(7));
}

#[test]
fn handle_after_vm_dispose_reports_disposed() {
    let mut vm = Vm::with_sinks(Captured::new().sinks()).unwrap();
    vm.do_text("f", "function f() return 1 end").unwrap();
    vm.execute().unwrap();
    let mut f = vm.global_callable("f").unwrap().unwrap();
    vm.dispose();
    assert!(matches!(f.call(&[]), Err(HostError::Disposed)));
    assert_eq!(f.dispose(), 0);
}

#[test]
fn script_callables_reach_host_functions() {
    let mut vm = Vm::with_sinks(Captured::new().sinks()).unwrap();
    vm.bridge()
        .push_function(
            "twice",
            HostFunction::new("twice", |args| {
                let mut args = args.into_iter();
                match args.next() {
                    Some(Value::Callable(mut cb)) => {
                        let a = cb.call_typed::<i64>(&[Value::Integer(1)])?.unwrap_or_default();
                        let b = cb.call_typed::<i64>(&[Value::Integer(2)])?.unwrap_or_default();
                        Ok(Value::Integer(a + b))
                    }
                    other => Err(HostError::type_mismatch("callable", format!("{other:?}"))),
                }
            }),
        )
        .unwrap();
    vm.do_text("cb", "result = twice(function(x) return x * 10 end)").unwrap();
    vm.execute().unwrap();
    assert_eq!(vm.global("result").unwrap(), Value::Integer(30));
}
