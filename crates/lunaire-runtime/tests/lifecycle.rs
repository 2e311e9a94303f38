//! Cycle de vie de la VM vu de l'extérieur.

use lunaire_core::{Releases, LOAD_ERROR_DIAGNOSTIC};
use lunaire_runtime::prelude::*;
use pretty_assertions::assert_eq;

fn vm() -> (Vm, Captured) {
    let cap = Captured::new();
    (Vm::with_sinks(cap.sinks()).unwrap(), cap)
}

#[test]
fn second_load_fails_and_keeps_first_chunk() {
    let (mut vm, cap) = vm();
    assert!(vm.do_text("first", "print('premier')").unwrap());
    let other = {
        let (mut scratch, _) = self::vm();
        scratch.compile("print('second')").unwrap()
    };

    assert!(matches!(vm.load("second", &other), Err(HostError::AlreadyLoaded)));
    assert_eq!(vm.chunk_name(), Some("first"));
    vm.execute().unwrap();
    assert_eq!(cap.lines(Channel::Print), vec!["premier".to_string()]);
}

#[test]
fn execute_before_load_is_rejected() {
    let (mut vm, cap) = vm();
    assert!(matches!(vm.execute(), Err(HostError::NotLoaded)));
    assert_eq!(vm.lifecycle().executions(), 0);
    assert!(cap.is_empty());
}

#[test]
fn invalid_source_releases_config_exactly_once() {
    let (mut vm, _cap) = vm();
    assert!(matches!(vm.do_text("bad", "function (("), Err(HostError::Compile { .. })));
    assert_eq!(vm.state(), VmState::Released);

    assert_eq!(vm.dispose(), Releases { interpreter: 1, config: 0 });
    assert_eq!(vm.dispose(), Releases::NONE);
    assert_eq!(vm.lifecycle().releases(), Releases { interpreter: 1, config: 1 });
    assert_eq!(vm.state(), VmState::Disposed);
}

#[test]
fn rejected_bytecode_reports_and_releases_everything() {
    let (mut vm, cap) = vm();
    assert!(!vm.do_compiled("garbage", &[0xFF, 0x00, 0x01, 0x02]).unwrap());
    assert_eq!(cap.lines(Channel::Error), vec![LOAD_ERROR_DIAGNOSTIC.to_string()]);
    assert_eq!(vm.lifecycle().releases(), Releases { interpreter: 1, config: 1 });

    assert!(matches!(vm.execute(), Err(HostError::NotLoaded)));
    assert!(matches!(vm.load("again", &[0xFF]), Err(HostError::Released)));
    assert_eq!(vm.dispose(), Releases::NONE);
}

#[test]
fn compiler_error_payload_is_refused_before_the_interpreter() {
    let (mut vm, cap) = vm();
    let mut payload = vec![0u8];
    payload.extend_from_slice(b":1: Incomplete statement");
    assert!(!vm.load("payload", &payload).unwrap());
    assert_eq!(cap.lines(Channel::Error), vec![LOAD_ERROR_DIAGNOSTIC.to_string()]);
}

#[test]
fn valid_source_reaches_error_sink_only_at_runtime() {
    let (mut vm, cap) = vm();
    assert!(vm.do_text("runtime", "local t = nil\nprint('avant')\nlocal _ = t.champ").unwrap());
    assert!(cap.values(Channel::Error).is_empty());

    vm.execute().unwrap();
    assert_eq!(cap.lines(Channel::Print), vec!["avant".to_string()]);
    assert_eq!(
        cap.lines(Channel::Error),
        vec![r#"[string "runtime"]:3: attempt to index nil with 'champ'"#.to_string()]
    );
    assert_eq!(vm.state(), VmState::Loaded);
}

#[test]
fn do_file_missing_path_fails_before_compiling() {
    let (mut vm, cap) = vm();
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.luau");

    match vm.do_file(&missing) {
        Err(HostError::FileNotFound { path }) => assert_eq!(path, missing),
        other => panic!("attendu FileNotFound, reçu {other:?}"),
    }
    assert_eq!(vm.lifecycle().compilations(), 0);
    assert_eq!(vm.state(), VmState::Created);
    assert!(cap.is_empty());
}

#[test]
fn do_file_uses_base_name_as_chunk_name() {
    let (mut vm, cap) = vm();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("salut.luau");
    std::fs::write(&path, "print('depuis un fichier')").unwrap();

    assert!(vm.do_file(&path).unwrap());
    assert_eq!(vm.chunk_name(), Some("salut.luau"));
    vm.execute().unwrap();
    assert_eq!(cap.lines(Channel::Print), vec!["depuis un fichier".to_string()]);
}

#[test]
fn disposed_vm_rejects_everything() {
    let (mut vm, _cap) = vm();
    vm.dispose();
    assert!(matches!(vm.compile("return 1"), Err(HostError::Disposed)));
    assert!(matches!(vm.global("x"), Err(HostError::Disposed)));
    assert!(matches!(vm.bridge().get_value(mlua_nil()), Err(HostError::Disposed)));
}

fn mlua_nil() -> lunaire_runtime::mlua::Value { lunaire_runtime::mlua::Value::Nil }
