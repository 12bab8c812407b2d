mod common;

use std::{sync::atomic::Ordering, thread, time::Duration};

use avm2::{Vm, VmError, VmSettings};
use bytecode::{AbcFile, BytecodeBuilder, ExceptionInfo, Instruction, MethodInfo, TraitInfo, UnitBuilder};
use object::Atom;

/// A function whose whole `body` is covered by one handler of type
/// `exc_type` (0 catches everything) running `handler`.
fn guarded(
    u: &mut UnitBuilder,
    name: &str,
    body: &[Instruction],
    handler: &[Instruction],
    exc_type: u32,
) -> u32 {
    let mut b = BytecodeBuilder::new();
    for inst in body {
        b.emit(inst).unwrap();
    }
    let end = b.current_offset();
    for inst in handler {
        b.emit(inst).unwrap();
    }
    let name = u.string(name);
    u.function_with(
        MethodInfo {
            name,
            ..MethodInfo::default()
        },
        1,
        b.finish().unwrap(),
        vec![ExceptionInfo {
            from: 0,
            to: end,
            target: end,
            exc_type,
            var_name: 0,
        }],
    )
}

/// `spin`: an endless loop.
fn spin_code() -> Vec<u8> {
    let mut b = BytecodeBuilder::new();
    let top = b.here();
    b.emit(&Instruction::Nop).unwrap();
    b.jump(top);
    b.finish().unwrap()
}

fn finish(mut u: UnitBuilder, exports: &[(&str, u32)]) -> AbcFile {
    let traits = exports
        .iter()
        .map(|(name, method)| TraitInfo::method(u.public_name(name), *method))
        .collect();
    common::entry_script(&mut u, &[], traits);
    u.finish()
}

fn call(vm: &mut Vm, name: &str) -> Result<Atom, VmError> {
    let f = vm.get_definition(name)?;
    vm.call(&f, Atom::Null, &[])
}

// ── Handlers ──────────────────────────────────────────────────────────

#[test]
fn catch_all_receives_the_thrown_value() {
    let mut u = UnitBuilder::new();
    let f = guarded(
        &mut u,
        "f",
        &[Instruction::PushByte { value: 7 }, Instruction::Throw],
        &[Instruction::ReturnValue],
        0,
    );
    let mut vm = common::vm();
    vm.run_file(&finish(u, &[("f", f)])).unwrap();
    assert!(matches!(call(&mut vm, "f").unwrap(), Atom::Int(7)));
}

#[test]
fn typed_handler_catches_runtime_errors() {
    let mut u = UnitBuilder::new();
    let x = u.public_name("x");
    let error_id = u.public_name("errorID");
    let type_error = u.public_name("TypeError");
    let f = guarded(
        &mut u,
        "f",
        &[
            Instruction::PushNull,
            Instruction::GetProperty { name: x },
            Instruction::ReturnValue,
        ],
        &[Instruction::GetProperty { name: error_id }, Instruction::ReturnValue],
        type_error,
    );
    let mut vm = common::vm();
    vm.run_file(&finish(u, &[("f", f)])).unwrap();
    assert!(matches!(call(&mut vm, "f").unwrap(), Atom::Int(1009)));
}

#[test]
fn handler_of_another_type_lets_the_error_escape() {
    let mut u = UnitBuilder::new();
    let boom = u.string("boom");
    let type_error = u.public_name("TypeError");
    let f = guarded(
        &mut u,
        "f",
        &[Instruction::PushString { index: boom }, Instruction::Throw],
        &[Instruction::PushTrue, Instruction::ReturnValue],
        type_error,
    );
    let mut vm = common::vm();
    vm.run_file(&finish(u, &[("f", f)])).unwrap();
    let err = call(&mut vm, "f").unwrap_err();
    assert!(matches!(err, VmError::Script(Atom::String(_))));
}

#[test]
fn errors_unwind_through_callees_to_the_caller() {
    let mut u = UnitBuilder::new();
    let thrower_name = u.public_name("thrower");
    let thrower = common::function(
        &mut u,
        "thrower",
        0,
        &[Instruction::PushByte { value: 3 }, Instruction::Throw],
    );
    let f = guarded(
        &mut u,
        "f",
        &[
            Instruction::FindPropStrict { name: thrower_name },
            Instruction::CallProperty {
                name: thrower_name,
                argc: 0,
            },
            Instruction::ReturnValue,
        ],
        &[Instruction::ReturnValue],
        0,
    );
    let mut vm = common::vm();
    vm.run_file(&finish(u, &[("thrower", thrower), ("f", f)])).unwrap();
    assert!(matches!(call(&mut vm, "f").unwrap(), Atom::Int(3)));
}

// ── Resource policies ─────────────────────────────────────────────────

#[test]
fn recursion_overflow_cannot_be_caught() {
    let mut u = UnitBuilder::new();
    let recurse_name = u.public_name("recurse");
    let recurse = guarded(
        &mut u,
        "recurse",
        &[
            Instruction::GetLocal { reg: 0 },
            Instruction::CallProperty {
                name: recurse_name,
                argc: 0,
            },
            Instruction::ReturnValue,
        ],
        &[Instruction::ReturnValue],
        0,
    );
    let ok = common::function(&mut u, "ok", 0, &[Instruction::PushTrue, Instruction::ReturnValue]);
    let mut vm = common::vm_with(VmSettings {
        max_recursion: 32,
        ..VmSettings::default()
    });
    vm.run_file(&finish(u, &[("recurse", recurse), ("ok", ok)])).unwrap();

    let err = call(&mut vm, "recurse").unwrap_err();
    assert!(matches!(err, VmError::ResourceExhausted { code: 1023, .. }), "{err:?}");
    assert_eq!(vm.describe_uncaught(&err).unwrap().class_name, "RangeError");
    // The whole chain unwound; the VM is usable again.
    assert!(matches!(call(&mut vm, "ok").unwrap(), Atom::Bool(true)));
}

#[test]
fn instruction_budget_stops_endless_loops() {
    let mut u = UnitBuilder::new();
    let spin = u.function("spin", 0, 1, spin_code());
    let ok = common::function(&mut u, "ok", 0, &[Instruction::PushTrue, Instruction::ReturnValue]);
    let mut vm = common::vm_with(VmSettings {
        instruction_budget: Some(10_000),
        ..VmSettings::default()
    });
    vm.run_file(&finish(u, &[("spin", spin), ("ok", ok)])).unwrap();

    let err = call(&mut vm, "spin").unwrap_err();
    assert!(matches!(err, VmError::ResourceExhausted { code: 1502, .. }), "{err:?}");
    let described = vm.describe_uncaught(&err).unwrap();
    assert_eq!(described.class_name, "ScriptTimeoutError");
    // Each host entry starts with a fresh budget.
    assert!(matches!(call(&mut vm, "ok").unwrap(), Atom::Bool(true)));
}

#[test]
fn raised_cancel_flag_refuses_calls() {
    let mut u = UnitBuilder::new();
    let ok = common::function(&mut u, "ok", 0, &[Instruction::PushTrue, Instruction::ReturnValue]);
    let mut vm = common::vm();
    vm.run_file(&finish(u, &[("ok", ok)])).unwrap();

    let cancel = vm.cancel_flag();
    cancel.store(true, Ordering::Relaxed);
    let err = call(&mut vm, "ok").unwrap_err();
    assert!(matches!(err, VmError::Cancelled));
    assert!(vm.describe_uncaught(&err).is_none());

    cancel.store(false, Ordering::Relaxed);
    assert!(matches!(call(&mut vm, "ok").unwrap(), Atom::Bool(true)));
}

#[test]
fn cancel_from_another_thread_stops_a_running_loop() {
    let mut u = UnitBuilder::new();
    let spin = u.function("spin", 0, 1, spin_code());
    let mut vm = common::vm();
    vm.run_file(&finish(u, &[("spin", spin)])).unwrap();

    let cancel = vm.cancel_flag();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        cancel.store(true, Ordering::Relaxed);
    });
    let err = call(&mut vm, "spin").unwrap_err();
    stopper.join().unwrap();
    assert!(matches!(err, VmError::Cancelled));
}
