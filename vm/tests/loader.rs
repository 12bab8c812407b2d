mod common;

use std::{cell::RefCell, rc::Rc};

use avm2::{VmError, VmSettings};
use bytecode::{
    ClassInfo, InstanceInfo, Instruction, MethodBody, MethodInfo, TraitInfo, UnitBuilder,
    read_abc, write_abc,
};
use object::Atom;

/// Two scripts: a library defining `counter` (set to 42 by its
/// initializer, which also traces "library") and an empty entry script.
fn library_unit() -> bytecode::AbcFile {
    let mut u = UnitBuilder::new();
    let counter = u.public_name("counter");
    let int = u.public_name("int");
    let trace = u.public_name("trace");
    let library = u.string("library");
    let init = common::function(
        &mut u,
        "",
        0,
        &[
            Instruction::GetLocal { reg: 0 },
            Instruction::PushScope,
            Instruction::FindPropStrict { name: trace },
            Instruction::PushString { index: library },
            Instruction::CallPropVoid { name: trace, argc: 1 },
            Instruction::GetLocal { reg: 0 },
            Instruction::PushByte { value: 42 },
            Instruction::SetProperty { name: counter },
            Instruction::ReturnVoid,
        ],
    );
    u.script(init, vec![TraitInfo::slot(counter, 1, int, None)]);
    common::entry_script(&mut u, &[], Vec::new());
    u.finish()
}

fn traced(vm: &mut avm2::Vm) -> Rc<RefCell<Vec<String>>> {
    let lines = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&lines);
    vm.set_trace_output(move |text| sink.borrow_mut().push(text.to_owned()));
    lines
}

// ── Lazy initialization ───────────────────────────────────────────────

#[test]
fn library_scripts_run_on_first_lookup() {
    let mut vm = common::vm();
    let lines = traced(&mut vm);
    let unit = vm.load(&library_unit()).unwrap();
    vm.run_entry(unit).unwrap();
    assert!(lines.borrow().is_empty());

    assert!(matches!(vm.get_definition("counter").unwrap(), Atom::Int(42)));
    assert!(matches!(vm.get_definition("counter").unwrap(), Atom::Int(42)));
    assert_eq!(*lines.borrow(), vec!["library".to_owned()]);
}

#[test]
fn entry_script_runs_once() {
    let mut vm = common::vm();
    let lines = traced(&mut vm);
    let mut u = UnitBuilder::new();
    let trace = u.public_name("trace");
    let hello = u.string("hello");
    common::entry_script(
        &mut u,
        &[
            Instruction::FindPropStrict { name: trace },
            Instruction::PushString { index: hello },
            Instruction::CallPropVoid { name: trace, argc: 1 },
        ],
        Vec::new(),
    );
    let unit = vm.load(&u.finish()).unwrap();
    vm.run_entry(unit).unwrap();
    vm.run_entry(unit).unwrap();
    assert_eq!(*lines.borrow(), vec!["hello".to_owned()]);
}

// ── Verification ──────────────────────────────────────────────────────

#[test]
fn duplicate_definitions_reject_the_later_unit() {
    let mut vm = common::vm();
    vm.load(&library_unit()).unwrap();
    let err = vm.load(&library_unit()).unwrap_err();
    assert!(matches!(err, VmError::Verify { .. }), "{err:?}");
}

#[test]
fn rejected_units_install_nothing() {
    let mut u = UnitBuilder::new();
    let ghost = u.public_name("ghost");
    let method = common::function(
        &mut u,
        "ghost",
        0,
        &[Instruction::PushString { index: 999 }, Instruction::ReturnValue],
    );
    common::entry_script(&mut u, &[], vec![TraitInfo::method(ghost, method)]);

    let mut vm = common::vm();
    let err = vm.load(&u.finish()).unwrap_err();
    assert!(matches!(err, VmError::Verify { code: 1032, .. }), "{err:?}");

    let err = vm.get_definition("ghost").unwrap_err();
    let described = vm.describe_uncaught(&err).unwrap();
    assert_eq!(described.class_name, "ReferenceError");
    assert_eq!(described.error_id, Some(1065));
}

fn verify_code(err: &VmError) -> u32 {
    match err {
        VmError::Verify { code, .. } => *code,
        other => panic!("expected a verify error, got {other:?}"),
    }
}

fn assert_undefined(vm: &mut avm2::Vm, name: &str) {
    let err = vm.get_definition(name).unwrap_err();
    let described = vm.describe_uncaught(&err).unwrap();
    assert_eq!(described.error_id, Some(1065), "{name} should not be defined");
}

#[test]
fn slot_ids_beyond_the_trait_list_fail_the_load() {
    for slot_id in [u32::MAX, 0x0800_0000, 2] {
        let mut u = UnitBuilder::new();
        let x = u.public_name("x");
        common::entry_script(&mut u, &[], vec![TraitInfo::slot(x, slot_id, 0, None)]);

        let mut vm = common::vm();
        let err = vm.load(&u.finish()).unwrap_err();
        assert_eq!(verify_code(&err), 1107, "slot id {slot_id}");
        assert_undefined(&mut vm, "x");
    }
}

#[test]
fn oversized_frames_fail_the_load() {
    let mut u = UnitBuilder::new();
    let init = u.function("", 0, u32::MAX, common::code(&[Instruction::ReturnVoid]));
    u.script(init, Vec::new());
    let mut vm = common::vm();
    assert_eq!(verify_code(&vm.load(&u.finish()).unwrap_err()), 1107);

    let mut u = UnitBuilder::new();
    let method = u.method(MethodInfo::default());
    u.body(MethodBody {
        method,
        max_stack: u32::MAX,
        local_count: 1,
        init_scope_depth: 0,
        max_scope_depth: 1,
        code: common::code(&[Instruction::ReturnVoid]),
        exceptions: Vec::new(),
        traits: Vec::new(),
    });
    u.script(method, Vec::new());
    assert_eq!(verify_code(&vm.load(&u.finish()).unwrap_err()), 1107);
}

#[test]
fn frame_limit_follows_the_settings() {
    let unit = || {
        let mut u = UnitBuilder::new();
        let init = u.function("", 0, 300, common::code(&[Instruction::ReturnVoid]));
        u.script(init, Vec::new());
        u.finish()
    };
    let mut small = common::vm_with(VmSettings {
        max_frame_size: 256,
        ..VmSettings::default()
    });
    assert_eq!(verify_code(&small.load(&unit()).unwrap_err()), 1107);
    common::vm().run_file(&unit()).unwrap();
}

#[test]
fn conflicting_class_traits_fail_the_load() {
    let mut u = UnitBuilder::new();
    let object = u.public_name("Object");
    let c = u.public_name("C");
    let x = u.public_name("x");
    let iinit = common::function(&mut u, "C", 0, &[Instruction::ReturnVoid]);
    let cinit = common::function(&mut u, "", 0, &[Instruction::ReturnVoid]);
    let class = u.class(
        InstanceInfo {
            name: c,
            super_name: object,
            init: iinit,
            traits: vec![TraitInfo::slot(x, 1, 0, None), TraitInfo::slot(x, 2, 0, None)],
            ..InstanceInfo::default()
        },
        ClassInfo {
            init: cinit,
            traits: Vec::new(),
        },
    );
    common::entry_script(
        &mut u,
        &[
            Instruction::GetLocal { reg: 0 },
            Instruction::GetLex { name: object },
            Instruction::NewClass { class },
            Instruction::InitProperty { name: c },
        ],
        vec![TraitInfo::class(c, 1, class)],
    );

    let mut vm = common::vm();
    assert_eq!(verify_code(&vm.load(&u.finish()).unwrap_err()), 1107);
    assert_undefined(&mut vm, "C");
}

#[test]
fn units_survive_the_abc_encoding() {
    let bytes = write_abc(&common::point_unit());
    let file = read_abc(&bytes).unwrap();
    let mut vm = common::vm();
    vm.run_file(&file).unwrap();
    let class = vm.get_definition("Point").unwrap();
    let p = vm.construct(&class, &[Atom::Int(5), Atom::Int(6)]).unwrap();
    let y = vm.public_name("y");
    assert!(matches!(vm.get_property(&p, &y).unwrap(), Atom::Int(6)));
}

#[test]
fn listing_names_classes_and_methods() {
    let mut vm = common::vm();
    let unit = vm.load(&common::point_unit()).unwrap();
    let text = vm.disassemble(unit).unwrap();
    assert!(text.contains("Point constructor"), "{text}");
    assert!(text.contains("Point/add"), "{text}");
    assert!(text.contains("newclass"), "{text}");
}
