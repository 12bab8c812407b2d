#![allow(dead_code)]

use avm2::{Vm, VmSettings};
use bytecode::{
    AbcFile, BytecodeBuilder, ClassInfo, InstanceFlags, InstanceInfo, Instruction, MethodInfo,
    TraitInfo, UnitBuilder,
};

pub fn vm() -> Vm {
    Vm::new(VmSettings::default()).unwrap()
}

pub fn vm_with(settings: VmSettings) -> Vm {
    Vm::new(settings).unwrap()
}

pub fn code(insts: &[Instruction]) -> Vec<u8> {
    let mut b = BytecodeBuilder::new();
    for inst in insts {
        b.emit(inst).unwrap();
    }
    b.finish().unwrap()
}

/// A method taking `params` untyped arguments.
pub fn function(u: &mut UnitBuilder, name: &str, params: usize, insts: &[Instruction]) -> u32 {
    u.function(name, params, params as u32 + 1, code(insts))
}

/// An entry script that pushes its global as scope, runs `insts` and
/// returns, exporting `traits`.
pub fn entry_script(u: &mut UnitBuilder, insts: &[Instruction], traits: Vec<TraitInfo>) -> u32 {
    let mut all = vec![Instruction::GetLocal { reg: 0 }, Instruction::PushScope];
    all.extend_from_slice(insts);
    all.push(Instruction::ReturnVoid);
    let init = function(u, "", 0, &all);
    u.script(init, traits)
}

/// A unit exporting free functions, each given as `(name, params, body)`.
pub fn functions_unit(defs: &[(&str, usize, &[Instruction])]) -> AbcFile {
    let mut u = UnitBuilder::new();
    let mut traits = Vec::new();
    for (name, params, body) in defs {
        let method = function(&mut u, name, *params, body);
        traits.push(TraitInfo::method(u.public_name(name), method));
    }
    entry_script(&mut u, &[], traits);
    u.finish()
}

/// ```text
/// class Point {
///     var x:int; var y:int;
///     function Point(x, y) { this.x = x; this.y = y; }
///     function add(p) { return new Point(x + p.x, y + p.y); }
///     function fail() { throw "boom"; }
/// }
/// function isA(value, type) { return value instanceof type; }
/// ```
pub fn point_unit() -> AbcFile {
    let mut u = UnitBuilder::new();
    let int = u.public_name("int");
    let object = u.public_name("Object");
    let point = u.public_name("Point");
    let x = u.public_name("x");
    let y = u.public_name("y");
    let boom = u.string("boom");
    let add_name = u.public_name("add");
    let fail_name = u.public_name("fail");
    let is_a_name = u.public_name("isA");
    let point_string = u.string("Point");

    let iinit = u.function_with(
        MethodInfo {
            params: vec![0, 0],
            name: point_string,
            ..MethodInfo::default()
        },
        3,
        code(&[
            Instruction::GetLocal { reg: 0 },
            Instruction::ConstructSuper { argc: 0 },
            Instruction::GetLocal { reg: 0 },
            Instruction::GetLocal { reg: 1 },
            Instruction::SetProperty { name: x },
            Instruction::GetLocal { reg: 0 },
            Instruction::GetLocal { reg: 2 },
            Instruction::SetProperty { name: y },
            Instruction::ReturnVoid,
        ]),
        Vec::new(),
    );
    let cinit = function(&mut u, "", 0, &[Instruction::ReturnVoid]);
    let add = function(
        &mut u,
        "add",
        1,
        &[
            Instruction::FindPropStrict { name: point },
            Instruction::GetLocal { reg: 0 },
            Instruction::GetProperty { name: x },
            Instruction::GetLocal { reg: 1 },
            Instruction::GetProperty { name: x },
            Instruction::Add,
            Instruction::GetLocal { reg: 0 },
            Instruction::GetProperty { name: y },
            Instruction::GetLocal { reg: 1 },
            Instruction::GetProperty { name: y },
            Instruction::Add,
            Instruction::ConstructProp { name: point, argc: 2 },
            Instruction::ReturnValue,
        ],
    );
    let fail = function(
        &mut u,
        "fail",
        0,
        &[Instruction::PushString { index: boom }, Instruction::Throw],
    );
    let is_a = function(
        &mut u,
        "isA",
        2,
        &[
            Instruction::GetLocal { reg: 1 },
            Instruction::GetLocal { reg: 2 },
            Instruction::InstanceOf,
            Instruction::ReturnValue,
        ],
    );

    let class = u.class(
        InstanceInfo {
            name: point,
            super_name: object,
            flags: InstanceFlags::SEALED,
            init: iinit,
            traits: vec![
                TraitInfo::slot(x, 1, int, None),
                TraitInfo::slot(y, 2, int, None),
                TraitInfo::method(add_name, add),
                TraitInfo::method(fail_name, fail),
            ],
            ..InstanceInfo::default()
        },
        ClassInfo {
            init: cinit,
            traits: Vec::new(),
        },
    );
    entry_script(
        &mut u,
        &[
            Instruction::GetLocal { reg: 0 },
            Instruction::GetLex { name: object },
            Instruction::NewClass { class },
            Instruction::InitProperty { name: point },
        ],
        vec![
            TraitInfo::class(point, 1, class),
            TraitInfo::method(is_a_name, is_a),
        ],
    );
    u.finish()
}
