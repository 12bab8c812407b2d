#![cfg(feature = "native")]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use avm2::codegen::{Backend, CompileRequest, CompiledMethod, InterpreterOnly, NativeBackend};
use avm2::{Vm, VmSettings};
use bytecode::{
    AbcFile, BytecodeBuilder, Condition, Instruction, MethodInfo, Op, TraitInfo, UnitBuilder,
};
use object::Atom;
use proptest::prelude::*;

/// Counts the methods its inner backend agreed to compile.
struct Counting {
    inner: NativeBackend,
    compiled: Arc<AtomicUsize>,
}

impl Backend for Counting {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn compile(&mut self, request: &CompileRequest<'_>) -> Option<CompiledMethod> {
        let compiled = self.inner.compile(request);
        if compiled.is_some() {
            self.compiled.fetch_add(1, Ordering::Relaxed);
        }
        compiled
    }
}

fn binary(op: Instruction) -> Vec<u8> {
    common::code(&[
        Instruction::GetLocal { reg: 1 },
        Instruction::GetLocal { reg: 2 },
        op,
        Instruction::ReturnValue,
    ])
}

/// `return test(a, b) ? 1 : 2`, where `test` either branches directly or
/// computes a boolean that `iftrue` consumes.
fn branch(test: Result<Condition, Instruction>) -> Vec<u8> {
    let mut b = BytecodeBuilder::new();
    let taken = b.new_label();
    b.emit(&Instruction::GetLocal { reg: 1 }).unwrap();
    b.emit(&Instruction::GetLocal { reg: 2 }).unwrap();
    match test {
        Ok(cond) => b.branch(cond.op(), taken),
        Err(compare) => {
            b.emit(&compare).unwrap();
            b.branch(Op::IfTrue, taken);
        }
    }
    b.emit(&Instruction::PushByte { value: 2 }).unwrap();
    b.emit(&Instruction::ReturnValue).unwrap();
    b.bind(taken);
    b.emit(&Instruction::PushByte { value: 1 }).unwrap();
    b.emit(&Instruction::ReturnValue).unwrap();
    b.finish().unwrap()
}

/// Every function takes `(a, b)` and returns a `Number`. The `*i`
/// functions declare `int` parameters, the rest `Number`.
fn numeric_unit() -> AbcFile {
    let mut u = UnitBuilder::new();
    let int = u.public_name("int");
    let number = u.public_name("Number");
    let bodies: Vec<(&str, u32, Vec<u8>)> = vec![
        ("addi", int, binary(Instruction::AddI)),
        ("subi", int, binary(Instruction::SubtractI)),
        ("muli", int, binary(Instruction::MultiplyI)),
        ("add", number, binary(Instruction::Add)),
        ("div", number, binary(Instruction::Divide)),
        ("le", number, branch(Err(Instruction::LessEquals))),
        ("eq", number, branch(Err(Instruction::StrictEquals))),
        ("lt", number, branch(Ok(Condition::Lt))),
        ("nlt", number, branch(Ok(Condition::NotLt))),
        ("ne", number, branch(Ok(Condition::Ne))),
        (
            "neg",
            number,
            common::code(&[
                Instruction::GetLocal { reg: 1 },
                Instruction::Negate,
                Instruction::GetLocal { reg: 2 },
                Instruction::Multiply,
                Instruction::ReturnValue,
            ]),
        ),
    ];
    let mut traits = Vec::new();
    for (name, param, code) in bodies {
        let name_index = u.string(name);
        let method = u.function_with(
            MethodInfo {
                params: vec![param, param],
                return_type: number,
                name: name_index,
                ..MethodInfo::default()
            },
            3,
            code,
            Vec::new(),
        );
        let export = u.public_name(name);
        traits.push(TraitInfo::method(export, method));
    }
    common::entry_script(&mut u, &[], traits);
    u.finish()
}

const FUNCTIONS: [&str; 11] = [
    "addi", "subi", "muli", "add", "div", "le", "eq", "lt", "nlt", "ne", "neg",
];

fn interpreted() -> Vm {
    let mut vm = Vm::with_backend(VmSettings::default(), Box::new(InterpreterOnly)).unwrap();
    vm.run_file(&numeric_unit()).unwrap();
    vm
}

fn native() -> (Vm, Arc<AtomicUsize>) {
    let compiled = Arc::new(AtomicUsize::new(0));
    let backend = Counting {
        inner: NativeBackend::new().unwrap(),
        compiled: Arc::clone(&compiled),
    };
    let mut vm = Vm::with_backend(VmSettings::default(), Box::new(backend)).unwrap();
    vm.run_file(&numeric_unit()).unwrap();
    (vm, compiled)
}

fn apply(vm: &mut Vm, name: &str, a: f64, b: f64) -> f64 {
    let f = vm.get_definition(name).unwrap();
    let result = vm
        .call(&f, Atom::Null, &[Atom::from_number(a), Atom::from_number(b)])
        .unwrap();
    result.as_f64().unwrap()
}

/// Equal bit for bit, except that any NaN matches any other.
fn same_number(x: f64, y: f64) -> bool {
    (x.is_nan() && y.is_nan()) || x.to_bits() == y.to_bits()
}

fn assert_parity(a: f64, b: f64) -> Result<(), TestCaseError> {
    let mut slow = interpreted();
    let (mut fast, compiled) = native();
    for name in FUNCTIONS {
        let expected = apply(&mut slow, name, a, b);
        let actual = apply(&mut fast, name, a, b);
        prop_assert!(
            same_number(expected, actual),
            "{}({}, {}): interpreter {} native {}",
            name,
            a,
            b,
            expected,
            actual
        );
    }
    prop_assert_eq!(compiled.load(Ordering::Relaxed), FUNCTIONS.len());
    Ok(())
}

fn edge_number() -> impl Strategy<Value = f64> {
    prop_oneof![
        Just(0.0),
        Just(-0.0),
        Just(f64::NAN),
        Just(f64::INFINITY),
        Just(f64::NEG_INFINITY),
        Just(f64::from(i32::MAX)),
        Just(f64::from(i32::MIN)),
        any::<i32>().prop_map(f64::from),
        any::<f64>(),
    ]
}

#[test]
fn every_body_compiles_natively() {
    let (mut vm, compiled) = native();
    for name in FUNCTIONS {
        apply(&mut vm, name, 1.0, 2.0);
    }
    assert_eq!(compiled.load(Ordering::Relaxed), FUNCTIONS.len());
}

#[test]
fn int_bodies_wrap_like_the_interpreter() {
    assert_parity(f64::from(i32::MAX), 1.0).unwrap();
    assert_parity(f64::from(i32::MIN), -1.0).unwrap();
    assert_parity(65_536.0, 65_536.0).unwrap();
}

#[test]
fn nan_comparisons_match() {
    let (mut vm, _) = native();
    assert_eq!(apply(&mut vm, "lt", f64::NAN, 1.0), 2.0);
    assert_eq!(apply(&mut vm, "nlt", f64::NAN, 1.0), 1.0);
    assert_eq!(apply(&mut vm, "ne", f64::NAN, f64::NAN), 1.0);
    assert_eq!(apply(&mut vm, "eq", f64::NAN, f64::NAN), 2.0);
    assert_parity(f64::NAN, 1.0).unwrap();
    assert_parity(1.0, f64::NAN).unwrap();
}

#[test]
fn negative_zero_survives_both_backends() {
    let (mut vm, _) = native();
    assert!(apply(&mut vm, "neg", 0.0, 1.0).is_sign_negative());
    assert!(apply(&mut vm, "div", 1.0, -0.0).is_sign_negative());
    assert_parity(0.0, 1.0).unwrap();
    assert_parity(-0.0, -0.0).unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn native_results_match_the_interpreter(a in edge_number(), b in edge_number()) {
        assert_parity(a, b)?;
    }
}
