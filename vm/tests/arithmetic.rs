mod common;

use avm2::Vm;
use bytecode::Instruction;
use object::Atom;
use proptest::prelude::*;

fn binary(op: Instruction) -> [Instruction; 4] {
    [
        Instruction::GetLocal { reg: 1 },
        Instruction::GetLocal { reg: 2 },
        op,
        Instruction::ReturnValue,
    ]
}

fn arithmetic_vm() -> Vm {
    let unit = common::functions_unit(&[
        ("add", 2, &binary(Instruction::Add)),
        ("sub", 2, &binary(Instruction::Subtract)),
        ("mul", 2, &binary(Instruction::Multiply)),
        ("same", 2, &binary(Instruction::StrictEquals)),
    ]);
    let mut vm = common::vm();
    vm.run_file(&unit).unwrap();
    vm
}

fn apply(vm: &mut Vm, name: &str, a: Atom, b: Atom) -> Atom {
    let f = vm.get_definition(name).unwrap();
    vm.call(&f, Atom::Null, &[a, b]).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn int_arithmetic_matches_doubles(a in any::<i32>(), b in any::<i32>()) {
        let mut vm = arithmetic_vm();
        let (x, y) = (f64::from(a), f64::from(b));
        for (name, expected) in [("add", x + y), ("sub", x - y), ("mul", x * y)] {
            let result = apply(&mut vm, name, Atom::Int(a), Atom::Int(b));
            prop_assert_eq!(result.as_f64(), Some(expected), "{}", name);
        }
    }

    #[test]
    fn values_are_strictly_equal_to_themselves(n in any::<f64>()) {
        let mut vm = arithmetic_vm();
        let atom = Atom::from_number(n);
        let result = apply(&mut vm, "same", atom.clone(), atom);
        prop_assert!(matches!(result, Atom::Bool(same) if same != n.is_nan()));
    }
}
