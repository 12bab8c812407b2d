mod common;

use avm2::Vm;
use object::Atom;

fn new_object(vm: &mut Vm) -> Atom {
    let class = vm.get_definition("Object").unwrap();
    vm.construct(&class, &[]).unwrap()
}

#[test]
fn last_handle_finalizes_once() {
    let mut vm = common::vm();
    let object = new_object(&mut vm);
    let before = vm.heap_stats();

    let copies: Vec<Atom> = (0..16).map(|_| object.clone()).collect();
    drop(copies);
    assert_eq!(vm.heap_stats().finalized, before.finalized);

    drop(object);
    let after = vm.heap_stats();
    assert_eq!(after.finalized, before.finalized + 1);
    assert_eq!(after.live, before.live - 1);
}

#[test]
fn unreachable_cycles_are_collected() {
    let mut vm = common::vm();
    let other = vm.public_name("other");
    vm.collect_cycles();
    let baseline = vm.heap_stats().live;

    let a = new_object(&mut vm);
    let b = new_object(&mut vm);
    vm.set_property(&a, &other, b.clone()).unwrap();
    vm.set_property(&b, &other, a.clone()).unwrap();
    drop((a, b));
    assert_eq!(vm.heap_stats().live, baseline + 2);

    let report = vm.collect_cycles();
    assert!(report.reclaimed >= 2, "{report:?}");
    assert_eq!(vm.heap_stats().live, baseline);
}

#[test]
fn reachable_cycles_survive_collection() {
    let mut vm = common::vm();
    let other = vm.public_name("other");
    let a = new_object(&mut vm);
    let b = new_object(&mut vm);
    vm.set_property(&a, &other, b.clone()).unwrap();
    vm.set_property(&b, &other, a.clone()).unwrap();
    drop(b);

    vm.collect_cycles();
    let b = vm.get_property(&a, &other).unwrap();
    let back = vm.get_property(&b, &other).unwrap();
    assert!(back.strict_equals(&a));
}
