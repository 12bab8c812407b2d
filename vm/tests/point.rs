mod common;

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use avm2::{Event, EventLoop, EventLoopSettings, Outcome, ShutdownMode, Vm, VmError, VmSettings};
use object::Atom;
use parking_lot::Mutex;

fn int_field(vm: &mut Vm, object: &Atom, name: &str) -> Atom {
    let mn = vm.public_name(name);
    vm.get_property(object, &mn).unwrap()
}

fn new_point(vm: &mut Vm, x: i32, y: i32) -> Atom {
    let class = vm.get_definition("Point").unwrap();
    vm.construct(&class, &[Atom::Int(x), Atom::Int(y)]).unwrap()
}

// ── Host calls ────────────────────────────────────────────────────────

#[test]
fn add_sums_fields() {
    let mut vm = common::vm();
    vm.run_file(&common::point_unit()).unwrap();

    let a = new_point(&mut vm, 1, 2);
    let b = new_point(&mut vm, 3, 4);
    let add = vm.public_name("add");
    let sum = vm.call_property(&a, &add, &[b]).unwrap();

    assert!(matches!(int_field(&mut vm, &sum, "x"), Atom::Int(4)));
    assert!(matches!(int_field(&mut vm, &sum, "y"), Atom::Int(6)));
    // The operands are untouched.
    assert!(matches!(int_field(&mut vm, &a, "x"), Atom::Int(1)));
}

#[test]
fn fields_are_coerced_to_int() {
    let mut vm = common::vm();
    vm.run_file(&common::point_unit()).unwrap();
    let class = vm.get_definition("Point").unwrap();
    let text = vm.new_string("7");
    let p = vm.construct(&class, &[Atom::Number(2.9), text]).unwrap();
    assert!(matches!(int_field(&mut vm, &p, "x"), Atom::Int(2)));
    assert!(matches!(int_field(&mut vm, &p, "y"), Atom::Int(7)));
}

#[test]
fn instances_are_instances_of_their_ancestors() {
    let mut vm = common::vm();
    vm.run_file(&common::point_unit()).unwrap();
    let p = new_point(&mut vm, 0, 0);
    let is_a = vm.get_definition("isA").unwrap();
    for class in ["Point", "Object"] {
        let class = vm.get_definition(class).unwrap();
        let result = vm.call(&is_a, Atom::Null, &[p.clone(), class]).unwrap();
        assert!(matches!(result, Atom::Bool(true)));
    }
    let array = vm.get_definition("Array").unwrap();
    let result = vm.call(&is_a, Atom::Null, &[p, array]).unwrap();
    assert!(matches!(result, Atom::Bool(false)));
}

#[test]
fn sealed_instances_reject_new_properties() {
    let mut vm = common::vm();
    vm.run_file(&common::point_unit()).unwrap();
    let p = new_point(&mut vm, 0, 0);
    let z = vm.public_name("z");
    let err = vm.set_property(&p, &z, Atom::Int(1)).unwrap_err();
    let described = vm.describe_uncaught(&err).unwrap();
    assert_eq!(described.class_name, "ReferenceError");
    assert_eq!(described.error_id, Some(1056));
}

#[test]
fn thrown_values_reach_the_host() {
    let mut vm = common::vm();
    vm.run_file(&common::point_unit()).unwrap();
    let p = new_point(&mut vm, 0, 0);
    let fail = vm.public_name("fail");
    let err = vm.call_property(&p, &fail, &[]).unwrap_err();
    match &err {
        VmError::Script(Atom::String(_)) => {}
        other => panic!("expected a thrown string, got {other:?}"),
    }
    let described = vm.describe_uncaught(&err).unwrap();
    assert_eq!(described.message, "boom");
}

// ── Through the event loop ────────────────────────────────────────────

#[test]
fn uncaught_error_in_add_does_not_block_the_queue() {
    let reports = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&reports);
    let events = EventLoop::spawn(EventLoopSettings::default(), move || {
        let mut vm = Vm::new(VmSettings::default())?;
        vm.set_uncaught_handler(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        Ok(vm)
    })
    .unwrap();
    let queue = events.queue();

    let unit = common::point_unit();
    let point = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&point);
    let setup = queue.submit_and_wait(Event::task(move |vm| {
        vm.run_file(&unit)?;
        let class = vm.get_definition("Point")?;
        let p = vm.construct(&class, &[Atom::Int(1), Atom::Int(2)])?;
        *slot.lock() = Some((p, vm.public_name("add")));
        Ok(Atom::Undefined)
    }));
    assert_eq!(setup, Some(Outcome::Completed));

    let (target, add) = point.lock().take().unwrap();
    let failed = queue.submit_and_wait(Event::Dispatch {
        target: target.clone(),
        name: add,
        args: vec![Atom::Null],
    });
    match failed {
        Some(Outcome::Uncaught(error)) => {
            assert_eq!(error.class_name, "TypeError");
            assert_eq!(error.error_id, Some(1009));
        }
        other => panic!("unexpected outcome {other:?}"),
    }

    let sums = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&sums);
    let next = queue.submit_and_wait(Event::task(move |vm| {
        let class = vm.get_definition("Point")?;
        let other = vm.construct(&class, &[Atom::Int(3), Atom::Int(4)])?;
        let add = vm.public_name("add");
        let sum = vm.call_property(&target, &add, &[other])?;
        for field in ["x", "y"] {
            let mn = vm.public_name(field);
            if let Atom::Int(value) = vm.get_property(&sum, &mn)? {
                seen.lock().push(value);
            }
        }
        Ok(Atom::Undefined)
    }));
    assert_eq!(next, Some(Outcome::Completed));
    assert_eq!(*sums.lock(), vec![4, 6]);

    let report = events.shutdown(ShutdownMode::Drain).unwrap();
    assert_eq!(reports.load(Ordering::SeqCst), 1);
    assert_eq!(report.uncaught, 1);
    assert_eq!(report.completed, 2);
}
