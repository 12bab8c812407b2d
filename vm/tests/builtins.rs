mod common;

use avm2::Vm;
use object::Atom;

fn call_global(vm: &mut Vm, name: &str, args: &[Atom]) -> Atom {
    let f = vm.get_definition(name).unwrap();
    vm.call(&f, Atom::Null, args).unwrap()
}

fn call_method(vm: &mut Vm, receiver: &Atom, name: &str, args: &[Atom]) -> Atom {
    let mn = vm.public_name(name);
    vm.call_property(receiver, &mn, args).unwrap()
}

fn text(vm: &mut Vm, value: &Atom) -> String {
    vm.to_display_string(value).unwrap()
}

// ── Global functions ──────────────────────────────────────────────────

#[test]
fn parse_functions() {
    let mut vm = common::vm();
    let hex = vm.new_string("0x1F");
    let n = call_global(&mut vm, "parseInt", &[hex]);
    assert_eq!(text(&mut vm, &n), "31");

    let binary = vm.new_string("101");
    let n = call_global(&mut vm, "parseInt", &[binary, Atom::Int(2)]);
    assert_eq!(text(&mut vm, &n), "5");

    let float = vm.new_string("  3.25abc");
    let n = call_global(&mut vm, "parseFloat", &[float]);
    assert_eq!(text(&mut vm, &n), "3.25");

    let junk = vm.new_string("junk");
    let n = call_global(&mut vm, "parseInt", &[junk]);
    assert_eq!(text(&mut vm, &n), "NaN");
}

#[test]
fn nan_and_finiteness_checks() {
    let mut vm = common::vm();
    assert!(matches!(call_global(&mut vm, "isNaN", &[Atom::Number(f64::NAN)]), Atom::Bool(true)));
    assert!(matches!(call_global(&mut vm, "isNaN", &[Atom::Int(1)]), Atom::Bool(false)));
    let inf = Atom::Number(f64::INFINITY);
    assert!(matches!(call_global(&mut vm, "isFinite", &[inf]), Atom::Bool(false)));
}

// ── Arrays ────────────────────────────────────────────────────────────

#[test]
fn array_methods() {
    let mut vm = common::vm();
    let array = vm.new_array(vec![Atom::Int(1), Atom::Int(2)]);
    let len = call_method(&mut vm, &array, "push", &[Atom::Int(3)]);
    assert!(matches!(len, Atom::Int(3) | Atom::UInt(3)));

    let comma = vm.new_string("-");
    let joined = call_method(&mut vm, &array, "join", &[comma]);
    assert_eq!(text(&mut vm, &joined), "1-2-3");
    assert_eq!(text(&mut vm, &array), "1,2,3");

    let index = call_method(&mut vm, &array, "indexOf", &[Atom::Int(2)]);
    assert!(matches!(index, Atom::Int(1)));

    call_method(&mut vm, &array, "reverse", &[]);
    let popped = call_method(&mut vm, &array, "pop", &[]);
    assert!(matches!(popped, Atom::Int(1)));

    let length = vm.public_name("length");
    let len = vm.get_property(&array, &length).unwrap();
    assert_eq!(text(&mut vm, &len), "2");
}

// ── Strings ───────────────────────────────────────────────────────────

#[test]
fn string_methods() {
    let mut vm = common::vm();
    let s = vm.new_string("Hello");
    let upper = call_method(&mut vm, &s, "toUpperCase", &[]);
    assert_eq!(text(&mut vm, &upper), "HELLO");

    let sub = call_method(&mut vm, &s, "substring", &[Atom::Int(1), Atom::Int(3)]);
    assert_eq!(text(&mut vm, &sub), "el");

    let code = call_method(&mut vm, &s, "charCodeAt", &[Atom::Int(0)]);
    assert_eq!(text(&mut vm, &code), "72");

    let length = vm.public_name("length");
    assert!(matches!(vm.get_property(&s, &length).unwrap(), Atom::Int(5)));
}

// ── Numbers ───────────────────────────────────────────────────────────

#[test]
fn number_formatting() {
    let mut vm = common::vm();
    let fixed = call_method(&mut vm, &Atom::Number(3.14159), "toFixed", &[Atom::Int(2)]);
    assert_eq!(text(&mut vm, &fixed), "3.14");

    let hex = call_method(&mut vm, &Atom::Int(255), "toString", &[Atom::Int(16)]);
    assert_eq!(text(&mut vm, &hex), "ff");

    assert_eq!(text(&mut vm, &Atom::Number(0.1 + 0.2)), "0.30000000000000004");
    assert_eq!(text(&mut vm, &Atom::Number(1e21)), "1e+21");
}

// ── Errors ────────────────────────────────────────────────────────────

#[test]
fn error_objects_format_as_name_and_message() {
    let mut vm = common::vm();
    let class = vm.get_definition("RangeError").unwrap();
    let message = vm.new_string("too far");
    let error = vm.construct(&class, &[message, Atom::Int(1125)]).unwrap();
    assert_eq!(text(&mut vm, &error), "RangeError: too far");

    let id = vm.public_name("errorID");
    assert!(matches!(vm.get_property(&error, &id).unwrap(), Atom::Int(1125)));

    let name = vm.public_name("name");
    let name = vm.get_property(&error, &name).unwrap();
    assert_eq!(text(&mut vm, &name), "RangeError");
}

#[test]
fn object_prototype_methods() {
    let mut vm = common::vm();
    let class = vm.get_definition("Object").unwrap();
    let object = vm.construct(&class, &[]).unwrap();
    let key = vm.public_name("answer");
    vm.set_property(&object, &key, Atom::Int(42)).unwrap();

    let name = vm.new_string("answer");
    let own = call_method(&mut vm, &object, "hasOwnProperty", &[name]);
    assert!(matches!(own, Atom::Bool(true)));
    assert_eq!(text(&mut vm, &object), "[object Object]");
}
