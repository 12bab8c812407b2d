use object::{Atom, InstanceKind, MethodId, MethodOwner, ObjectKind, ScopeChain};

use super::{ClassSpec, Member, NativeDesc, arg};
use crate::{ErrorKind, Vm, VmError};

/// Body of every function made by `new Function()` or `Function()`.
pub const EMPTY: NativeDesc = NativeDesc::new("", 0, function_empty);

fn function_empty(_vm: &mut Vm, _this: &Atom, _args: &[Atom]) -> Result<Atom, VmError> {
    Ok(Atom::Undefined)
}

pub fn spec() -> ClassSpec {
    ClassSpec {
        name: "Function",
        kind: InstanceKind::Function,
        call: Some(function_call),
        instance: vec![Member::Getter(NativeDesc::new("length", 0, function_length))],
        prototype: vec![
            NativeDesc::new("call", 1, function_call_method),
            NativeDesc::new("apply", 2, function_apply),
            NativeDesc::new("toString", 0, function_to_string),
        ],
        ..ClassSpec::default()
    }
}

fn function_call(vm: &mut Vm, _this: &Atom, _args: &[Atom]) -> Result<Atom, VmError> {
    let empty = vm.builtins.empty_function;
    Ok(Atom::Object(vm.new_closure(
        empty,
        MethodOwner::Free,
        ScopeChain::new(),
        None,
    )))
}

fn expect_function(vm: &mut Vm, this: &Atom) -> Result<(), VmError> {
    if vm.is_callable(this) {
        Ok(())
    } else {
        let what = vm.describe_value(this);
        Err(vm.throw(ErrorKind::TypeError, 1006, &[&what]))
    }
}

pub fn function_length(vm: &mut Vm, this: &Atom, _args: &[Atom]) -> Result<Atom, VmError> {
    let method = match this {
        Atom::Object(object) => match &object.borrow().kind {
            ObjectKind::Function(function) => Some(function.method),
            _ => None,
        },
        _ => None,
    };
    let length = match method {
        Some(MethodId::Native(n)) => vm.natives.get(n as usize).map_or(0, |desc| desc.arity as usize),
        Some(MethodId::Script { unit, index }) => vm
            .units
            .get(unit as usize)
            .and_then(|unit| unit.methods.get(index as usize))
            .map_or(0, |method| method.params.len()),
        None => 0,
    };
    Ok(Atom::from_uint(length as u32))
}

/// `f.call(thisArg, ...args)`.
pub fn function_call_method(vm: &mut Vm, this: &Atom, args: &[Atom]) -> Result<Atom, VmError> {
    expect_function(vm, this)?;
    let rest = args.get(1..).unwrap_or_default();
    vm.call_value(this, arg(args, 0), rest)
}

/// `f.apply(thisArg, argArray)`.
pub fn function_apply(vm: &mut Vm, this: &Atom, args: &[Atom]) -> Result<Atom, VmError> {
    expect_function(vm, this)?;
    let list = match arg(args, 1) {
        Atom::Object(object) => match object.borrow().as_array() {
            Some(items) => items
                .iter()
                .map(|value| match value {
                    Atom::Invalid => Atom::Undefined,
                    value => value.clone(),
                })
                .collect(),
            None => Vec::new(),
        },
        Atom::Null | Atom::Undefined => Vec::new(),
        other => {
            let from = vm.describe_value(&other);
            return Err(vm.throw(ErrorKind::TypeError, 1034, &[&from, "Array"]));
        }
    };
    vm.call_value(this, arg(args, 0), &list)
}

fn function_to_string(vm: &mut Vm, _this: &Atom, _args: &[Atom]) -> Result<Atom, VmError> {
    Ok(vm.new_string("function Function() {}"))
}
