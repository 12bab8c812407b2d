use object::{Atom, InstanceKind, ObjectRef};

use super::{ClassSpec, Member, NativeDesc, arg};
use crate::{ErrorKind, Vm, VmError};

pub fn spec() -> ClassSpec {
    ClassSpec {
        name: "Array",
        kind: InstanceKind::Array,
        init: Some(NativeDesc::new("Array", 1, array_init)),
        call: Some(array_call),
        instance: vec![
            Member::Getter(NativeDesc::new("length", 0, array_length)),
            Member::Setter(NativeDesc::new("length", 1, array_set_length)),
        ],
        prototype: vec![
            NativeDesc::new("push", 1, array_push),
            NativeDesc::new("pop", 0, array_pop),
            NativeDesc::new("shift", 0, array_shift),
            NativeDesc::new("unshift", 1, array_unshift),
            NativeDesc::new("join", 1, array_join),
            NativeDesc::new("indexOf", 2, array_index_of),
            NativeDesc::new("slice", 2, array_slice),
            NativeDesc::new("concat", 1, array_concat),
            NativeDesc::new("reverse", 0, array_reverse),
            NativeDesc::new("toString", 0, array_to_string),
        ],
        ..ClassSpec::default()
    }
}

fn expect_array(vm: &mut Vm, this: &Atom) -> Result<ObjectRef, VmError> {
    if let Atom::Object(object) = this {
        if object.borrow().as_array().is_some() {
            return Ok(object.clone());
        }
    }
    let from = vm.describe_value(this);
    Err(vm.throw(ErrorKind::TypeError, 1034, &[&from, "Array"]))
}

/// Elements of `array` with holes read as `undefined`.
fn elements(array: &ObjectRef) -> Vec<Atom> {
    array
        .borrow()
        .as_array()
        .map(|items| {
            items
                .iter()
                .map(|value| match value {
                    Atom::Invalid => Atom::Undefined,
                    value => value.clone(),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn with_items<R>(array: &ObjectRef, f: impl FnOnce(&mut Vec<Atom>) -> R) -> Option<R> {
    array.borrow_mut().as_array_mut().map(f)
}

/// Elements for `new Array(...)`: a single numeric argument is a length.
fn initial_items(vm: &mut Vm, args: &[Atom]) -> Result<Vec<Atom>, VmError> {
    match args {
        [length] if length.is_number() => {
            let n = length.as_f64().unwrap_or(f64::NAN);
            if n < 0.0 || n.fract() != 0.0 || n > u32::MAX as f64 {
                let text = vm.describe_value(length);
                return Err(vm.throw(ErrorKind::RangeError, 1005, &[&text]));
            }
            Ok(vec![Atom::Invalid; n as usize])
        }
        _ => Ok(args.to_vec()),
    }
}

fn array_init(vm: &mut Vm, this: &Atom, args: &[Atom]) -> Result<Atom, VmError> {
    let items = initial_items(vm, args)?;
    let array = expect_array(vm, this)?;
    with_items(&array, |current| *current = items);
    Ok(Atom::Undefined)
}

fn array_call(vm: &mut Vm, _this: &Atom, args: &[Atom]) -> Result<Atom, VmError> {
    let items = initial_items(vm, args)?;
    Ok(Atom::Object(vm.alloc_array(items)))
}

pub fn array_length(vm: &mut Vm, this: &Atom, _args: &[Atom]) -> Result<Atom, VmError> {
    let array = expect_array(vm, this)?;
    let len = with_items(&array, |items| items.len()).unwrap_or(0);
    Ok(Atom::from_uint(len as u32))
}

pub fn array_set_length(vm: &mut Vm, this: &Atom, args: &[Atom]) -> Result<Atom, VmError> {
    let array = expect_array(vm, this)?;
    let value = arg(args, 0);
    let n = vm.to_number(&value)?;
    if n < 0.0 || n.fract() != 0.0 || n > u32::MAX as f64 {
        let text = vm.describe_value(&value);
        return Err(vm.throw(ErrorKind::RangeError, 1005, &[&text]));
    }
    with_items(&array, |items| items.resize(n as usize, Atom::Invalid));
    Ok(Atom::Undefined)
}

pub fn array_push(vm: &mut Vm, this: &Atom, args: &[Atom]) -> Result<Atom, VmError> {
    let array = expect_array(vm, this)?;
    let len = with_items(&array, |items| {
        items.extend_from_slice(args);
        items.len()
    })
    .unwrap_or(0);
    Ok(Atom::from_uint(len as u32))
}

pub fn array_pop(vm: &mut Vm, this: &Atom, _args: &[Atom]) -> Result<Atom, VmError> {
    let array = expect_array(vm, this)?;
    let last = with_items(&array, Vec::pop).flatten();
    Ok(match last {
        Some(Atom::Invalid) | None => Atom::Undefined,
        Some(value) => value,
    })
}

pub fn array_shift(vm: &mut Vm, this: &Atom, _args: &[Atom]) -> Result<Atom, VmError> {
    let array = expect_array(vm, this)?;
    let first = with_items(&array, |items| (!items.is_empty()).then(|| items.remove(0))).flatten();
    Ok(match first {
        Some(Atom::Invalid) | None => Atom::Undefined,
        Some(value) => value,
    })
}

pub fn array_unshift(vm: &mut Vm, this: &Atom, args: &[Atom]) -> Result<Atom, VmError> {
    let array = expect_array(vm, this)?;
    let len = with_items(&array, |items| {
        items.splice(0..0, args.iter().cloned());
        items.len()
    })
    .unwrap_or(0);
    Ok(Atom::from_uint(len as u32))
}

fn join(vm: &mut Vm, array: &ObjectRef, separator: &str) -> Result<String, VmError> {
    let mut parts = Vec::new();
    for value in elements(array) {
        parts.push(if value.is_nullish() {
            String::new()
        } else {
            vm.to_rust_string(&value)?
        });
    }
    Ok(parts.join(separator))
}

pub fn array_join(vm: &mut Vm, this: &Atom, args: &[Atom]) -> Result<Atom, VmError> {
    let array = expect_array(vm, this)?;
    let separator = match arg(args, 0) {
        Atom::Undefined => ",".to_owned(),
        other => vm.to_rust_string(&other)?,
    };
    let text = join(vm, &array, &separator)?;
    Ok(vm.new_string(&text))
}

pub fn array_to_string(vm: &mut Vm, this: &Atom, _args: &[Atom]) -> Result<Atom, VmError> {
    let array = expect_array(vm, this)?;
    let text = join(vm, &array, ",")?;
    Ok(vm.new_string(&text))
}

/// Resolve a relative index against `len`: negative values count from
/// the end.
fn relative(vm: &mut Vm, value: &Atom, len: usize, default: usize) -> Result<usize, VmError> {
    if matches!(value, Atom::Undefined) {
        return Ok(default);
    }
    let n = vm.to_number(value)?;
    let n = if n.is_nan() { 0.0 } else { n.trunc() };
    Ok(if n < 0.0 {
        (len as f64 + n).max(0.0) as usize
    } else {
        n.min(len as f64) as usize
    })
}

pub fn array_index_of(vm: &mut Vm, this: &Atom, args: &[Atom]) -> Result<Atom, VmError> {
    let array = expect_array(vm, this)?;
    let items = elements(&array);
    let needle = arg(args, 0);
    let from = relative(vm, &arg(args, 1), items.len(), 0)?;
    let found = items
        .iter()
        .enumerate()
        .skip(from)
        .find(|(_, value)| value.strict_equals(&needle))
        .map_or(-1, |(i, _)| i as i32);
    Ok(Atom::Int(found))
}

pub fn array_slice(vm: &mut Vm, this: &Atom, args: &[Atom]) -> Result<Atom, VmError> {
    let array = expect_array(vm, this)?;
    let items = elements(&array);
    let start = relative(vm, &arg(args, 0), items.len(), 0)?;
    let end = relative(vm, &arg(args, 1), items.len(), items.len())?;
    let slice = items.get(start..end.max(start)).unwrap_or_default().to_vec();
    Ok(Atom::Object(vm.alloc_array(slice)))
}

pub fn array_concat(vm: &mut Vm, this: &Atom, args: &[Atom]) -> Result<Atom, VmError> {
    let array = expect_array(vm, this)?;
    let mut items = elements(&array);
    for value in args {
        let nested = match value {
            Atom::Object(object) if object.borrow().as_array().is_some() => Some(elements(object)),
            _ => None,
        };
        match nested {
            Some(nested) => items.extend(nested),
            None => items.push(value.clone()),
        }
    }
    Ok(Atom::Object(vm.alloc_array(items)))
}

pub fn array_reverse(vm: &mut Vm, this: &Atom, _args: &[Atom]) -> Result<Atom, VmError> {
    let array = expect_array(vm, this)?;
    with_items(&array, |items| items.reverse());
    Ok(this.clone())
}
