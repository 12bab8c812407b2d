//! `String`. Indices and lengths count UTF-16 code units.

use object::{Atom, ClassFlags, InstanceKind};

use super::{ClassSpec, Member, NativeDesc, arg};
use crate::{Vm, VmError};

pub fn spec() -> ClassSpec {
    ClassSpec {
        name: "String",
        kind: InstanceKind::Abstract,
        flags: ClassFlags::FINAL | ClassFlags::SEALED,
        call: Some(string_call),
        instance: vec![Member::Getter(NativeDesc::new("length", 0, string_length))],
        prototype: vec![
            NativeDesc::new("charAt", 1, string_char_at),
            NativeDesc::new("charCodeAt", 1, string_char_code_at),
            NativeDesc::new("indexOf", 2, string_index_of),
            NativeDesc::new("substring", 2, string_substring),
            NativeDesc::new("toUpperCase", 0, string_to_upper_case),
            NativeDesc::new("toLowerCase", 0, string_to_lower_case),
            NativeDesc::new("toString", 0, string_value_of),
            NativeDesc::new("valueOf", 0, string_value_of),
        ],
        ..ClassSpec::default()
    }
}

fn units(vm: &mut Vm, this: &Atom) -> Result<Vec<u16>, VmError> {
    Ok(vm.to_rust_string(this)?.encode_utf16().collect())
}

/// An index argument clamped to `0..=len`; NaN and `undefined` read as
/// `default`.
fn clamp_index(vm: &mut Vm, value: &Atom, len: usize, default: usize) -> Result<usize, VmError> {
    if matches!(value, Atom::Undefined) {
        return Ok(default);
    }
    let n = vm.to_number(value)?;
    Ok(if n.is_nan() {
        0
    } else {
        n.trunc().clamp(0.0, len as f64) as usize
    })
}

fn string_call(vm: &mut Vm, _this: &Atom, args: &[Atom]) -> Result<Atom, VmError> {
    match args.first() {
        Some(value) => Ok(Atom::String(vm.to_string_id(value)?)),
        None => Ok(vm.new_string("")),
    }
}

pub fn string_length(vm: &mut Vm, this: &Atom, _args: &[Atom]) -> Result<Atom, VmError> {
    let len = units(vm, this)?.len();
    Ok(Atom::from_uint(len as u32))
}

pub fn string_char_at(vm: &mut Vm, this: &Atom, args: &[Atom]) -> Result<Atom, VmError> {
    let units = units(vm, this)?;
    let index = vm.to_number(&arg(args, 0))?;
    let index = if index.is_nan() { 0.0 } else { index.trunc() };
    let text = if index >= 0.0 && (index as usize) < units.len() {
        String::from_utf16_lossy(&units[index as usize..index as usize + 1])
    } else {
        String::new()
    };
    Ok(vm.new_string(&text))
}

pub fn string_char_code_at(vm: &mut Vm, this: &Atom, args: &[Atom]) -> Result<Atom, VmError> {
    let units = units(vm, this)?;
    let index = vm.to_number(&arg(args, 0))?;
    let index = if index.is_nan() { 0.0 } else { index.trunc() };
    if index >= 0.0 && (index as usize) < units.len() {
        Ok(Atom::Int(i32::from(units[index as usize])))
    } else {
        Ok(Atom::Number(f64::NAN))
    }
}

pub fn string_index_of(vm: &mut Vm, this: &Atom, args: &[Atom]) -> Result<Atom, VmError> {
    let haystack = units(vm, this)?;
    let needle: Vec<u16> = vm.to_rust_string(&arg(args, 0))?.encode_utf16().collect();
    let from = clamp_index(vm, &arg(args, 1), haystack.len(), 0)?;
    let found = if needle.is_empty() {
        Some(from)
    } else {
        haystack
            .windows(needle.len())
            .enumerate()
            .skip(from)
            .find(|(_, window)| *window == needle.as_slice())
            .map(|(i, _)| i)
    };
    Ok(Atom::Int(found.map_or(-1, |i| i as i32)))
}

pub fn string_substring(vm: &mut Vm, this: &Atom, args: &[Atom]) -> Result<Atom, VmError> {
    let units = units(vm, this)?;
    let start = clamp_index(vm, &arg(args, 0), units.len(), 0)?;
    let end = clamp_index(vm, &arg(args, 1), units.len(), units.len())?;
    let (start, end) = if start <= end { (start, end) } else { (end, start) };
    let text = String::from_utf16_lossy(&units[start..end]);
    Ok(vm.new_string(&text))
}

pub fn string_to_upper_case(vm: &mut Vm, this: &Atom, _args: &[Atom]) -> Result<Atom, VmError> {
    let text = vm.to_rust_string(this)?.to_uppercase();
    Ok(vm.new_string(&text))
}

pub fn string_to_lower_case(vm: &mut Vm, this: &Atom, _args: &[Atom]) -> Result<Atom, VmError> {
    let text = vm.to_rust_string(this)?.to_lowercase();
    Ok(vm.new_string(&text))
}

fn string_value_of(vm: &mut Vm, this: &Atom, _args: &[Atom]) -> Result<Atom, VmError> {
    match this {
        Atom::String(id) => Ok(Atom::String(*id)),
        // String.prototype itself.
        Atom::Object(_) => Ok(vm.new_string("")),
        other => Ok(Atom::String(other.to_string_id(&vm.strings))),
    }
}
