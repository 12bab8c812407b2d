//! `Boolean`, `Number`, `int` and `uint`. Their values are always
//! primitive atoms; the classes only convert and carry prototype methods.

use object::{Atom, ClassFlags, InstanceKind, SlotType, number_to_string};

use super::{ClassSpec, Member, NativeDesc, arg};
use crate::{ErrorKind, Vm, VmError};

fn primitive_spec(name: &'static str) -> ClassSpec {
    ClassSpec {
        name,
        kind: InstanceKind::Abstract,
        flags: ClassFlags::FINAL | ClassFlags::SEALED,
        ..ClassSpec::default()
    }
}

fn numeric_prototype() -> Vec<NativeDesc> {
    vec![
        NativeDesc::new("toString", 1, number_to_string_method),
        NativeDesc::new("toFixed", 1, number_to_fixed),
        NativeDesc::new("valueOf", 0, number_value_of),
    ]
}

// ── Boolean ───────────────────────────────────────────────────────────

pub fn boolean_spec() -> ClassSpec {
    ClassSpec {
        call: Some(boolean_call),
        prototype: vec![
            NativeDesc::new("toString", 0, boolean_to_string),
            NativeDesc::new("valueOf", 0, boolean_value_of),
        ],
        ..primitive_spec("Boolean")
    }
}

fn boolean_call(_vm: &mut Vm, _this: &Atom, args: &[Atom]) -> Result<Atom, VmError> {
    Ok(Atom::Bool(arg(args, 0).to_boolean()))
}

fn this_boolean(vm: &mut Vm, this: &Atom) -> Result<bool, VmError> {
    match this {
        Atom::Bool(b) => Ok(*b),
        // Boolean.prototype
        Atom::Object(_) => Ok(false),
        other => {
            let from = vm.describe_value(other);
            Err(vm.throw(ErrorKind::TypeError, 1034, &[&from, "Boolean"]))
        }
    }
}

fn boolean_to_string(vm: &mut Vm, this: &Atom, _args: &[Atom]) -> Result<Atom, VmError> {
    let value = this_boolean(vm, this)?;
    Ok(vm.new_string(if value { "true" } else { "false" }))
}

fn boolean_value_of(vm: &mut Vm, this: &Atom, _args: &[Atom]) -> Result<Atom, VmError> {
    Ok(Atom::Bool(this_boolean(vm, this)?))
}

// ── Number, int, uint ─────────────────────────────────────────────────

pub fn number_spec() -> ClassSpec {
    ClassSpec {
        call: Some(number_call),
        statics: vec![
            Member::constant("NaN", Atom::Number(f64::NAN)),
            Member::constant("POSITIVE_INFINITY", Atom::Number(f64::INFINITY)),
            Member::constant("NEGATIVE_INFINITY", Atom::Number(f64::NEG_INFINITY)),
            Member::constant("MAX_VALUE", Atom::Number(f64::MAX)),
            Member::constant("MIN_VALUE", Atom::Number(5e-324)),
        ],
        prototype: numeric_prototype(),
        ..primitive_spec("Number")
    }
}

pub fn int_spec() -> ClassSpec {
    ClassSpec {
        call: Some(int_call),
        statics: vec![
            Member::Slot {
                name: "MAX_VALUE",
                ty: SlotType::Int,
                value: Atom::Int(i32::MAX),
                constant: true,
            },
            Member::Slot {
                name: "MIN_VALUE",
                ty: SlotType::Int,
                value: Atom::Int(i32::MIN),
                constant: true,
            },
        ],
        prototype: numeric_prototype(),
        ..primitive_spec("int")
    }
}

pub fn uint_spec() -> ClassSpec {
    ClassSpec {
        call: Some(uint_call),
        statics: vec![
            Member::Slot {
                name: "MAX_VALUE",
                ty: SlotType::UInt,
                value: Atom::from_uint(u32::MAX),
                constant: true,
            },
            Member::Slot {
                name: "MIN_VALUE",
                ty: SlotType::UInt,
                value: Atom::from_uint(0),
                constant: true,
            },
        ],
        prototype: numeric_prototype(),
        ..primitive_spec("uint")
    }
}

fn number_call(vm: &mut Vm, _this: &Atom, args: &[Atom]) -> Result<Atom, VmError> {
    match args.first() {
        Some(value) => Ok(Atom::from_number(vm.to_number(value)?)),
        None => Ok(Atom::Int(0)),
    }
}

fn int_call(vm: &mut Vm, _this: &Atom, args: &[Atom]) -> Result<Atom, VmError> {
    Ok(Atom::Int(vm.to_int32(&arg(args, 0))?))
}

fn uint_call(vm: &mut Vm, _this: &Atom, args: &[Atom]) -> Result<Atom, VmError> {
    Ok(Atom::from_uint(vm.to_uint32(&arg(args, 0))?))
}

fn this_number(vm: &mut Vm, this: &Atom) -> Result<f64, VmError> {
    match this.as_f64() {
        Some(n) => Ok(n),
        // Number.prototype
        None if matches!(this, Atom::Object(_)) => Ok(0.0),
        None => {
            let from = vm.describe_value(this);
            Err(vm.throw(ErrorKind::TypeError, 1034, &[&from, "Number"]))
        }
    }
}

/// `n` written in base `radix`, fraction included, without exponent.
fn to_radix_string(n: f64, radix: u32) -> String {
    if !n.is_finite() {
        return number_to_string(n);
    }
    let digit = |d: u32| char::from_digit(d, radix).unwrap_or('0');
    let negative = n < 0.0;
    let n = n.abs();
    let mut int = n.trunc();
    let mut frac = n - int;

    let mut digits = Vec::new();
    loop {
        digits.push(digit((int % radix as f64) as u32));
        int = (int / radix as f64).trunc();
        if int < 1.0 {
            break;
        }
    }
    let mut text: String = digits.iter().rev().collect();
    if frac > 0.0 {
        text.push('.');
        for _ in 0..20 {
            frac *= radix as f64;
            let d = frac.trunc();
            text.push(digit(d as u32));
            frac -= d;
            if frac <= 0.0 {
                break;
            }
        }
    }
    if negative {
        text.insert(0, '-');
    }
    text
}

pub fn number_to_string_method(vm: &mut Vm, this: &Atom, args: &[Atom]) -> Result<Atom, VmError> {
    let n = this_number(vm, this)?;
    let radix = match arg(args, 0) {
        Atom::Undefined => 10,
        value => vm.to_int32(&value)?,
    };
    if !(2..=36).contains(&radix) {
        return Err(vm.throw(ErrorKind::RangeError, 1003, &[&radix.to_string()]));
    }
    let text = if radix == 10 {
        number_to_string(n)
    } else {
        to_radix_string(n, radix as u32)
    };
    Ok(vm.new_string(&text))
}

pub fn number_to_fixed(vm: &mut Vm, this: &Atom, args: &[Atom]) -> Result<Atom, VmError> {
    let n = this_number(vm, this)?;
    let digits = vm.to_int32(&arg(args, 0))?;
    if !(0..=20).contains(&digits) {
        return Err(vm.throw(ErrorKind::RangeError, 1002, &[]));
    }
    let text = if !n.is_finite() || n.abs() >= 1e21 {
        number_to_string(n)
    } else {
        format!("{:.*}", digits as usize, n)
    };
    Ok(vm.new_string(&text))
}

fn number_value_of(vm: &mut Vm, this: &Atom, _args: &[Atom]) -> Result<Atom, VmError> {
    Ok(Atom::from_number(this_number(vm, this)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn radix_strings() {
        assert_eq!(to_radix_string(255.0, 16), "ff");
        assert_eq!(to_radix_string(-10.0, 2), "-1010");
        assert_eq!(to_radix_string(0.0, 8), "0");
        assert_eq!(to_radix_string(0.5, 2), "0.1");
    }
}
