//! Global functions and constants.

use object::{Atom, string_to_number};

use super::{Member, NativeDesc, arg};
use crate::{ErrorKind, Vm, VmError};

pub fn members() -> Vec<Member> {
    vec![
        Member::Method(NativeDesc::new("trace", 1, global_trace)),
        Member::Method(NativeDesc::new("isNaN", 1, global_is_nan)),
        Member::Method(NativeDesc::new("isFinite", 1, global_is_finite)),
        Member::Method(NativeDesc::new("parseInt", 2, global_parse_int)),
        Member::Method(NativeDesc::new("parseFloat", 1, global_parse_float)),
        Member::constant("NaN", Atom::Number(f64::NAN)),
        Member::constant("Infinity", Atom::Number(f64::INFINITY)),
        Member::constant("undefined", Atom::Undefined),
    ]
}

/// `trace(...args)`: the string forms joined by a space.
pub fn global_trace(vm: &mut Vm, _this: &Atom, args: &[Atom]) -> Result<Atom, VmError> {
    let mut parts = Vec::with_capacity(args.len());
    for value in args {
        parts.push(vm.to_rust_string(value)?);
    }
    vm.emit_trace(&parts.join(" "));
    Ok(Atom::Undefined)
}

fn global_is_nan(vm: &mut Vm, _this: &Atom, args: &[Atom]) -> Result<Atom, VmError> {
    Ok(Atom::Bool(vm.to_number(&arg(args, 0))?.is_nan()))
}

fn global_is_finite(vm: &mut Vm, _this: &Atom, args: &[Atom]) -> Result<Atom, VmError> {
    Ok(Atom::Bool(vm.to_number(&arg(args, 0))?.is_finite()))
}

/// Digits of `text` in `radix` from its start, or `None` when there are
/// none.
fn parse_digits(text: &str, radix: u32) -> Option<f64> {
    let mut value: Option<f64> = None;
    for c in text.chars() {
        let Some(digit) = c.to_digit(radix) else {
            break;
        };
        value = Some(value.unwrap_or(0.0) * radix as f64 + digit as f64);
    }
    value
}

pub(crate) fn parse_int(text: &str, radix: i32) -> Option<f64> {
    let text = text.trim_start();
    let (negative, text) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let hex = text.starts_with("0x") || text.starts_with("0X");
    let (radix, text) = match radix {
        0 if hex => (16, &text[2..]),
        0 => (10, text),
        16 if hex => (16, &text[2..]),
        r if (2..=36).contains(&r) => (r as u32, text),
        _ => return None,
    };
    parse_digits(text, radix).map(|n| if negative { -n } else { n })
}

pub fn global_parse_int(vm: &mut Vm, _this: &Atom, args: &[Atom]) -> Result<Atom, VmError> {
    let text = vm.to_rust_string(&arg(args, 0))?;
    let radix = match arg(args, 1) {
        Atom::Undefined => 0,
        value => vm.to_int32(&value)?,
    };
    if radix != 0 && !(2..=36).contains(&radix) {
        return Err(vm.throw(ErrorKind::RangeError, 1003, &[&radix.to_string()]));
    }
    Ok(match parse_int(&text, radix) {
        Some(n) => Atom::from_number(n),
        None => Atom::Number(f64::NAN),
    })
}

/// Longest prefix of `text` that reads as a decimal literal.
fn float_prefix(text: &str) -> &str {
    let bytes = text.as_bytes();
    let mut end = 0;
    let mut at = 0;
    if matches!(bytes.first(), Some(b'-' | b'+')) {
        at = 1;
    }
    if text[at..].starts_with("Infinity") {
        return &text[..at + "Infinity".len()];
    }
    let mut digits = false;
    while at < bytes.len() && bytes[at].is_ascii_digit() {
        at += 1;
        digits = true;
        end = at;
    }
    if at < bytes.len() && bytes[at] == b'.' {
        at += 1;
        while at < bytes.len() && bytes[at].is_ascii_digit() {
            at += 1;
            digits = true;
            end = at;
        }
    }
    if digits && at < bytes.len() && matches!(bytes[at], b'e' | b'E') {
        let mut exp = at + 1;
        if matches!(bytes.get(exp), Some(b'-' | b'+')) {
            exp += 1;
        }
        let start = exp;
        while exp < bytes.len() && bytes[exp].is_ascii_digit() {
            exp += 1;
        }
        if exp > start {
            end = exp;
        }
    }
    &text[..end]
}

pub fn global_parse_float(vm: &mut Vm, _this: &Atom, args: &[Atom]) -> Result<Atom, VmError> {
    let text = vm.to_rust_string(&arg(args, 0))?;
    let prefix = float_prefix(text.trim_start());
    let n = if prefix.is_empty() {
        f64::NAN
    } else {
        string_to_number(prefix)
    };
    Ok(Atom::from_number(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_int_radixes() {
        assert_eq!(parse_int("42px", 0), Some(42.0));
        assert_eq!(parse_int("  -0x1F", 0), Some(-31.0));
        assert_eq!(parse_int("ff", 16), Some(255.0));
        assert_eq!(parse_int("101", 2), Some(5.0));
        assert_eq!(parse_int("z", 10), None);
        assert_eq!(parse_int("", 0), None);
    }

    #[test]
    fn float_prefixes() {
        assert_eq!(float_prefix("3.25abc"), "3.25");
        assert_eq!(float_prefix("-1e3x"), "-1e3");
        assert_eq!(float_prefix("1e"), "1");
        assert_eq!(float_prefix("-Infinity"), "-Infinity");
        assert_eq!(float_prefix(".5"), ".5");
        assert_eq!(float_prefix("abc"), "");
    }
}
