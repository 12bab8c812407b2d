//! Arithmetic, bitwise, equality and relational operators on atoms.
//!
//! Operands must already be primitives (or objects compared by identity).
//! Integer operands take a checked integer path first and fall back to
//! double arithmetic when the result leaves the representable range.

use std::cmp::Ordering;

use crate::{Atom, StringTable};

impl Atom {
    /// `+`: string concatenation when either side is a string, numeric
    /// addition otherwise.
    pub fn add(&self, other: &Atom, strings: &StringTable) -> Atom {
        if matches!(self, Atom::String(_)) || matches!(other, Atom::String(_)) {
            let mut text = self.primitive_to_string(strings);
            text.push_str(&other.primitive_to_string(strings));
            return Atom::String(strings.intern(&text));
        }
        if let (Some(a), Some(b)) = (self.as_integer(), other.as_integer()) {
            return Atom::from_i64(a + b);
        }
        Atom::from_number(self.to_number(strings) + other.to_number(strings))
    }

    /// Numeric addition regardless of operand types.
    pub fn add_numeric(&self, other: &Atom, strings: &StringTable) -> Atom {
        if let (Some(a), Some(b)) = (self.as_integer(), other.as_integer()) {
            return Atom::from_i64(a + b);
        }
        Atom::from_number(self.to_number(strings) + other.to_number(strings))
    }

    pub fn subtract(&self, other: &Atom, strings: &StringTable) -> Atom {
        if let (Some(a), Some(b)) = (self.as_integer(), other.as_integer()) {
            return Atom::from_i64(a - b);
        }
        Atom::from_number(self.to_number(strings) - other.to_number(strings))
    }

    pub fn multiply(&self, other: &Atom, strings: &StringTable) -> Atom {
        if let (Some(a), Some(b)) = (self.as_integer(), other.as_integer()) {
            // A zero product with a negative factor is -0, which only a
            // double can hold.
            if let Some(product) = a.checked_mul(b).filter(|p| *p != 0 || (a >= 0 && b >= 0)) {
                return Atom::from_i64(product);
            }
        }
        Atom::from_number(self.to_number(strings) * other.to_number(strings))
    }

    pub fn divide(&self, other: &Atom, strings: &StringTable) -> Atom {
        Atom::from_number(self.to_number(strings) / other.to_number(strings))
    }

    pub fn modulo(&self, other: &Atom, strings: &StringTable) -> Atom {
        if let (Some(a), Some(b)) = (self.as_integer(), other.as_integer()) {
            if b != 0 {
                let r = a % b;
                if r == 0 && a < 0 {
                    return Atom::Number(-0.0);
                }
                return Atom::from_i64(r);
            }
        }
        Atom::from_number(self.to_number(strings) % other.to_number(strings))
    }

    pub fn negate(&self, strings: &StringTable) -> Atom {
        match self.as_integer() {
            Some(v) if v != 0 => Atom::from_i64(-v),
            _ => Atom::from_number(-self.to_number(strings)),
        }
    }

    // ── Bitwise ───────────────────────────────────────────────────────

    pub fn bit_and(&self, other: &Atom, strings: &StringTable) -> Atom {
        Atom::Int(self.to_int32(strings) & other.to_int32(strings))
    }

    pub fn bit_or(&self, other: &Atom, strings: &StringTable) -> Atom {
        Atom::Int(self.to_int32(strings) | other.to_int32(strings))
    }

    pub fn bit_xor(&self, other: &Atom, strings: &StringTable) -> Atom {
        Atom::Int(self.to_int32(strings) ^ other.to_int32(strings))
    }

    pub fn bit_not(&self, strings: &StringTable) -> Atom {
        Atom::Int(!self.to_int32(strings))
    }

    pub fn lshift(&self, other: &Atom, strings: &StringTable) -> Atom {
        let shift = other.to_uint32(strings) & 31;
        Atom::Int(self.to_int32(strings).wrapping_shl(shift))
    }

    pub fn rshift(&self, other: &Atom, strings: &StringTable) -> Atom {
        let shift = other.to_uint32(strings) & 31;
        Atom::Int(self.to_int32(strings) >> shift)
    }

    pub fn urshift(&self, other: &Atom, strings: &StringTable) -> Atom {
        let shift = other.to_uint32(strings) & 31;
        Atom::UInt(self.to_uint32(strings) >> shift)
    }

    // ── Equality ──────────────────────────────────────────────────────

    /// `===`. Numeric atoms compare by value whatever their tag, so `NaN`
    /// is unequal to itself.
    pub fn strict_equals(&self, other: &Atom) -> bool {
        if let (Some(a), Some(b)) = (self.as_f64(), other.as_f64()) {
            return a == b;
        }
        match (self, other) {
            (a, b) if a.is_undefined() && b.is_undefined() => true,
            (Atom::Null, Atom::Null) => true,
            (Atom::Bool(a), Atom::Bool(b)) => a == b,
            (Atom::String(a), Atom::String(b)) => a == b,
            (Atom::Object(a), Atom::Object(b)) => crate::ObjectRef::ptr_eq(a, b),
            _ => false,
        }
    }

    /// `==` over primitives (and objects by identity). An object compared
    /// with a primitive must be converted by the caller first.
    pub fn loose_equals(&self, other: &Atom, strings: &StringTable) -> bool {
        if self.is_nullish() && other.is_nullish() {
            return true;
        }
        if self.is_nullish() || other.is_nullish() {
            return false;
        }
        match (self, other) {
            (Atom::Object(a), Atom::Object(b)) => crate::ObjectRef::ptr_eq(a, b),
            (Atom::Object(_), _) | (_, Atom::Object(_)) => false,
            (Atom::String(a), Atom::String(b)) => a == b,
            (Atom::Bool(a), Atom::Bool(b)) => a == b,
            _ => self.to_number(strings) == other.to_number(strings),
        }
    }

    // ── Relational ────────────────────────────────────────────────────

    /// ECMA abstract relational comparison `self < other`.
    ///
    /// `None` is the "undefined" outcome produced when either side is NaN;
    /// every relational operator treats it as false.
    pub fn less_than(&self, other: &Atom, strings: &StringTable) -> Option<bool> {
        if let (Atom::String(a), Atom::String(b)) = (self, other) {
            if a == b {
                return Some(false);
            }
            let (a, b) = (strings.get(*a), strings.get(*b));
            return Some(a.encode_utf16().cmp(b.encode_utf16()) == Ordering::Less);
        }
        if let (Some(a), Some(b)) = (self.as_integer(), other.as_integer()) {
            return Some(a < b);
        }
        let (a, b) = (self.to_number(strings), other.to_number(strings));
        if a.is_nan() || b.is_nan() {
            return None;
        }
        Some(a < b)
    }

    pub fn lt(&self, other: &Atom, strings: &StringTable) -> bool {
        self.less_than(other, strings) == Some(true)
    }

    pub fn le(&self, other: &Atom, strings: &StringTable) -> bool {
        other.less_than(self, strings) == Some(false)
    }

    pub fn gt(&self, other: &Atom, strings: &StringTable) -> bool {
        other.less_than(self, strings) == Some(true)
    }

    pub fn ge(&self, other: &Atom, strings: &StringTable) -> bool {
        self.less_than(other, strings) == Some(false)
    }
}
