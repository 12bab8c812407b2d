use core::fmt;

use crate::number::{number_to_string, string_to_number, to_int32, to_uint32};
use crate::{ObjectRef, StringId, StringTable};

/// Discriminant of an [`Atom`], usable without touching the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomKind {
    Invalid,
    Undefined,
    Null,
    Bool,
    Int,
    UInt,
    Number,
    String,
    Object,
}

/// A tagged script value.
///
/// Primitives are stored inline; strings are interned ids and objects are
/// counted [`ObjectRef`] handles, so copying an object atom increments the
/// target's count and dropping it decrements the count.
#[derive(Clone, Default)]
pub enum Atom {
    /// Absent value (array hole, uninitialised slot marker). Reads as
    /// `undefined`.
    Invalid,
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Int(i32),
    UInt(u32),
    Number(f64),
    String(StringId),
    Object(ObjectRef),
}

impl Atom {
    // ── Construction ──────────────────────────────────────────────────

    #[inline]
    pub fn from_int(value: i32) -> Atom {
        Atom::Int(value)
    }

    #[inline]
    pub fn from_uint(value: u32) -> Atom {
        Atom::UInt(value)
    }

    #[inline]
    pub fn from_bool(value: bool) -> Atom {
        Atom::Bool(value)
    }

    #[inline]
    pub fn from_string(id: StringId) -> Atom {
        Atom::String(id)
    }

    #[inline]
    pub fn from_object(object: ObjectRef) -> Atom {
        Atom::Object(object)
    }

    /// Integral values inside the `int` range (other than `-0`) are stored
    /// as [`Atom::Int`]; everything else stays a double.
    #[inline]
    pub fn from_number(value: f64) -> Atom {
        if value.fract() == 0.0
            && value >= i32::MIN as f64
            && value <= i32::MAX as f64
            && !(value == 0.0 && value.is_sign_negative())
        {
            Atom::Int(value as i32)
        } else {
            Atom::Number(value)
        }
    }

    #[inline]
    pub fn from_i64(value: i64) -> Atom {
        match i32::try_from(value) {
            Ok(v) => Atom::Int(v),
            Err(_) => Atom::Number(value as f64),
        }
    }

    // ── Inspection ────────────────────────────────────────────────────

    #[inline]
    pub fn kind(&self) -> AtomKind {
        match self {
            Atom::Invalid => AtomKind::Invalid,
            Atom::Undefined => AtomKind::Undefined,
            Atom::Null => AtomKind::Null,
            Atom::Bool(_) => AtomKind::Bool,
            Atom::Int(_) => AtomKind::Int,
            Atom::UInt(_) => AtomKind::UInt,
            Atom::Number(_) => AtomKind::Number,
            Atom::String(_) => AtomKind::String,
            Atom::Object(_) => AtomKind::Object,
        }
    }

    /// `undefined` or the absent marker.
    #[inline]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Atom::Undefined | Atom::Invalid)
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Atom::Null)
    }

    #[inline]
    pub fn is_nullish(&self) -> bool {
        matches!(self, Atom::Null | Atom::Undefined | Atom::Invalid)
    }

    #[inline]
    pub fn is_number(&self) -> bool {
        matches!(self, Atom::Int(_) | Atom::UInt(_) | Atom::Number(_))
    }

    #[inline]
    pub fn is_primitive(&self) -> bool {
        !matches!(self, Atom::Object(_))
    }

    #[inline]
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Atom::Object(object) => Some(object),
            _ => None,
        }
    }

    #[inline]
    pub fn into_object(self) -> Option<ObjectRef> {
        match self {
            Atom::Object(object) => Some(object),
            _ => None,
        }
    }

    #[inline]
    pub fn as_string(&self) -> Option<StringId> {
        match self {
            Atom::String(id) => Some(*id),
            _ => None,
        }
    }

    /// Numeric payload of a number atom.
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Atom::Int(v) => Some(v as f64),
            Atom::UInt(v) => Some(v as f64),
            Atom::Number(v) => Some(v),
            _ => None,
        }
    }

    /// Integer payload of an `int` or `uint` atom.
    #[inline]
    pub fn as_integer(&self) -> Option<i64> {
        match *self {
            Atom::Int(v) => Some(v as i64),
            Atom::UInt(v) => Some(v as i64),
            _ => None,
        }
    }

    /// Same object identity.
    #[inline]
    pub fn is_same_object(&self, other: &ObjectRef) -> bool {
        matches!(self, Atom::Object(object) if ObjectRef::ptr_eq(object, other))
    }

    // ── Coercions ─────────────────────────────────────────────────────
    //
    // These cover primitives. Objects are converted to a primitive by the
    // VM (which can run `valueOf`/`toString`) before reaching them.

    pub fn to_boolean(&self) -> bool {
        match *self {
            Atom::Invalid | Atom::Undefined | Atom::Null => false,
            Atom::Bool(b) => b,
            Atom::Int(v) => v != 0,
            Atom::UInt(v) => v != 0,
            Atom::Number(v) => !(v == 0.0 || v.is_nan()),
            Atom::String(id) => id != StringId::EMPTY,
            Atom::Object(_) => true,
        }
    }

    pub fn to_number(&self, strings: &StringTable) -> f64 {
        match *self {
            Atom::Invalid | Atom::Undefined => f64::NAN,
            Atom::Null => 0.0,
            Atom::Bool(b) => {
                if b {
                    1.0
                } else {
                    0.0
                }
            }
            Atom::Int(v) => v as f64,
            Atom::UInt(v) => v as f64,
            Atom::Number(v) => v,
            Atom::String(id) => string_to_number(&strings.get(id)),
            Atom::Object(_) => f64::NAN,
        }
    }

    pub fn to_int32(&self, strings: &StringTable) -> i32 {
        match *self {
            Atom::Int(v) => v,
            Atom::UInt(v) => v as i32,
            _ => to_int32(self.to_number(strings)),
        }
    }

    pub fn to_uint32(&self, strings: &StringTable) -> u32 {
        match *self {
            Atom::Int(v) => v as u32,
            Atom::UInt(v) => v,
            _ => to_uint32(self.to_number(strings)),
        }
    }

    /// String form of a primitive, interned.
    pub fn to_string_id(&self, strings: &StringTable) -> StringId {
        match self {
            Atom::String(id) => *id,
            other => strings.intern(&other.primitive_to_string(strings)),
        }
    }

    /// String form of a primitive.
    pub fn primitive_to_string(&self, strings: &StringTable) -> String {
        match *self {
            Atom::Invalid | Atom::Undefined => "undefined".to_owned(),
            Atom::Null => "null".to_owned(),
            Atom::Bool(b) => b.to_string(),
            Atom::Int(v) => v.to_string(),
            Atom::UInt(v) => v.to_string(),
            Atom::Number(v) => number_to_string(v),
            Atom::String(id) => strings.get(id).to_string(),
            Atom::Object(_) => "[object Object]".to_owned(),
        }
    }
}

impl From<bool> for Atom {
    fn from(value: bool) -> Self {
        Atom::Bool(value)
    }
}

impl From<i32> for Atom {
    fn from(value: i32) -> Self {
        Atom::Int(value)
    }
}

impl From<f64> for Atom {
    fn from(value: f64) -> Self {
        Atom::from_number(value)
    }
}

impl From<ObjectRef> for Atom {
    fn from(value: ObjectRef) -> Self {
        Atom::Object(value)
    }
}

impl fmt::Debug for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::Invalid => write!(f, "<invalid>"),
            Atom::Undefined => write!(f, "undefined"),
            Atom::Null => write!(f, "null"),
            Atom::Bool(b) => write!(f, "{b}"),
            Atom::Int(v) => write!(f, "{v}i"),
            Atom::UInt(v) => write!(f, "{v}u"),
            Atom::Number(v) => write!(f, "{v}d"),
            Atom::String(id) => write!(f, "{id:?}"),
            Atom::Object(object) => write!(f, "object@{:#x}", object.addr()),
        }
    }
}
