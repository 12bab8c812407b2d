//! Conversions that may run script code, and type tests.
//!
//! The pure conversions of primitives live on [`Atom`]; the ones here add
//! `valueOf`/`toString` for objects and class lookups for declared types.

use std::sync::Arc;

use object::{Atom, ClassDef, ClassId, Multiname, ObjectKind, QName, SlotType, StringId};

use crate::{ErrorKind, Vm, VmError};

/// Preferred result of [`Vm::to_primitive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Hint {
    Number,
    String,
}

impl Vm {
    pub(crate) fn to_primitive(&mut self, value: &Atom, hint: Hint) -> Result<Atom, VmError> {
        if !matches!(value, Atom::Object(_)) {
            return Ok(value.clone());
        }
        let order = match hint {
            Hint::Number => [self.names.value_of, self.names.to_string],
            Hint::String => [self.names.to_string, self.names.value_of],
        };
        for name in order {
            let method = self.get_prop(value, &Multiname::public(name))?;
            if self.is_callable(&method) {
                let result = self.call_value(&method, value.clone(), &[])?;
                if !matches!(result, Atom::Object(_)) {
                    return Ok(result);
                }
            }
        }
        let name = self.class_name_of(value);
        Err(self.throw(ErrorKind::TypeError, 1050, &[&name]))
    }

    pub(crate) fn to_number(&mut self, value: &Atom) -> Result<f64, VmError> {
        match value {
            Atom::Object(_) => Ok(self.to_primitive(value, Hint::Number)?.to_number(&self.strings)),
            _ => Ok(value.to_number(&self.strings)),
        }
    }

    pub(crate) fn to_int32(&mut self, value: &Atom) -> Result<i32, VmError> {
        match value {
            Atom::Int(i) => Ok(*i),
            _ => Ok(object::number::to_int32(self.to_number(value)?)),
        }
    }

    pub(crate) fn to_uint32(&mut self, value: &Atom) -> Result<u32, VmError> {
        match value {
            Atom::UInt(u) => Ok(*u),
            _ => Ok(object::number::to_uint32(self.to_number(value)?)),
        }
    }

    /// A primitive numeric atom for `value`.
    pub(crate) fn to_numeric(&mut self, value: &Atom) -> Result<Atom, VmError> {
        match value {
            Atom::Int(_) | Atom::UInt(_) | Atom::Number(_) => Ok(value.clone()),
            _ => Ok(Atom::from_number(self.to_number(value)?)),
        }
    }

    pub(crate) fn to_string_id(&mut self, value: &Atom) -> Result<StringId, VmError> {
        match value {
            Atom::String(id) => Ok(*id),
            Atom::Object(_) => {
                let primitive = self.to_primitive(value, Hint::String)?;
                Ok(primitive.to_string_id(&self.strings))
            }
            _ => Ok(value.to_string_id(&self.strings)),
        }
    }

    pub(crate) fn to_rust_string(&mut self, value: &Atom) -> Result<String, VmError> {
        let id = self.to_string_id(value)?;
        Ok(self.strings.get(id).to_string())
    }

    // ── Declared types ────────────────────────────────────────────────

    /// Coerce `value` to a slot, parameter or return type.
    pub(crate) fn coerce(&mut self, value: Atom, ty: &SlotType) -> Result<Atom, VmError> {
        Ok(match ty {
            SlotType::Any => match value {
                Atom::Invalid => Atom::Undefined,
                value => value,
            },
            SlotType::Int => Atom::Int(self.to_int32(&value)?),
            SlotType::UInt => Atom::UInt(self.to_uint32(&value)?),
            SlotType::Number => Atom::from_number(self.to_number(&value)?),
            SlotType::Boolean => Atom::Bool(value.to_boolean()),
            SlotType::String if value.is_nullish() => Atom::Null,
            SlotType::String => Atom::String(self.to_string_id(&value)?),
            SlotType::Class(qname) => {
                let class = self.class_of_type(qname)?;
                return self.coerce_to_class(value, class);
            }
        })
    }

    pub(crate) fn coerce_to_class(&mut self, value: Atom, class: ClassId) -> Result<Atom, VmError> {
        let b = &self.builtins;
        let target = match class {
            c if c == b.int => SlotType::Int,
            c if c == b.uint => SlotType::UInt,
            c if c == b.number => SlotType::Number,
            c if c == b.boolean => SlotType::Boolean,
            c if c == b.string => SlotType::String,
            _ => {
                if value.is_nullish() || self.is_type(&value, class) {
                    return Ok(match value {
                        Atom::Undefined | Atom::Invalid => Atom::Null,
                        value => value,
                    });
                }
                let from = self.describe_value(&value);
                let to = self.class_def(class).name.display(&self.strings);
                return Err(self.throw(ErrorKind::TypeError, 1034, &[&from, &to]));
            }
        };
        self.coerce(value, &target)
    }

    /// The class named by a declared type. Runs the defining script when
    /// the class is not known yet.
    pub(crate) fn class_of_type(&mut self, qname: &QName) -> Result<ClassId, VmError> {
        if let Some(&id) = self.type_cache.get(qname) {
            return Ok(id);
        }
        let mut found = self
            .classes
            .iter()
            .find(|entry| entry.def.name == *qname)
            .map(|entry| entry.def.id);
        if found.is_none() {
            let mn = Multiname::qname(qname.ns, qname.name);
            if let Some(Atom::Object(object)) = self.find_definition(&mn)? {
                found = object.borrow().as_class();
            }
        }
        match found {
            Some(id) => {
                self.type_cache.insert(*qname, id);
                Ok(id)
            }
            None => {
                let name = qname.display(&self.strings);
                Err(self.throw(ErrorKind::VerifyError, 1014, &[&name]))
            }
        }
    }

    /// Whether `value` has a type handlers declared as `ty` accept.
    pub(crate) fn matches_slot_type(&mut self, value: &Atom, ty: &SlotType) -> Result<bool, VmError> {
        Ok(match ty {
            SlotType::Any => true,
            SlotType::Int => self.is_type(value, self.builtins.int),
            SlotType::UInt => self.is_type(value, self.builtins.uint),
            SlotType::Number => value.is_number(),
            SlotType::Boolean => matches!(value, Atom::Bool(_)),
            SlotType::String => matches!(value, Atom::String(_)),
            SlotType::Class(qname) => {
                let class = self.class_of_type(qname)?;
                self.is_type(value, class)
            }
        })
    }

    /// The `is` operator against a class.
    pub(crate) fn is_type(&self, value: &Atom, class: ClassId) -> bool {
        let b = &self.builtins;
        if class == b.number {
            return value.is_number();
        }
        if class == b.int {
            return value
                .as_f64()
                .is_some_and(|n| n.fract() == 0.0 && n >= i32::MIN as f64 && n <= i32::MAX as f64);
        }
        if class == b.uint {
            return value
                .as_f64()
                .is_some_and(|n| n.fract() == 0.0 && n >= 0.0 && n <= u32::MAX as f64);
        }
        let target = self.class_def(class);
        match value {
            Atom::Object(object) => object.borrow().class.is_subclass_of(target),
            _ => match self.primitive_class(value) {
                Some(own) => self.class_def(own).is_subclass_of(target),
                None => false,
            },
        }
    }

    /// The class primitives of this kind behave as instances of.
    pub(crate) fn primitive_class(&self, value: &Atom) -> Option<ClassId> {
        let b = &self.builtins;
        match value {
            Atom::Bool(_) => Some(b.boolean),
            Atom::Int(_) => Some(b.int),
            Atom::UInt(_) => Some(b.uint),
            Atom::Number(_) => Some(b.number),
            Atom::String(_) => Some(b.string),
            _ => None,
        }
    }

    /// The `instanceof` operator: walks the prototype chain of `value`.
    pub(crate) fn instance_of(&mut self, value: &Atom, rhs: &Atom) -> Result<bool, VmError> {
        if !self.is_callable(rhs) {
            return Err(self.throw(ErrorKind::TypeError, 1040, &[]));
        }
        let proto = self.get_prop(rhs, &Multiname::public(self.names.prototype))?;
        let Atom::Object(proto) = proto else {
            return Ok(false);
        };
        let mut current = match value {
            Atom::Object(object) => object.borrow().proto.clone(),
            _ => match self.primitive_class(value) {
                Some(class) => Some(self.classes[class.0 as usize].prototype.clone()),
                None => None,
            },
        };
        while let Some(object) = current {
            if heap::Gc::ptr_eq(&object, &proto) {
                return Ok(true);
            }
            current = object.borrow().proto.clone();
        }
        Ok(false)
    }

    pub(crate) fn type_of(&self, value: &Atom) -> &'static str {
        match value {
            Atom::Undefined | Atom::Invalid => "undefined",
            Atom::Null => "object",
            Atom::Bool(_) => "boolean",
            Atom::Int(_) | Atom::UInt(_) | Atom::Number(_) => "number",
            Atom::String(_) => "string",
            Atom::Object(object) => match object.borrow().kind {
                ObjectKind::Function(_) => "function",
                _ => "object",
            },
        }
    }

    pub(crate) fn is_callable(&self, value: &Atom) -> bool {
        match value {
            Atom::Object(object) => matches!(
                object.borrow().kind,
                ObjectKind::Function(_) | ObjectKind::Class(_)
            ),
            _ => false,
        }
    }

    // ── Operators ─────────────────────────────────────────────────────

    /// `==`: objects compare by identity, and are converted to primitives
    /// when compared with one.
    pub(crate) fn loose_equals(&mut self, a: &Atom, b: &Atom) -> Result<bool, VmError> {
        match (a, b) {
            (Atom::Object(x), Atom::Object(y)) => Ok(heap::Gc::ptr_eq(x, y)),
            (Atom::Object(_), other) | (other, Atom::Object(_)) if !other.is_nullish() => {
                let object = if matches!(a, Atom::Object(_)) { a } else { b };
                let primitive = self.to_primitive(object, Hint::Number)?;
                Ok(primitive.loose_equals(other, &self.strings))
            }
            _ => Ok(a.loose_equals(b, &self.strings)),
        }
    }

    /// Abstract relational comparison `a < b`; `None` when either side is
    /// NaN.
    pub(crate) fn less_than(&mut self, a: &Atom, b: &Atom) -> Result<Option<bool>, VmError> {
        let a = self.to_primitive(a, Hint::Number)?;
        let b = self.to_primitive(b, Hint::Number)?;
        Ok(a.less_than(&b, &self.strings))
    }

    pub(crate) fn add_values(&mut self, a: &Atom, b: &Atom) -> Result<Atom, VmError> {
        let a = self.to_primitive(a, Hint::Number)?;
        let b = self.to_primitive(b, Hint::Number)?;
        Ok(a.add(&b, &self.strings))
    }

    // ── Descriptions ──────────────────────────────────────────────────

    #[inline]
    pub(crate) fn class_def(&self, id: ClassId) -> &Arc<ClassDef> {
        &self.classes[id.0 as usize].def
    }

    /// Name of the class of `value`, for messages.
    pub(crate) fn class_name_of(&self, value: &Atom) -> String {
        match value {
            Atom::Object(object) => {
                let object = object.borrow();
                match object.kind {
                    ObjectKind::Class(id) => {
                        format!("{}$", self.class_def(id).name.display(&self.strings))
                    }
                    _ => object.class.name.display(&self.strings),
                }
            }
            Atom::Null => "null".to_owned(),
            Atom::Undefined | Atom::Invalid => "void".to_owned(),
            _ => match self.primitive_class(value) {
                Some(class) => self.class_def(class).name.display(&self.strings),
                None => "*".to_owned(),
            },
        }
    }

    /// Short description of `value` that never runs script code.
    pub(crate) fn describe_value(&self, value: &Atom) -> String {
        match value {
            Atom::Object(object) => match object.borrow().kind {
                ObjectKind::Class(id) => {
                    format!("[class {}]", self.class_def(id).name.display(&self.strings))
                }
                ObjectKind::Function(_) => "Function".to_owned(),
                _ => format!("[object {}]", object.borrow().class.name.display(&self.strings)),
            },
            _ => value.primitive_to_string(&self.strings),
        }
    }
}
