use std::sync::Arc;

use heap::{Gc, Trace};
use indexmap::IndexMap;

use crate::{
    Atom, ClassDef, ClassId, Layout, MethodId, MethodOwner, Namespace, ScopeChain, StringId,
};

/// Counted reference to a script object.
pub type ObjectRef = Gc<ScriptObject>;

#[derive(Debug, Clone)]
pub struct DynamicProp {
    pub value: Atom,
    pub enumerable: bool,
}

/// Callable payload of a function object or method closure.
#[derive(Debug, Clone)]
pub struct FunctionObject {
    pub method: MethodId,
    pub owner: MethodOwner,
    /// Scope captured when the closure was created.
    pub scope: ScopeChain,
    /// Fixed `this` of a method closure.
    pub receiver: Option<Atom>,
}

/// Closed set of object representations.
#[derive(Debug)]
pub enum ObjectKind {
    Plain,
    /// Class object of the class with this id.
    Class(ClassId),
    Function(FunctionObject),
    Activation,
    Array(Vec<Atom>),
    Namespace(Namespace),
    /// Unresolved lookups are redirected to the delegate.
    Proxy(ObjectRef),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PropertyError {
    #[error("cannot create property {name:?} on a sealed object")]
    Sealed { name: StringId },
    #[error("slot {index} out of range")]
    SlotOutOfRange { index: u32 },
    #[error("illegal write to constant {name:?}")]
    ConstWrite { name: StringId },
    #[error("cannot assign to method {name:?}")]
    MethodWrite { name: StringId },
    #[error("property {name:?} has no setter")]
    ReadOnly { name: StringId },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CloneError {
    #[error("slot {index} holds a shared reference")]
    SharedSlot { index: u32 },
    #[error("property {name:?} holds a shared reference")]
    SharedProperty { name: StringId },
    #[error("objects of this kind cannot be cloned")]
    UnsupportedKind,
}

/// Key produced by property enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumKey {
    Index(u32),
    Name(StringId),
}

/// A heap object: declared slots laid out by its [`Layout`], an
/// insertion-ordered dynamic property store, a prototype link and a
/// kind-specific payload.
#[derive(Debug)]
pub struct ScriptObject {
    pub class: Arc<ClassDef>,
    pub layout: Arc<Layout>,
    pub slots: Vec<Atom>,
    pub dynamic: IndexMap<StringId, DynamicProp, ahash::RandomState>,
    pub proto: Option<ObjectRef>,
    pub kind: ObjectKind,
    sealed: bool,
}

impl ScriptObject {
    /// An instance of `class` with its slots at their declared defaults.
    pub fn instance(class: Arc<ClassDef>, proto: Option<ObjectRef>, kind: ObjectKind) -> Self {
        let layout = Arc::clone(&class.instance_layout);
        let sealed = class.is_sealed();
        Self::with_layout(class, layout, proto, kind, sealed)
    }

    pub fn with_layout(
        class: Arc<ClassDef>,
        layout: Arc<Layout>,
        proto: Option<ObjectRef>,
        kind: ObjectKind,
        sealed: bool,
    ) -> Self {
        Self {
            slots: layout.defaults().to_vec(),
            class,
            layout,
            dynamic: IndexMap::default(),
            proto,
            kind,
            sealed,
        }
    }

    #[inline]
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    // ── Slots ─────────────────────────────────────────────────────────

    #[inline]
    pub fn slot(&self, index: u32) -> Option<&Atom> {
        self.slots.get(index as usize)
    }

    pub fn set_slot(&mut self, index: u32, value: Atom) -> Result<(), PropertyError> {
        match self.slots.get_mut(index as usize) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(PropertyError::SlotOutOfRange { index }),
        }
    }

    // ── Dynamic properties ────────────────────────────────────────────

    pub fn get_dynamic(&self, name: StringId) -> Option<&Atom> {
        self.dynamic.get(&name).map(|prop| &prop.value)
    }

    #[inline]
    pub fn has_dynamic(&self, name: StringId) -> bool {
        self.dynamic.contains_key(&name)
    }

    /// Create or overwrite a dynamic property.
    pub fn set_dynamic(&mut self, name: StringId, value: Atom) -> Result<(), PropertyError> {
        if let Some(prop) = self.dynamic.get_mut(&name) {
            prop.value = value;
            return Ok(());
        }
        if self.sealed {
            return Err(PropertyError::Sealed { name });
        }
        self.dynamic.insert(
            name,
            DynamicProp {
                value,
                enumerable: true,
            },
        );
        Ok(())
    }

    /// Install a non-enumerable property, ignoring the sealed flag. Used to
    /// populate prototypes.
    pub fn define_hidden(&mut self, name: StringId, value: Atom) {
        self.dynamic.insert(
            name,
            DynamicProp {
                value,
                enumerable: false,
            },
        );
    }

    /// Remove a dynamic property, keeping the order of the others.
    pub fn delete_dynamic(&mut self, name: StringId) -> bool {
        self.dynamic.shift_remove(&name).is_some()
    }

    pub fn set_enumerable(&mut self, name: StringId, enumerable: bool) -> bool {
        match self.dynamic.get_mut(&name) {
            Some(prop) => {
                prop.enumerable = enumerable;
                true
            }
            None => false,
        }
    }

    pub fn is_enumerable(&self, name: StringId) -> bool {
        self.dynamic.get(&name).is_some_and(|prop| prop.enumerable)
    }

    // ── Kind payloads ─────────────────────────────────────────────────

    pub fn as_array(&self) -> Option<&Vec<Atom>> {
        match &self.kind {
            ObjectKind::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut Vec<Atom>> {
        match &mut self.kind {
            ObjectKind::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionObject> {
        match &self.kind {
            ObjectKind::Function(function) => Some(function),
            _ => None,
        }
    }

    pub fn as_class(&self) -> Option<ClassId> {
        match self.kind {
            ObjectKind::Class(id) => Some(id),
            _ => None,
        }
    }

    // ── Enumeration ───────────────────────────────────────────────────
    //
    // Positions are 1-based: array elements first, then enumerable dynamic
    // properties in insertion order. 0 means "done".

    fn element_count(&self) -> u32 {
        self.as_array().map_or(0, |items| items.len() as u32)
    }

    /// Next enumerable position after `index`, or 0.
    pub fn next_enumerable(&self, index: u32) -> u32 {
        let elements = self.element_count();
        let mut next = index + 1;
        if let Some(items) = self.as_array() {
            while next <= elements {
                if !matches!(items[next as usize - 1], Atom::Invalid) {
                    return next;
                }
                next += 1;
            }
        }
        let mut at = (next - elements - 1) as usize;
        while let Some((_, prop)) = self.dynamic.get_index(at) {
            if prop.enumerable {
                return elements + at as u32 + 1;
            }
            at += 1;
        }
        0
    }

    pub fn key_at(&self, index: u32) -> Option<EnumKey> {
        let elements = self.element_count();
        if index == 0 {
            return None;
        }
        if index <= elements {
            return Some(EnumKey::Index(index - 1));
        }
        self.dynamic
            .get_index((index - elements - 1) as usize)
            .map(|(name, _)| EnumKey::Name(*name))
    }

    pub fn value_at(&self, index: u32) -> Atom {
        let elements = self.element_count();
        if index == 0 {
            return Atom::Undefined;
        }
        if index <= elements {
            return self
                .as_array()
                .and_then(|items| items.get(index as usize - 1))
                .cloned()
                .unwrap_or_default();
        }
        self.dynamic
            .get_index((index - elements - 1) as usize)
            .map(|(_, prop)| prop.value.clone())
            .unwrap_or_default()
    }

    // ── Cloning ───────────────────────────────────────────────────────

    /// Copy this object's state into a fresh value of the same class.
    ///
    /// Only succeeds when every contained value is a primitive, so the copy
    /// cannot alias mutable state of the original.
    pub fn clone_instance(&self) -> Result<ScriptObject, CloneError> {
        for (index, slot) in self.slots.iter().enumerate() {
            if !slot.is_primitive() {
                return Err(CloneError::SharedSlot {
                    index: index as u32,
                });
            }
        }
        for (name, prop) in &self.dynamic {
            if !prop.value.is_primitive() {
                return Err(CloneError::SharedProperty { name: *name });
            }
        }
        let kind = match &self.kind {
            ObjectKind::Plain => ObjectKind::Plain,
            ObjectKind::Array(items) => {
                if items.iter().any(|item| !item.is_primitive()) {
                    return Err(CloneError::UnsupportedKind);
                }
                ObjectKind::Array(items.clone())
            }
            ObjectKind::Namespace(ns) => ObjectKind::Namespace(*ns),
            _ => return Err(CloneError::UnsupportedKind),
        };
        Ok(ScriptObject {
            class: Arc::clone(&self.class),
            layout: Arc::clone(&self.layout),
            slots: self.slots.clone(),
            dynamic: self.dynamic.clone(),
            proto: self.proto.clone(),
            kind,
            sealed: self.sealed,
        })
    }
}

fn visit_atom(atom: &Atom, visitor: &mut dyn FnMut(&ObjectRef)) {
    if let Atom::Object(object) = atom {
        visitor(object);
    }
}

impl Trace for ScriptObject {
    fn trace(&self, visitor: &mut dyn FnMut(&ObjectRef)) {
        for slot in &self.slots {
            visit_atom(slot, visitor);
        }
        for prop in self.dynamic.values() {
            visit_atom(&prop.value, visitor);
        }
        if let Some(proto) = &self.proto {
            visitor(proto);
        }
        match &self.kind {
            ObjectKind::Function(function) => {
                for scope in function.scope.iter() {
                    visitor(&scope.object);
                }
                if let Some(receiver) = &function.receiver {
                    visit_atom(receiver, visitor);
                }
            }
            ObjectKind::Array(items) => {
                for item in items {
                    visit_atom(item, visitor);
                }
            }
            ObjectKind::Proxy(delegate) => visitor(delegate),
            ObjectKind::Plain
            | ObjectKind::Class(_)
            | ObjectKind::Activation
            | ObjectKind::Namespace(_) => {}
        }
    }

    fn clear(&mut self) {
        self.slots.clear();
        self.dynamic.clear();
        self.proto = None;
        self.kind = ObjectKind::Plain;
    }

    fn recycle_key(&self) -> Option<u32> {
        match self.kind {
            ObjectKind::Plain | ObjectKind::Activation => Some(self.class.id.0),
            _ => None,
        }
    }
}
