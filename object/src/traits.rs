//! Trait bindings and the per-class trait layout.
//!
//! A [`Layout`] maps qualified names to bindings for one kind of object
//! (the instances of a class, a class object, a script global, an
//! activation). A subclass layout starts as a copy of its base layout, so
//! a single table answers lookups for inherited and declared traits.

use std::collections::HashMap;

use crate::{Atom, ClassId, Multiname, QName, StringId};

/// Kind of a declared trait, as written in the bytecode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraitKind {
    Slot,
    Method,
    Getter,
    Setter,
    Class,
    Function,
    Const,
}

/// Identifies a callable method body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodId {
    /// Method `index` of loaded unit `unit`.
    Script { unit: u32, index: u32 },
    /// Entry `n` of the VM's native method table.
    Native(u32),
}

/// Where a bound method gets its outer scope from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodOwner {
    /// Instance trait of a class.
    Instance(ClassId),
    /// Static trait of a class.
    Static(ClassId),
    /// Trait of a script global.
    Script(u32),
    /// Natives and activation traits.
    Free,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodBinding {
    pub method: MethodId,
    pub owner: MethodOwner,
}

impl MethodBinding {
    pub fn new(method: MethodId, owner: MethodOwner) -> Self {
        Self { method, owner }
    }

    /// The class whose `super` this method sees, if any.
    pub fn class(&self) -> Option<ClassId> {
        match self.owner {
            MethodOwner::Instance(id) | MethodOwner::Static(id) => Some(id),
            _ => None,
        }
    }
}

/// Declared type of a slot. Values stored into the slot are coerced to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SlotType {
    #[default]
    Any,
    Int,
    UInt,
    Number,
    Boolean,
    String,
    /// Instances of the named class (or null).
    Class(QName),
}

#[derive(Debug, Clone)]
pub enum BoundTrait {
    Slot {
        index: u32,
        kind: TraitKind,
        ty: SlotType,
    },
    Method(MethodBinding),
    Accessor {
        getter: Option<MethodBinding>,
        setter: Option<MethodBinding>,
    },
}

impl BoundTrait {
    pub fn kind(&self) -> TraitKind {
        match self {
            BoundTrait::Slot { kind, .. } => *kind,
            BoundTrait::Method(_) => TraitKind::Method,
            BoundTrait::Accessor { getter: Some(_), .. } => TraitKind::Getter,
            BoundTrait::Accessor { .. } => TraitKind::Setter,
        }
    }

    #[inline]
    pub fn is_accessor(&self) -> bool {
        matches!(self, BoundTrait::Accessor { .. })
    }

    #[inline]
    pub fn is_const(&self) -> bool {
        matches!(
            self,
            BoundTrait::Slot {
                kind: TraitKind::Const | TraitKind::Class,
                ..
            }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TraitError {
    #[error("slot {index} is already taken")]
    SlotConflict { index: u32 },
    #[error("slot id {requested} is out of range")]
    SlotOutOfRange { requested: u32 },
    #[error("trait {name:?} is declared twice")]
    Duplicate { name: StringId },
    #[error("trait {name:?} overrides a member of a different kind")]
    IllegalOverride { name: StringId },
}

/// Trait table plus slot layout for one kind of object.
#[derive(Debug, Clone, Default)]
pub struct Layout {
    entries: Vec<(QName, BoundTrait)>,
    index: HashMap<QName, usize, ahash::RandomState>,
    by_name: HashMap<StringId, Vec<usize>, ahash::RandomState>,
    /// Initial value of each slot.
    defaults: Vec<Atom>,
    /// Slots inherited from the base layout.
    inherited_slots: u32,
}

impl Layout {
    pub fn new() -> Self {
        Self::default()
    }

    /// A layout whose declarations start from `base`.
    pub fn derive(base: &Layout) -> Self {
        let mut layout = base.clone();
        layout.inherited_slots = base.slot_count();
        layout
    }

    #[inline]
    pub fn slot_count(&self) -> u32 {
        self.defaults.len() as u32
    }

    #[inline]
    pub fn inherited_slots(&self) -> u32 {
        self.inherited_slots
    }

    pub fn defaults(&self) -> &[Atom] {
        &self.defaults
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&QName, &BoundTrait)> {
        self.entries.iter().map(|(name, binding)| (name, binding))
    }

    pub fn get(&self, name: &QName) -> Option<&BoundTrait> {
        self.index.get(name).map(|&i| &self.entries[i].1)
    }

    /// Declare a slot-like trait. `requested` is the 1-based slot id from
    /// the bytecode (0 = allocate the next free slot), relative to the
    /// slots declared by this layout.
    pub fn declare_slot(
        &mut self,
        name: QName,
        kind: TraitKind,
        ty: SlotType,
        requested: u32,
        default: Atom,
    ) -> Result<u32, TraitError> {
        if self.index.contains_key(&name) {
            return Err(TraitError::Duplicate { name: name.name });
        }
        let index = if requested == 0 {
            self.slot_count()
        } else {
            self.inherited_slots
                .checked_add(requested - 1)
                .ok_or(TraitError::SlotOutOfRange { requested })?
        };
        let taken = self.entries.iter().any(|(_, binding)| {
            matches!(binding, BoundTrait::Slot { index: i, .. } if *i == index)
        });
        if taken {
            return Err(TraitError::SlotConflict { index });
        }
        if index as usize >= self.defaults.len() {
            self.defaults.resize(index as usize + 1, Atom::Undefined);
        }
        self.defaults[index as usize] = default;
        self.insert(name, BoundTrait::Slot { index, kind, ty });
        Ok(index)
    }

    /// Declare or override a method.
    pub fn declare_method(&mut self, name: QName, binding: MethodBinding) -> Result<(), TraitError> {
        match self.get(&name) {
            None | Some(BoundTrait::Method(_)) => {
                self.insert(name, BoundTrait::Method(binding));
                Ok(())
            }
            Some(_) => Err(TraitError::IllegalOverride { name: name.name }),
        }
    }

    /// Declare or override one half of an accessor pair. The other half is
    /// kept, so overriding only a getter keeps an inherited setter.
    pub fn declare_accessor(
        &mut self,
        name: QName,
        getter: Option<MethodBinding>,
        setter: Option<MethodBinding>,
    ) -> Result<(), TraitError> {
        let merged = match self.get(&name) {
            None => BoundTrait::Accessor { getter, setter },
            Some(BoundTrait::Accessor {
                getter: old_get,
                setter: old_set,
            }) => BoundTrait::Accessor {
                getter: getter.or(*old_get),
                setter: setter.or(*old_set),
            },
            // Accessors win over a plain slot of the same name.
            Some(BoundTrait::Slot { .. }) => BoundTrait::Accessor { getter, setter },
            Some(BoundTrait::Method(_)) => {
                return Err(TraitError::IllegalOverride { name: name.name });
            }
        };
        self.insert(name, merged);
        Ok(())
    }

    fn insert(&mut self, name: QName, binding: BoundTrait) {
        if let Some(&i) = self.index.get(&name) {
            self.entries[i].1 = binding;
            return;
        }
        let i = self.entries.len();
        self.entries.push((name, binding));
        self.index.insert(name, i);
        self.by_name.entry(name.name).or_default().push(i);
    }

    /// Find the binding `multiname` refers to.
    ///
    /// An empty namespace set takes the first declared candidate for the
    /// local name. Otherwise candidates must match one of the namespaces
    /// exactly. When several candidates qualify, an accessor is preferred
    /// over a plain slot.
    pub fn find(&self, multiname: &Multiname) -> Option<(&QName, &BoundTrait)> {
        debug_assert!(!multiname.is_runtime(), "unbound runtime multiname");
        let name = multiname.name?;
        let candidates = self.by_name.get(&name)?;

        let mut found: Option<usize> = None;
        for &i in candidates {
            let (qname, binding) = &self.entries[i];
            if !multiname.ns.is_any() && !multiname.ns.contains(&qname.ns) {
                continue;
            }
            match found {
                None => found = Some(i),
                Some(prev) => {
                    if binding.is_accessor() && !self.entries[prev].1.is_accessor() {
                        found = Some(i);
                    }
                }
            }
        }
        found.map(|i| {
            let (qname, binding) = &self.entries[i];
            (qname, binding)
        })
    }

    /// Slot binding by index.
    pub fn slot(&self, index: u32) -> Option<(&QName, &BoundTrait)> {
        self.entries
            .iter()
            .find(|(_, binding)| matches!(binding, BoundTrait::Slot { index: i, .. } if *i == index))
            .map(|(name, binding)| (name, binding))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Namespace, NsSet, StringTable};

    fn names() -> (StringTable, StringId, StringId) {
        let strings = StringTable::new();
        let x = strings.intern("x");
        let y = strings.intern("y");
        (strings, x, y)
    }

    #[test]
    fn subclass_slots_follow_base_slots() {
        let (_, x, y) = names();
        let mut base = Layout::new();
        base.declare_slot(QName::public(x), TraitKind::Slot, SlotType::Int, 1, Atom::Int(0))
            .unwrap();
        let mut sub = Layout::derive(&base);
        let index = sub
            .declare_slot(QName::public(y), TraitKind::Slot, SlotType::Int, 1, Atom::Int(0))
            .unwrap();
        assert_eq!(index, 1);
        assert_eq!(sub.slot_count(), 2);
        assert!(sub.get(&QName::public(x)).is_some());
    }

    #[test]
    fn conflicting_slot_ids_are_rejected() {
        let (_, x, y) = names();
        let mut layout = Layout::new();
        layout
            .declare_slot(QName::public(x), TraitKind::Slot, SlotType::Any, 1, Atom::Undefined)
            .unwrap();
        let err = layout
            .declare_slot(QName::public(y), TraitKind::Slot, SlotType::Any, 1, Atom::Undefined)
            .unwrap_err();
        assert_eq!(err, TraitError::SlotConflict { index: 0 });
    }

    #[test]
    fn slot_ids_past_the_index_range_are_rejected() {
        let (_, x, y) = names();
        let mut base = Layout::new();
        base.declare_slot(QName::public(x), TraitKind::Slot, SlotType::Any, 0, Atom::Undefined)
            .unwrap();
        let mut sub = Layout::derive(&base);
        let err = sub
            .declare_slot(QName::public(y), TraitKind::Slot, SlotType::Any, u32::MAX, Atom::Undefined)
            .unwrap_err();
        assert_eq!(err, TraitError::SlotOutOfRange { requested: u32::MAX });
        assert_eq!(sub.slot_count(), 1);
    }

    #[test]
    fn wildcard_lookup_ignores_namespaces() {
        let (strings, x, _) = names();
        let mut layout = Layout::new();
        let other = Namespace::package(strings.intern("flash.other"));
        layout
            .declare_slot(QName::new(other, x), TraitKind::Slot, SlotType::Any, 0, Atom::Int(1))
            .unwrap();
        assert!(layout.find(&Multiname::any_ns(x)).is_some());
        assert!(layout.find(&Multiname::public(x)).is_none());
        let set = NsSet::new(vec![Namespace::PUBLIC, other]);
        assert!(layout.find(&Multiname::with_set(x, set)).is_some());
    }

    #[test]
    fn accessor_halves_merge_and_override() {
        let (_, x, _) = names();
        let get = MethodBinding::new(MethodId::Native(1), MethodOwner::Free);
        let set = MethodBinding::new(MethodId::Native(2), MethodOwner::Free);
        let mut base = Layout::new();
        base.declare_accessor(QName::public(x), None, Some(set)).unwrap();
        let mut sub = Layout::derive(&base);
        sub.declare_accessor(QName::public(x), Some(get), None).unwrap();
        match sub.get(&QName::public(x)) {
            Some(BoundTrait::Accessor { getter, setter }) => {
                assert_eq!(*getter, Some(get));
                assert_eq!(*setter, Some(set));
            }
            other => panic!("unexpected binding {other:?}"),
        }
    }

    #[test]
    fn accessor_preferred_over_slot() {
        let (strings, x, _) = names();
        let ns = Namespace::internal(strings.intern("pkg"));
        let mut layout = Layout::new();
        layout
            .declare_slot(QName::public(x), TraitKind::Slot, SlotType::Any, 0, Atom::Undefined)
            .unwrap();
        let get = MethodBinding::new(MethodId::Native(1), MethodOwner::Free);
        layout.declare_accessor(QName::new(ns, x), Some(get), None).unwrap();
        let (_, binding) = layout.find(&Multiname::any_ns(x)).unwrap();
        assert!(binding.is_accessor());
    }
}
