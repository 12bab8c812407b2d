use std::sync::Arc;

use crate::{Layout, MethodId, Namespace, QName};

/// Index of a class in the VM's class table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ClassFlags: u8 {
        const SEALED       = 0x01;
        const FINAL        = 0x02;
        const INTERFACE    = 0x04;
        const PROTECTED_NS = 0x08;
    }
}

/// Native representation used for instances of a class. Inherited by
/// subclasses unless they override it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstanceKind {
    #[default]
    Plain,
    Array,
    Function,
    Namespace,
    /// Not constructible with `new` (int, Boolean, Class, ...).
    Abstract,
}

/// Immutable description of a class, shared by its class object and all
/// of its instances.
#[derive(Debug)]
pub struct ClassDef {
    pub id: ClassId,
    pub name: QName,
    pub super_class: Option<Arc<ClassDef>>,
    pub interfaces: Vec<Arc<ClassDef>>,
    pub flags: ClassFlags,
    pub protected_ns: Option<Namespace>,
    /// Traits and slot layout of instances, base traits included.
    pub instance_layout: Arc<Layout>,
    /// Traits and slot layout of the class object.
    pub static_layout: Arc<Layout>,
    pub instance_init: Option<MethodId>,
    pub class_init: Option<MethodId>,
    pub instance_kind: InstanceKind,
}

impl ClassDef {
    #[inline]
    pub fn is_sealed(&self) -> bool {
        self.flags.contains(ClassFlags::SEALED)
    }

    #[inline]
    pub fn is_final(&self) -> bool {
        self.flags.contains(ClassFlags::FINAL)
    }

    #[inline]
    pub fn is_interface(&self) -> bool {
        self.flags.contains(ClassFlags::INTERFACE)
    }

    /// This class followed by its superclasses, root-most last.
    pub fn ancestors(&self) -> impl Iterator<Item = &ClassDef> {
        std::iter::successors(Some(self), |class| class.super_class.as_deref())
    }

    /// Whether instances of `self` are instances of `other`: `other` is
    /// `self`, a superclass, or an interface implemented anywhere in the
    /// hierarchy.
    pub fn is_subclass_of(&self, other: &ClassDef) -> bool {
        self.ancestors().any(|class| {
            class.id == other.id || class.interfaces.iter().any(|i| i.extends_interface(other))
        })
    }

    fn extends_interface(&self, other: &ClassDef) -> bool {
        self.id == other.id || self.interfaces.iter().any(|i| i.extends_interface(other))
    }
}
