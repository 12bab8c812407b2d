//! Multiname resolution.
//!
//! Resolution order for an object:
//! 1. declared traits (the layout already merges every ancestor class),
//! 2. array elements and own dynamic properties, for names that can see
//!    the public namespace,
//! 3. dynamic properties along the prototype chain (reads only),
//! 4. the delegate of a proxy object, when everything above failed.

use crate::number::parse_array_index;
use crate::{
    BoundTrait, Multiname, ObjectKind, ObjectRef, PropertyError, QName, StringId, StringTable,
};

/// Whether the lookup is for a read or a write. A setter-only accessor is
/// invisible to reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Get,
    Set,
}

/// Stack-allocated linked list for cycle detection along delegate chains.
///
/// Each node lives on a recursive call's stack frame and points to the
/// caller's node, so every node outlives its callees.
struct VisitedLink<'a> {
    addr: usize,
    prev: Option<&'a VisitedLink<'a>>,
}

impl VisitedLink<'_> {
    fn contains(&self, addr: usize) -> bool {
        let mut link = Some(self);
        while let Some(node) = link {
            if node.addr == addr {
                return true;
            }
            link = node.prev;
        }
        false
    }
}

/// The result of a property lookup.
#[derive(Debug, Clone)]
pub enum Lookup {
    /// Name was not found. Reads yield `undefined`; writes may create a
    /// dynamic property.
    NotFound,
    /// A declared trait of `holder`.
    Trait {
        holder: ObjectRef,
        name: QName,
        binding: BoundTrait,
    },
    /// A dynamic property of `holder`, which may be a prototype.
    Dynamic { holder: ObjectRef, name: StringId },
    /// An element of an array object.
    Element { holder: ObjectRef, index: u32 },
}

impl Lookup {
    #[inline]
    pub fn is_found(&self) -> bool {
        !matches!(self, Lookup::NotFound)
    }
}

/// Resolve `multiname` on `object`.
///
/// `multiname` must be bound (no runtime parts left).
pub fn resolve(
    object: &ObjectRef,
    multiname: &Multiname,
    access: Access,
    strings: &StringTable,
) -> Lookup {
    resolve_in(object, multiname, access, strings, None)
}

fn resolve_in(
    object: &ObjectRef,
    multiname: &Multiname,
    access: Access,
    strings: &StringTable,
    visited: Option<&VisitedLink<'_>>,
) -> Lookup {
    let Some(name) = multiname.name else {
        return Lookup::NotFound;
    };

    let delegate = {
        let obj = object.borrow();

        if let Some((qname, binding)) = obj.layout.find(multiname) {
            if access == Access::Get
                && matches!(binding, BoundTrait::Accessor { getter: None, .. })
            {
                return Lookup::NotFound;
            }
            return Lookup::Trait {
                holder: object.clone(),
                name: *qname,
                binding: binding.clone(),
            };
        }

        if multiname.ns.allows_public() && !multiname.is_attribute() {
            if let ObjectKind::Array(items) = &obj.kind {
                if let Some(index) = parse_array_index(&strings.get(name)) {
                    let present = items
                        .get(index as usize)
                        .is_some_and(|item| !matches!(item, crate::Atom::Invalid));
                    if access == Access::Set || present {
                        return Lookup::Element {
                            holder: object.clone(),
                            index,
                        };
                    }
                }
            }

            if obj.has_dynamic(name) {
                return Lookup::Dynamic {
                    holder: object.clone(),
                    name,
                };
            }

            if access == Access::Get {
                let mut proto = obj.proto.clone();
                while let Some(current) = proto {
                    let next = {
                        let p = current.borrow();
                        if p.has_dynamic(name) {
                            drop(p);
                            return Lookup::Dynamic {
                                holder: current,
                                name,
                            };
                        }
                        p.proto.clone()
                    };
                    proto = next;
                }
            }
        }

        match &obj.kind {
            ObjectKind::Proxy(delegate) => delegate.clone(),
            _ => return Lookup::NotFound,
        }
    };

    let here = VisitedLink {
        addr: object.addr(),
        prev: visited,
    };
    if here.contains(delegate.addr()) {
        return Lookup::NotFound;
    }
    resolve_in(&delegate, multiname, access, strings, Some(&here))
}

/// Resolve against declared traits only. Used for non-`with` scope entries.
pub fn resolve_declared(object: &ObjectRef, multiname: &Multiname) -> Option<(QName, BoundTrait)> {
    let obj = object.borrow();
    obj.layout
        .find(multiname)
        .map(|(qname, binding)| (*qname, binding.clone()))
}

/// Whether a read of `multiname` on `object` would find anything.
pub fn has_property(object: &ObjectRef, multiname: &Multiname, strings: &StringTable) -> bool {
    resolve(object, multiname, Access::Get, strings).is_found()
}

/// Whether a declared trait accepts a plain write. `init` permits the one
/// write a constant receives from its initializer.
pub fn check_write(binding: &BoundTrait, name: &QName, init: bool) -> Result<(), PropertyError> {
    match binding {
        BoundTrait::Slot { .. } if binding.is_const() && !init => {
            Err(PropertyError::ConstWrite { name: name.name })
        }
        BoundTrait::Slot { .. } => Ok(()),
        BoundTrait::Method(_) => Err(PropertyError::MethodWrite { name: name.name }),
        BoundTrait::Accessor { setter: None, .. } => Err(PropertyError::ReadOnly { name: name.name }),
        BoundTrait::Accessor { .. } => Ok(()),
    }
}
