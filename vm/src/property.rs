//! Property access on atoms: reads, writes, deletes and calls through a
//! multiname, plus scope chain searches.

use object::{
    Access, Atom, BoundTrait, Lookup, Multiname, ObjectRef, PropertyError, check_write,
    has_property, resolve, resolve_declared,
};

use crate::{ErrorKind, Vm, VmError, activation::Activation};

impl Vm {
    fn null_receiver(&mut self, receiver: &Atom) -> VmError {
        if receiver.is_null() {
            self.throw(ErrorKind::TypeError, 1009, &[])
        } else {
            self.throw(ErrorKind::TypeError, 1010, &[])
        }
    }

    fn property_error(&mut self, error: PropertyError, receiver: &Atom) -> VmError {
        let class = self.class_name_of(receiver);
        let name = |vm: &Vm, id| vm.strings.get(id).to_string();
        match error {
            PropertyError::Sealed { name: id } => {
                let name = name(self, id);
                self.throw(ErrorKind::ReferenceError, 1056, &[&name, &class])
            }
            PropertyError::ConstWrite { name: id } | PropertyError::ReadOnly { name: id } => {
                let name = name(self, id);
                self.throw(ErrorKind::ReferenceError, 1074, &[&name, &class])
            }
            PropertyError::MethodWrite { name: id } => {
                let name = name(self, id);
                self.throw(ErrorKind::ReferenceError, 1037, &[&name, &class])
            }
            PropertyError::SlotOutOfRange { index } => {
                self.throw(ErrorKind::RangeError, 1125, &[&index.to_string(), &class])
            }
        }
    }

    fn not_found(&mut self, mn: &Multiname, receiver: &Atom) -> VmError {
        let name = mn.display(&self.strings);
        let class = self.class_name_of(receiver);
        self.throw(ErrorKind::ReferenceError, 1069, &[&name, &class])
    }

    /// Value of a declared trait. Methods read as closures bound to
    /// `receiver`, getters are invoked on it.
    fn read_trait(
        &mut self,
        receiver: &Atom,
        holder: Option<&ObjectRef>,
        binding: &BoundTrait,
    ) -> Result<Atom, VmError> {
        match binding {
            BoundTrait::Slot { index, .. } => Ok(holder
                .and_then(|holder| holder.borrow().slot(*index).cloned())
                .map(|value| match value {
                    Atom::Invalid => Atom::Undefined,
                    value => value,
                })
                .unwrap_or_default()),
            BoundTrait::Method(method) => {
                let closure = self.bind_method(method, receiver.clone())?;
                Ok(Atom::Object(closure))
            }
            BoundTrait::Accessor {
                getter: Some(getter),
                ..
            } => self.invoke_binding(getter, receiver.clone(), &[]),
            BoundTrait::Accessor { getter: None, .. } => Ok(Atom::Undefined),
        }
    }

    // ── Reads ─────────────────────────────────────────────────────────

    pub(crate) fn get_prop(&mut self, receiver: &Atom, mn: &Multiname) -> Result<Atom, VmError> {
        let object = match receiver {
            Atom::Object(object) => object,
            Atom::Null | Atom::Undefined | Atom::Invalid => {
                return Err(self.null_receiver(receiver));
            }
            _ => return self.get_primitive_prop(receiver, mn),
        };
        match resolve(object, mn, Access::Get, &self.strings) {
            Lookup::Trait {
                holder, binding, ..
            } => self.read_trait(&Atom::Object(holder.clone()), Some(&holder), &binding),
            Lookup::Dynamic { holder, name } => {
                Ok(holder.borrow().get_dynamic(name).cloned().unwrap_or_default())
            }
            Lookup::Element { holder, index } => Ok(holder
                .borrow()
                .as_array()
                .and_then(|items| items.get(index as usize).cloned())
                .filter(|value| !matches!(value, Atom::Invalid))
                .unwrap_or_default()),
            Lookup::NotFound => {
                if object.borrow().is_sealed() && mn.name.is_some() {
                    Err(self.not_found(mn, receiver))
                } else {
                    Ok(Atom::Undefined)
                }
            }
        }
    }

    /// Primitives read declared traits of their class, then dynamic
    /// properties of its prototype chain.
    fn get_primitive_prop(&mut self, receiver: &Atom, mn: &Multiname) -> Result<Atom, VmError> {
        let Some(class) = self.primitive_class(receiver) else {
            return Ok(Atom::Undefined);
        };
        let (declared, prototype) = {
            let entry = &self.classes[class.0 as usize];
            let declared = entry.def.instance_layout.find(mn).map(|(_, b)| b.clone());
            (declared, entry.prototype.clone())
        };
        if let Some(binding) = declared {
            return self.read_trait(receiver, None, &binding);
        }
        match resolve(&prototype, mn, Access::Get, &self.strings) {
            Lookup::Dynamic { holder, name } => {
                Ok(holder.borrow().get_dynamic(name).cloned().unwrap_or_default())
            }
            Lookup::Trait {
                holder, binding, ..
            } => self.read_trait(&Atom::Object(holder.clone()), Some(&holder), &binding),
            _ => Err(self.not_found(mn, receiver)),
        }
    }

    // ── Writes ────────────────────────────────────────────────────────

    pub(crate) fn set_prop(
        &mut self,
        receiver: &Atom,
        mn: &Multiname,
        value: Atom,
    ) -> Result<(), VmError> {
        self.write_prop(receiver, mn, value, false)
    }

    /// `initproperty`: like a write, but may store into a constant.
    pub(crate) fn init_prop(
        &mut self,
        receiver: &Atom,
        mn: &Multiname,
        value: Atom,
    ) -> Result<(), VmError> {
        self.write_prop(receiver, mn, value, true)
    }

    fn write_prop(
        &mut self,
        receiver: &Atom,
        mn: &Multiname,
        value: Atom,
        init: bool,
    ) -> Result<(), VmError> {
        let object = match receiver {
            Atom::Object(object) => object,
            Atom::Null | Atom::Undefined | Atom::Invalid => {
                return Err(self.null_receiver(receiver));
            }
            _ => {
                let name = self.strings.intern(&mn.display(&self.strings));
                return Err(self.property_error(PropertyError::Sealed { name }, receiver));
            }
        };
        match resolve(object, mn, Access::Set, &self.strings) {
            Lookup::Trait {
                holder,
                name,
                binding,
            } => {
                if let Err(e) = check_write(&binding, &name, init) {
                    return Err(self.property_error(e, receiver));
                }
                match binding {
                    BoundTrait::Slot { index, ty, .. } => {
                        let value = self.coerce(value, &ty)?;
                        let stored = holder.borrow_mut().set_slot(index, value);
                        stored.map_err(|e| self.property_error(e, receiver))
                    }
                    BoundTrait::Accessor {
                        setter: Some(setter),
                        ..
                    } => self
                        .invoke_binding(&setter, Atom::Object(holder), &[value])
                        .map(drop),
                    _ => Ok(()),
                }
            }
            Lookup::Dynamic { holder, name } => {
                let stored = holder.borrow_mut().set_dynamic(name, value);
                stored.map_err(|e| self.property_error(e, receiver))
            }
            Lookup::Element { holder, index } => {
                let mut holder = holder.borrow_mut();
                if let Some(items) = holder.as_array_mut() {
                    let index = index as usize;
                    if index >= items.len() {
                        items.resize(index + 1, Atom::Invalid);
                    }
                    items[index] = value;
                }
                Ok(())
            }
            Lookup::NotFound => {
                let Some(name) = mn.name.filter(|_| mn.ns.allows_public()) else {
                    let name = self.strings.intern(&mn.display(&self.strings));
                    return Err(self.property_error(PropertyError::Sealed { name }, receiver));
                };
                let stored = object.borrow_mut().set_dynamic(name, value);
                stored.map_err(|e| self.property_error(e, receiver))
            }
        }
    }

    pub(crate) fn delete_prop(&mut self, receiver: &Atom, mn: &Multiname) -> Result<bool, VmError> {
        let object = match receiver {
            Atom::Object(object) => object,
            Atom::Null | Atom::Undefined | Atom::Invalid => {
                return Err(self.null_receiver(receiver));
            }
            _ => return Ok(true),
        };
        Ok(match resolve(object, mn, Access::Set, &self.strings) {
            Lookup::Trait { .. } => false,
            Lookup::Dynamic { holder, name } => holder.borrow_mut().delete_dynamic(name),
            Lookup::Element { holder, index } => {
                if let Some(items) = holder.borrow_mut().as_array_mut() {
                    if let Some(item) = items.get_mut(index as usize) {
                        *item = Atom::Invalid;
                    }
                }
                true
            }
            Lookup::NotFound => true,
        })
    }

    /// The `in` operator.
    pub(crate) fn has_prop(&mut self, receiver: &Atom, mn: &Multiname) -> Result<bool, VmError> {
        match receiver {
            Atom::Object(object) => Ok(has_property(object, mn, &self.strings)),
            Atom::Null | Atom::Undefined | Atom::Invalid => Err(self.null_receiver(receiver)),
            _ => {
                let Some(class) = self.primitive_class(receiver) else {
                    return Ok(false);
                };
                let entry = &self.classes[class.0 as usize];
                Ok(entry.def.instance_layout.find(mn).is_some()
                    || has_property(&entry.prototype, mn, &self.strings))
            }
        }
    }

    // ── Calls ─────────────────────────────────────────────────────────

    /// Call the property `mn` of `receiver`. With `lex`, a function found
    /// as a plain value is called with a null `this`.
    pub(crate) fn call_prop(
        &mut self,
        receiver: &Atom,
        mn: &Multiname,
        args: &[Atom],
        lex: bool,
    ) -> Result<Atom, VmError> {
        let function = match receiver {
            Atom::Object(object) => match resolve(object, mn, Access::Get, &self.strings) {
                Lookup::Trait {
                    holder,
                    binding: BoundTrait::Method(method),
                    ..
                } => return self.invoke_binding(&method, Atom::Object(holder), args),
                Lookup::Trait {
                    holder, binding, ..
                } => self.read_trait(&Atom::Object(holder.clone()), Some(&holder), &binding)?,
                Lookup::Dynamic { holder, name } => {
                    holder.borrow().get_dynamic(name).cloned().unwrap_or_default()
                }
                Lookup::Element { .. } => self.get_prop(receiver, mn)?,
                Lookup::NotFound => {
                    if object.borrow().is_sealed() {
                        return Err(self.not_found(mn, receiver));
                    }
                    Atom::Undefined
                }
            },
            Atom::Null | Atom::Undefined | Atom::Invalid => {
                return Err(self.null_receiver(receiver));
            }
            _ => {
                let declared = self.primitive_class(receiver).and_then(|class| {
                    let layout = &self.classes[class.0 as usize].def.instance_layout;
                    match layout.find(mn) {
                        Some((_, BoundTrait::Method(method))) => Some(*method),
                        _ => None,
                    }
                });
                if let Some(method) = declared {
                    return self.invoke_binding(&method, receiver.clone(), args);
                }
                self.get_primitive_prop(receiver, mn)?
            }
        };
        if !self.is_callable(&function) {
            let name = mn.display(&self.strings);
            return Err(self.throw(ErrorKind::TypeError, 1006, &[&name]));
        }
        let this = if lex { Atom::Null } else { receiver.clone() };
        self.call_value(&function, this, args)
    }

    // ── Scope search ──────────────────────────────────────────────────

    /// `findproperty`/`findpropstrict`: the innermost scope object that
    /// has `mn`, then the holder of a matching domain definition.
    ///
    /// Plain scope entries only match declared traits; `with` entries and
    /// the outermost (global) entry match any property.
    pub(crate) fn find_property(
        &mut self,
        frame: &Activation,
        mn: &Multiname,
        strict: bool,
    ) -> Result<Atom, VmError> {
        let outer = frame.outer.len();
        for i in (0..outer + frame.scope.len()).rev() {
            let scope = if i < outer {
                frame.outer.get(i)
            } else {
                frame.scope.get(i - outer)
            };
            let Some(scope) = scope else {
                continue;
            };
            let found = if scope.with || i == 0 {
                has_property(&scope.object, mn, &self.strings)
            } else {
                resolve_declared(&scope.object, mn).is_some()
            };
            if found {
                return Ok(Atom::Object(scope.object.clone()));
            }
        }
        if let Some(holder) = self.find_definition_holder(mn)? {
            return Ok(Atom::Object(holder));
        }
        if strict {
            let name = mn.display(&self.strings);
            return Err(self.throw(ErrorKind::ReferenceError, 1065, &[&name]));
        }
        let global = frame
            .global()
            .unwrap_or_else(|| self.builtins.global.clone());
        Ok(Atom::Object(global))
    }
}
