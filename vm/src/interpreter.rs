//! The bytecode interpreter.
//!
//! [`Vm::execute`] runs one [`Activation`] to completion. Script errors
//! unwind to the innermost exception handler covering the faulting
//! instruction; when there is none they propagate to the caller's frame.
//! Everything that is not a [`VmError::Script`] skips handlers entirely.

use std::sync::{Arc, atomic::Ordering};

use bytecode::{Condition, Instruction};
use log::trace;
use object::{
    Atom, EnumKey, Layout, MethodId, MethodOwner, Multiname, Namespace, ObjectKind, ObjectRef,
    Scope, SlotType,
};

use crate::{ErrorKind, Vm, VmError, activation::Activation};

/// What the dispatch loop does after an instruction.
enum Flow {
    Next,
    Return(Atom),
}

impl Vm {
    pub(crate) fn execute(&mut self, mut frame: Activation) -> Result<Atom, VmError> {
        loop {
            match self.run(&mut frame) {
                Ok(value) => return Ok(value),
                Err(VmError::Script(value)) => {
                    let at = frame.pc.saturating_sub(1);
                    match self.find_handler(&frame, at, &value)? {
                        Some(target) => {
                            trace!("caught at {at}, resuming at {target}");
                            frame.stack.clear();
                            frame.scope.clear();
                            frame.push(value);
                            frame.pc = target;
                        }
                        None => return Err(VmError::Script(value)),
                    }
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// First handler, in table order, whose range covers instruction `at`
    /// and whose type accepts `value`.
    fn find_handler(
        &mut self,
        frame: &Activation,
        at: usize,
        value: &Atom,
    ) -> Result<Option<usize>, VmError> {
        let body = Arc::clone(&frame.body);
        for handler in &body.handlers {
            if at >= handler.from && at < handler.to && self.matches_slot_type(value, &handler.exc_type)? {
                return Ok(Some(handler.target));
            }
        }
        Ok(None)
    }

    fn run(&mut self, frame: &mut Activation) -> Result<Atom, VmError> {
        let body = Arc::clone(&frame.body);
        loop {
            let Some(inst) = body.code.get(frame.pc) else {
                return Err(VmError::verify(1020, &[]));
            };
            frame.pc += 1;
            if let Some(budget) = &mut self.budget {
                if *budget == 0 {
                    return Err(VmError::exhausted(1502));
                }
                *budget -= 1;
            }
            if self.settings.trace_execution {
                trace!(target: "avm2::exec", "{:>5} {inst}", frame.pc - 1);
            }
            if let Flow::Return(value) = self.step(frame, inst)? {
                return Ok(value);
            }
        }
    }

    /// Move to the instruction at byte offset `target`. Backward branches
    /// observe the cancellation flag.
    fn branch(&mut self, frame: &mut Activation, target: u32) -> Result<(), VmError> {
        let index = frame
            .body
            .index_of(target)
            .ok_or_else(|| VmError::verify(1021, &[]))?;
        if index < frame.pc && self.cancel.load(Ordering::Relaxed) {
            return Err(VmError::Cancelled);
        }
        frame.pc = index;
        Ok(())
    }

    /// The multiname at pool index `index`, completed with the runtime
    /// name and namespace popped from the stack.
    fn multiname(&mut self, frame: &mut Activation, index: u32) -> Result<Multiname, VmError> {
        let Some(mn) = frame.unit.multinames.get(index as usize) else {
            return Err(VmError::verify(1032, &[&index.to_string(), "multinames"]));
        };
        if !mn.is_runtime() {
            return Ok(mn.clone());
        }
        let mn = mn.clone();
        let name = if mn.has_runtime_name() {
            let value = frame.pop()?;
            Some(self.to_string_id(&value)?)
        } else {
            None
        };
        let ns = if mn.has_runtime_ns() {
            let value = frame.pop()?;
            Some(self.namespace_of(&value)?)
        } else {
            None
        };
        Ok(mn.bind(name, ns))
    }

    fn namespace_of(&mut self, value: &Atom) -> Result<Namespace, VmError> {
        if let Atom::Object(object) = value {
            if let ObjectKind::Namespace(ns) = object.borrow().kind {
                return Ok(ns);
            }
        }
        let from = self.describe_value(value);
        Err(self.throw(ErrorKind::TypeError, 1034, &[&from, "Namespace"]))
    }

    /// An object operand: `null` and `undefined` fail with the matching
    /// error, primitives with a coercion error.
    fn object_operand(&mut self, value: Atom) -> Result<ObjectRef, VmError> {
        match value {
            Atom::Object(object) => Ok(object),
            Atom::Null => Err(self.throw(ErrorKind::TypeError, 1009, &[])),
            Atom::Undefined | Atom::Invalid => Err(self.throw(ErrorKind::TypeError, 1010, &[])),
            other => {
                let from = self.describe_value(&other);
                Err(self.throw(ErrorKind::TypeError, 1034, &[&from, "Object"]))
            }
        }
    }

    fn condition(&mut self, cond: Condition, a: &Atom, b: &Atom) -> Result<bool, VmError> {
        Ok(match cond {
            Condition::Eq => self.loose_equals(a, b)?,
            Condition::Ne => !self.loose_equals(a, b)?,
            Condition::StrictEq => a.strict_equals(b),
            Condition::StrictNe => !a.strict_equals(b),
            Condition::Lt => self.less_than(a, b)? == Some(true),
            Condition::Le => self.less_than(b, a)? == Some(false),
            Condition::Gt => self.less_than(b, a)? == Some(true),
            Condition::Ge => self.less_than(a, b)? == Some(false),
            Condition::NotLt => self.less_than(a, b)? != Some(true),
            Condition::NotLe => self.less_than(b, a)? != Some(false),
            Condition::NotGt => self.less_than(b, a)? != Some(true),
            Condition::NotGe => self.less_than(a, b)? != Some(false),
        })
    }

    /// Pop two operands and apply a numeric operator to their primitive
    /// numeric values.
    fn binary_numeric(
        &mut self,
        frame: &mut Activation,
        op: fn(&Atom, &Atom, &object::StringTable) -> Atom,
    ) -> Result<(), VmError> {
        let b = frame.pop()?;
        let a = frame.pop()?;
        let a = self.to_numeric(&a)?;
        let b = self.to_numeric(&b)?;
        frame.push(op(&a, &b, &self.strings));
        Ok(())
    }

    fn binary_int(&mut self, frame: &mut Activation, op: fn(i32, i32) -> i32) -> Result<(), VmError> {
        let b = frame.pop()?;
        let a = frame.pop()?;
        let a = self.to_int32(&a)?;
        let b = self.to_int32(&b)?;
        frame.push(Atom::Int(op(a, b)));
        Ok(())
    }

    /// `obj[index]` on an array with an in-range numeric index, without
    /// going through name resolution.
    fn element_get(&self, frame: &Activation, index: u32) -> Option<Atom> {
        let mn = frame.unit.multinames.get(index as usize)?;
        if !mn.has_runtime_name() || mn.has_runtime_ns() || !mn.ns.allows_public() {
            return None;
        }
        let [.., Atom::Object(object), key] = frame.stack.as_slice() else {
            return None;
        };
        let at = array_index(key)?;
        let object = object.borrow();
        match object.as_array()?.get(at) {
            Some(Atom::Invalid) | None => None,
            Some(value) => Some(value.clone()),
        }
    }

    fn element_set(&self, frame: &Activation, index: u32) -> bool {
        let Some(mn) = frame.unit.multinames.get(index as usize) else {
            return false;
        };
        if !mn.has_runtime_name() || mn.has_runtime_ns() || !mn.ns.allows_public() {
            return false;
        }
        let [.., Atom::Object(object), key, value] = frame.stack.as_slice() else {
            return false;
        };
        let Some(at) = array_index(key) else {
            return false;
        };
        let mut object = object.borrow_mut();
        match object.as_array_mut().and_then(|items| items.get_mut(at)) {
            Some(slot) => {
                *slot = value.clone();
                true
            }
            None => false,
        }
    }

    fn slot_type_of(object: &ObjectRef, index: u32) -> SlotType {
        match object.borrow().layout.slot(index) {
            Some((_, object::BoundTrait::Slot { ty, .. })) => *ty,
            _ => SlotType::Any,
        }
    }

    fn has_next(&self, object: &Atom, index: u32) -> u32 {
        match object {
            Atom::Object(object) => object.borrow().next_enumerable(index),
            _ => 0,
        }
    }

    fn step(&mut self, frame: &mut Activation, inst: &Instruction) -> Result<Flow, VmError> {
        match *inst {
            Instruction::Bkpt
            | Instruction::Nop
            | Instruction::Label
            | Instruction::Debug { .. }
            | Instruction::DebugLine { .. }
            | Instruction::DebugFile { .. } => {}

            Instruction::Throw => {
                let value = frame.pop()?;
                return Err(VmError::Script(value));
            }
            Instruction::Kill { reg } => frame.set_local(reg, Atom::Undefined)?,

            // ── Control flow ──────────────────────────────────────────
            Instruction::Jump { target } => self.branch(frame, target)?,
            Instruction::IfTrue { target } => {
                if frame.pop()?.to_boolean() {
                    self.branch(frame, target)?;
                }
            }
            Instruction::IfFalse { target } => {
                if !frame.pop()?.to_boolean() {
                    self.branch(frame, target)?;
                }
            }
            Instruction::If { cond, target } => {
                let b = frame.pop()?;
                let a = frame.pop()?;
                if self.condition(cond, &a, &b)? {
                    self.branch(frame, target)?;
                }
            }
            Instruction::LookupSwitch {
                default,
                ref cases,
            } => {
                let value = frame.pop()?;
                let index = self.to_int32(&value)?;
                let target = usize::try_from(index)
                    .ok()
                    .and_then(|i| cases.get(i).copied())
                    .unwrap_or(default);
                self.branch(frame, target)?;
            }
            Instruction::ReturnVoid => return Ok(Flow::Return(Atom::Undefined)),
            Instruction::ReturnValue => return Ok(Flow::Return(frame.pop()?)),

            // ── Scopes ────────────────────────────────────────────────
            Instruction::PushScope => {
                let value = frame.pop()?;
                let object = self.object_operand(value)?;
                frame.scope.push(Scope::new(object));
            }
            Instruction::PushWith => {
                let value = frame.pop()?;
                let object = self.object_operand(value)?;
                frame.scope.push(Scope::with(object));
            }
            Instruction::PopScope => {
                frame.scope.pop().ok_or_else(|| VmError::verify(1024, &[]))?;
            }
            Instruction::GetGlobalScope => {
                let global = frame
                    .global()
                    .unwrap_or_else(|| self.builtins.global.clone());
                frame.push(Atom::Object(global));
            }
            Instruction::GetScopeObject { index } => {
                let object = frame.scope_object(index as usize)?;
                frame.push(Atom::Object(object));
            }

            // ── Enumeration ───────────────────────────────────────────
            Instruction::HasNext => {
                let index = frame.pop()?;
                let object = frame.pop()?;
                let index = self.to_uint32(&index)?;
                let next = self.has_next(&object, index);
                frame.push(Atom::from_uint(next));
            }
            Instruction::HasNext2 {
                object_reg,
                index_reg,
            } => {
                let mut object = frame.local(object_reg)?.clone();
                let index = frame.local(index_reg)?.clone();
                let mut index = self.to_uint32(&index)?;
                loop {
                    index = self.has_next(&object, index);
                    if index != 0 {
                        break;
                    }
                    let proto = match &object {
                        Atom::Object(o) => o.borrow().proto.clone(),
                        _ => None,
                    };
                    match proto {
                        Some(proto) => object = Atom::Object(proto),
                        None => {
                            object = Atom::Null;
                            break;
                        }
                    }
                }
                frame.set_local(object_reg, object)?;
                frame.set_local(index_reg, Atom::from_uint(index))?;
                frame.push(Atom::Bool(index != 0));
            }
            Instruction::NextName => {
                let index = frame.pop()?;
                let object = frame.pop()?;
                let index = self.to_uint32(&index)?;
                let key = match &object {
                    Atom::Object(o) => o.borrow().key_at(index),
                    _ => None,
                };
                frame.push(match key {
                    Some(EnumKey::Index(i)) => Atom::from_uint(i),
                    Some(EnumKey::Name(name)) => Atom::String(name),
                    None => Atom::Undefined,
                });
            }
            Instruction::NextValue => {
                let index = frame.pop()?;
                let object = frame.pop()?;
                let index = self.to_uint32(&index)?;
                let value = match &object {
                    Atom::Object(o) => o.borrow().value_at(index),
                    _ => Atom::Undefined,
                };
                frame.push(match value {
                    Atom::Invalid => Atom::Undefined,
                    value => value,
                });
            }

            // ── Constants and stack ───────────────────────────────────
            Instruction::PushNull => frame.push(Atom::Null),
            Instruction::PushUndefined => frame.push(Atom::Undefined),
            Instruction::PushTrue => frame.push(Atom::Bool(true)),
            Instruction::PushFalse => frame.push(Atom::Bool(false)),
            Instruction::PushNaN => frame.push(Atom::Number(f64::NAN)),
            Instruction::PushByte { value } => frame.push(Atom::Int(i32::from(value))),
            Instruction::PushShort { value } => frame.push(Atom::Int(i32::from(value))),
            Instruction::PushString { index } => {
                let id = frame.unit.strings[index as usize];
                frame.push(Atom::String(id));
            }
            Instruction::PushInt { index } => {
                let value = frame.unit.ints[index as usize];
                frame.push(Atom::Int(value));
            }
            Instruction::PushUInt { index } => {
                let value = frame.unit.uints[index as usize];
                frame.push(Atom::from_uint(value));
            }
            Instruction::PushDouble { index } => {
                let value = frame.unit.doubles[index as usize];
                frame.push(Atom::from_number(value));
            }
            Instruction::PushNamespace { index } => {
                let ns = frame.unit.namespaces[index as usize];
                let object = self.new_namespace(ns);
                frame.push(Atom::Object(object));
            }
            Instruction::Pop => {
                frame.pop()?;
            }
            Instruction::Dup => {
                let top = frame.peek()?.clone();
                frame.push(top);
            }
            Instruction::Swap => {
                let b = frame.pop()?;
                let a = frame.pop()?;
                frame.push(b);
                frame.push(a);
            }

            // ── Calls ─────────────────────────────────────────────────
            Instruction::NewFunction { method } => {
                let id = MethodId::Script {
                    unit: frame.unit.index,
                    index: method,
                };
                let closure = self.new_closure(id, MethodOwner::Free, frame.capture(), None);
                frame.push(Atom::Object(closure));
            }
            Instruction::Call { argc } => {
                let args = frame.pop_args(argc)?;
                let this = frame.pop()?;
                let function = frame.pop()?;
                let result = self.call_value(&function, this, &args)?;
                frame.push(result);
            }
            Instruction::Construct { argc } => {
                let args = frame.pop_args(argc)?;
                let callee = frame.pop()?;
                let result = self.construct_value(&callee, &args)?;
                frame.push(result);
            }
            Instruction::CallMethod { disp_id, argc } => {
                let args = frame.pop_args(argc)?;
                let receiver = frame.pop()?;
                let result = self.call_method(&receiver, disp_id, &args)?;
                frame.push(result);
            }
            Instruction::CallStatic { method, argc } => {
                let args = frame.pop_args(argc)?;
                let receiver = frame.pop()?;
                let result = self.call_static(frame, method, receiver, &args)?;
                frame.push(result);
            }
            Instruction::CallSuper { name, argc } | Instruction::CallSuperVoid { name, argc } => {
                let args = frame.pop_args(argc)?;
                let mn = self.multiname(frame, name)?;
                let receiver = frame.pop()?;
                let result = self.call_super(frame.class, &receiver, &mn, &args)?;
                if matches!(inst, Instruction::CallSuper { .. }) {
                    frame.push(result);
                }
            }
            Instruction::CallProperty { name, argc }
            | Instruction::CallPropLex { name, argc }
            | Instruction::CallPropVoid { name, argc } => {
                let args = frame.pop_args(argc)?;
                let mn = self.multiname(frame, name)?;
                let receiver = frame.pop()?;
                let lex = matches!(inst, Instruction::CallPropLex { .. });
                let result = self.call_prop(&receiver, &mn, &args, lex)?;
                if !matches!(inst, Instruction::CallPropVoid { .. }) {
                    frame.push(result);
                }
            }
            Instruction::ConstructSuper { argc } => {
                let args = frame.pop_args(argc)?;
                let receiver = frame.pop()?;
                self.construct_super(frame.class, receiver, &args)?;
            }
            Instruction::ConstructProp { name, argc } => {
                let args = frame.pop_args(argc)?;
                let mn = self.multiname(frame, name)?;
                let receiver = frame.pop()?;
                let callee = self.get_prop(&receiver, &mn)?;
                let result = self.construct_value(&callee, &args)?;
                frame.push(result);
            }

            // ── Object creation ───────────────────────────────────────
            Instruction::NewObject { argc } => {
                let pairs = frame.pop_args(argc * 2)?;
                let object = self.alloc_object();
                for pair in pairs.chunks_exact(2) {
                    let name = self.to_string_id(&pair[0])?;
                    let stored = object.borrow_mut().set_dynamic(name, pair[1].clone());
                    stored.map_err(|e| VmError::Internal(e.to_string()))?;
                }
                frame.push(Atom::Object(object));
            }
            Instruction::NewArray { argc } => {
                let items = frame.pop_args(argc)?;
                let array = self.alloc_array(items);
                frame.push(Atom::Object(array));
            }
            Instruction::NewActivation => {
                let layout = frame
                    .body
                    .activation
                    .clone()
                    .unwrap_or_else(|| Arc::new(Layout::new()));
                let object = self.alloc_scope_object(&layout);
                frame.push(Atom::Object(object));
            }
            Instruction::NewClass { class } => {
                let base = frame.pop()?;
                let unit = Arc::clone(&frame.unit);
                let object = self.new_class(&unit, class, base, frame.capture())?;
                frame.push(Atom::Object(object));
            }
            Instruction::NewCatch { index } => {
                let layout = Arc::clone(&frame.body.handlers[index as usize].catch_layout);
                let object = self.alloc_scope_object(&layout);
                frame.push(Atom::Object(object));
            }

            // ── Properties ────────────────────────────────────────────
            Instruction::FindPropStrict { name } | Instruction::FindProperty { name } => {
                let mn = self.multiname(frame, name)?;
                let strict = matches!(inst, Instruction::FindPropStrict { .. });
                let holder = self.find_property(frame, &mn, strict)?;
                frame.push(holder);
            }
            Instruction::FindDef { name } => {
                let mn = self.multiname(frame, name)?;
                match self.find_definition_holder(&mn)? {
                    Some(holder) => frame.push(Atom::Object(holder)),
                    None => {
                        let name = mn.display(&self.strings);
                        return Err(self.throw(ErrorKind::ReferenceError, 1065, &[&name]));
                    }
                }
            }
            Instruction::GetLex { name } => {
                let mn = self.multiname(frame, name)?;
                let holder = self.find_property(frame, &mn, true)?;
                let value = self.get_prop(&holder, &mn)?;
                frame.push(value);
            }
            Instruction::GetProperty { name } => {
                if let Some(value) = self.element_get(frame, name) {
                    frame.pop()?;
                    frame.pop()?;
                    frame.push(value);
                } else {
                    let mn = self.multiname(frame, name)?;
                    let receiver = frame.pop()?;
                    let value = self.get_prop(&receiver, &mn)?;
                    frame.push(value);
                }
            }
            Instruction::SetProperty { name } => {
                if self.element_set(frame, name) {
                    frame.pop_args(3)?;
                } else {
                    let value = frame.pop()?;
                    let mn = self.multiname(frame, name)?;
                    let receiver = frame.pop()?;
                    self.set_prop(&receiver, &mn, value)?;
                }
            }
            Instruction::InitProperty { name } => {
                let value = frame.pop()?;
                let mn = self.multiname(frame, name)?;
                let receiver = frame.pop()?;
                self.init_prop(&receiver, &mn, value)?;
            }
            Instruction::DeleteProperty { name } => {
                let mn = self.multiname(frame, name)?;
                let receiver = frame.pop()?;
                let deleted = self.delete_prop(&receiver, &mn)?;
                frame.push(Atom::Bool(deleted));
            }
            Instruction::GetSuper { name } => {
                let mn = self.multiname(frame, name)?;
                let receiver = frame.pop()?;
                let value = self.get_super(frame.class, &receiver, &mn)?;
                frame.push(value);
            }
            Instruction::SetSuper { name } => {
                let value = frame.pop()?;
                let mn = self.multiname(frame, name)?;
                let receiver = frame.pop()?;
                self.set_super(frame.class, &receiver, &mn, value)?;
            }
            Instruction::GetSlot { slot } => {
                let value = frame.pop()?;
                let object = self.object_operand(value)?;
                let value = self.read_slot(&object, slot)?;
                frame.push(value);
            }
            Instruction::SetSlot { slot } => {
                let value = frame.pop()?;
                let target = frame.pop()?;
                let object = self.object_operand(target)?;
                self.write_slot(&object, slot, value)?;
            }
            Instruction::GetGlobalSlot { slot } => {
                let global = frame.global().ok_or_else(|| VmError::verify(1024, &[]))?;
                let value = self.read_slot(&global, slot)?;
                frame.push(value);
            }
            Instruction::SetGlobalSlot { slot } => {
                let value = frame.pop()?;
                let global = frame.global().ok_or_else(|| VmError::verify(1024, &[]))?;
                self.write_slot(&global, slot, value)?;
            }

            // ── Registers ─────────────────────────────────────────────
            Instruction::GetLocal { reg } => {
                let value = frame.local(reg)?.clone();
                frame.push(value);
            }
            Instruction::SetLocal { reg } => {
                let value = frame.pop()?;
                frame.set_local(reg, value)?;
            }
            Instruction::IncLocal { reg } | Instruction::DecLocal { reg } => {
                let value = frame.local(reg)?.clone();
                let n = self.to_number(&value)?;
                let delta = if matches!(inst, Instruction::IncLocal { .. }) { 1.0 } else { -1.0 };
                frame.set_local(reg, Atom::from_number(n + delta))?;
            }
            Instruction::IncLocalI { reg } | Instruction::DecLocalI { reg } => {
                let value = frame.local(reg)?.clone();
                let n = self.to_int32(&value)?;
                let delta = if matches!(inst, Instruction::IncLocalI { .. }) { 1 } else { -1 };
                frame.set_local(reg, Atom::Int(n.wrapping_add(delta)))?;
            }

            // ── Conversions and type tests ────────────────────────────
            Instruction::ConvertS => {
                let value = frame.pop()?;
                let id = self.to_string_id(&value)?;
                frame.push(Atom::String(id));
            }
            Instruction::CoerceS => {
                let value = frame.pop()?;
                let value = self.coerce(value, &SlotType::String)?;
                frame.push(value);
            }
            Instruction::ConvertI | Instruction::CoerceI => {
                let value = frame.pop()?;
                let value = self.coerce(value, &SlotType::Int)?;
                frame.push(value);
            }
            Instruction::ConvertU | Instruction::CoerceU => {
                let value = frame.pop()?;
                let value = self.coerce(value, &SlotType::UInt)?;
                frame.push(value);
            }
            Instruction::ConvertD | Instruction::CoerceD => {
                let value = frame.pop()?;
                let value = self.coerce(value, &SlotType::Number)?;
                frame.push(value);
            }
            Instruction::ConvertB | Instruction::CoerceB => {
                let value = frame.pop()?;
                frame.push(Atom::Bool(value.to_boolean()));
            }
            Instruction::ConvertO => {
                let value = frame.pop()?;
                if value.is_nullish() {
                    let code = if value.is_null() { 1009 } else { 1010 };
                    return Err(self.throw(ErrorKind::TypeError, code, &[]));
                }
                frame.push(value);
            }
            Instruction::CoerceO => {
                let value = frame.pop()?;
                frame.push(match value {
                    Atom::Undefined | Atom::Invalid => Atom::Null,
                    value => value,
                });
            }
            Instruction::CoerceA => {
                let value = frame.pop()?;
                let value = self.coerce(value, &SlotType::Any)?;
                frame.push(value);
            }
            Instruction::Coerce { name } => {
                let value = frame.pop()?;
                let ty = self.type_operand(frame, name)?;
                let value = self.coerce(value, &ty)?;
                frame.push(value);
            }
            Instruction::AsType { name } | Instruction::IsType { name } => {
                let value = frame.pop()?;
                let ty = self.type_operand(frame, name)?;
                let matches = self.matches_type(&value, &ty)?;
                if matches!(inst, Instruction::IsType { .. }) {
                    frame.push(Atom::Bool(matches));
                } else {
                    frame.push(if matches { value } else { Atom::Null });
                }
            }
            Instruction::AsTypeLate | Instruction::IsTypeLate => {
                let class = frame.pop()?;
                let value = frame.pop()?;
                let class = match &class {
                    Atom::Object(object) => object.borrow().as_class(),
                    _ => None,
                };
                let Some(class) = class else {
                    return Err(self.throw(ErrorKind::TypeError, 1041, &[]));
                };
                let matches = self.is_type(&value, class);
                if matches!(inst, Instruction::IsTypeLate) {
                    frame.push(Atom::Bool(matches));
                } else {
                    frame.push(if matches { value } else { Atom::Null });
                }
            }
            Instruction::InstanceOf => {
                let rhs = frame.pop()?;
                let value = frame.pop()?;
                let result = self.instance_of(&value, &rhs)?;
                frame.push(Atom::Bool(result));
            }
            Instruction::In => {
                let object = frame.pop()?;
                let name = frame.pop()?;
                let name = self.to_string_id(&name)?;
                let found = self.has_prop(&object, &Multiname::public(name))?;
                frame.push(Atom::Bool(found));
            }
            Instruction::TypeOf => {
                let value = frame.pop()?;
                let name = self.strings.intern(self.type_of(&value));
                frame.push(Atom::String(name));
            }

            // ── Arithmetic ────────────────────────────────────────────
            Instruction::Add => {
                let b = frame.pop()?;
                let a = frame.pop()?;
                let sum = match (&a, &b) {
                    (Atom::Int(x), Atom::Int(y)) => Atom::from_i64(i64::from(*x) + i64::from(*y)),
                    _ => self.add_values(&a, &b)?,
                };
                frame.push(sum);
            }
            Instruction::Subtract => self.binary_numeric(frame, Atom::subtract)?,
            Instruction::Multiply => self.binary_numeric(frame, Atom::multiply)?,
            Instruction::Divide => self.binary_numeric(frame, Atom::divide)?,
            Instruction::Modulo => self.binary_numeric(frame, Atom::modulo)?,
            Instruction::LShift => self.binary_numeric(frame, Atom::lshift)?,
            Instruction::RShift => self.binary_numeric(frame, Atom::rshift)?,
            Instruction::URShift => self.binary_numeric(frame, Atom::urshift)?,
            Instruction::BitAnd => self.binary_numeric(frame, Atom::bit_and)?,
            Instruction::BitOr => self.binary_numeric(frame, Atom::bit_or)?,
            Instruction::BitXor => self.binary_numeric(frame, Atom::bit_xor)?,
            Instruction::Negate => {
                let value = frame.pop()?;
                let n = self.to_number(&value)?;
                frame.push(Atom::from_number(-n));
            }
            Instruction::Increment | Instruction::Decrement => {
                let value = frame.pop()?;
                let n = self.to_number(&value)?;
                let delta = if matches!(inst, Instruction::Increment) { 1.0 } else { -1.0 };
                frame.push(Atom::from_number(n + delta));
            }
            Instruction::Not => {
                let value = frame.pop()?;
                frame.push(Atom::Bool(!value.to_boolean()));
            }
            Instruction::BitNot => {
                let value = frame.pop()?;
                let n = self.to_int32(&value)?;
                frame.push(Atom::Int(!n));
            }
            Instruction::IncrementI | Instruction::DecrementI => {
                let value = frame.pop()?;
                let n = self.to_int32(&value)?;
                let delta = if matches!(inst, Instruction::IncrementI) { 1 } else { -1 };
                frame.push(Atom::Int(n.wrapping_add(delta)));
            }
            Instruction::NegateI => {
                let value = frame.pop()?;
                let n = self.to_int32(&value)?;
                frame.push(Atom::Int(n.wrapping_neg()));
            }
            Instruction::AddI => self.binary_int(frame, i32::wrapping_add)?,
            Instruction::SubtractI => self.binary_int(frame, i32::wrapping_sub)?,
            Instruction::MultiplyI => self.binary_int(frame, i32::wrapping_mul)?,

            // ── Comparison ────────────────────────────────────────────
            Instruction::Equals => {
                let b = frame.pop()?;
                let a = frame.pop()?;
                let equal = self.loose_equals(&a, &b)?;
                frame.push(Atom::Bool(equal));
            }
            Instruction::StrictEquals => {
                let b = frame.pop()?;
                let a = frame.pop()?;
                frame.push(Atom::Bool(a.strict_equals(&b)));
            }
            Instruction::LessThan => {
                let b = frame.pop()?;
                let a = frame.pop()?;
                let result = self.condition(Condition::Lt, &a, &b)?;
                frame.push(Atom::Bool(result));
            }
            Instruction::LessEquals => {
                let b = frame.pop()?;
                let a = frame.pop()?;
                let result = self.condition(Condition::Le, &a, &b)?;
                frame.push(Atom::Bool(result));
            }
            Instruction::GreaterThan => {
                let b = frame.pop()?;
                let a = frame.pop()?;
                let result = self.condition(Condition::Gt, &a, &b)?;
                frame.push(Atom::Bool(result));
            }
            Instruction::GreaterEquals => {
                let b = frame.pop()?;
                let a = frame.pop()?;
                let result = self.condition(Condition::Ge, &a, &b)?;
                frame.push(Atom::Bool(result));
            }
        }
        Ok(Flow::Next)
    }

    // ── Operand helpers ───────────────────────────────────────────────

    /// Declared type named by multiname `index`, for `coerce`, `astype`
    /// and `istype`.
    fn type_operand(&mut self, frame: &Activation, index: u32) -> Result<SlotType, VmError> {
        let Some(qname) = frame
            .unit
            .multinames
            .get(index as usize)
            .and_then(Multiname::as_qname)
        else {
            return Err(VmError::verify(1033, &[&index.to_string()]));
        };
        if &*self.strings.get(qname.name) == "*" {
            return Ok(SlotType::Any);
        }
        Ok(SlotType::Class(qname))
    }

    fn matches_type(&mut self, value: &Atom, ty: &SlotType) -> Result<bool, VmError> {
        match ty {
            SlotType::Class(qname) => {
                let class = self.class_of_type(qname)?;
                Ok(self.is_type(value, class))
            }
            other => self.matches_slot_type(value, other),
        }
    }

    /// `getslot`: slot ids are 1-based.
    fn read_slot(&mut self, object: &ObjectRef, slot: u32) -> Result<Atom, VmError> {
        let value = slot
            .checked_sub(1)
            .and_then(|index| object.borrow().slot(index).cloned());
        match value {
            Some(value) => Ok(value),
            None => {
                let len = object.borrow().slots.len().to_string();
                Err(self.throw(ErrorKind::RangeError, 1125, &[&slot.to_string(), &len]))
            }
        }
    }

    fn write_slot(&mut self, object: &ObjectRef, slot: u32, value: Atom) -> Result<(), VmError> {
        let Some(index) = slot.checked_sub(1) else {
            return Err(self.throw(ErrorKind::RangeError, 1125, &["0", "0"]));
        };
        let ty = Self::slot_type_of(object, index);
        let value = self.coerce(value, &ty)?;
        let stored = object.borrow_mut().set_slot(index, value);
        if stored.is_err() {
            let len = object.borrow().slots.len().to_string();
            return Err(self.throw(ErrorKind::RangeError, 1125, &[&slot.to_string(), &len]));
        }
        Ok(())
    }

    /// A `Namespace` object wrapping `ns`.
    pub(crate) fn new_namespace(&mut self, ns: Namespace) -> ObjectRef {
        let entry = &self.classes[self.builtins.namespace.0 as usize];
        self.heap.alloc(object::ScriptObject::instance(
            Arc::clone(&entry.def),
            Some(entry.prototype.clone()),
            ObjectKind::Namespace(ns),
        ))
    }
}

/// Element index named by a numeric atom.
fn array_index(key: &Atom) -> Option<usize> {
    match *key {
        Atom::Int(i) => usize::try_from(i).ok(),
        Atom::UInt(u) => Some(u as usize),
        Atom::Number(n) if n >= 0.0 && n.fract() == 0.0 && n < u32::MAX as f64 => Some(n as usize),
        _ => None,
    }
}
