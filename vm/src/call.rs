//! Method invocation: argument binding, closures, `super` access and the
//! dispatch between the interpreter, natives and compiled code.

use std::sync::{Arc, atomic::Ordering};

use bytecode::MethodFlags;
use log::{debug, trace};
use object::{
    Atom, BoundTrait, ClassId, FunctionObject, MethodBinding, MethodId, MethodOwner, Multiname,
    ObjectKind, ObjectRef, Scope, ScopeChain, ScriptObject, check_write,
};

use crate::{
    ErrorKind, Vm, VmError,
    activation::Activation,
    codegen::{CompileRequest, CompiledMethod},
    loader::{BodyDesc, LoadedUnit, MethodDesc, TraitDesc, TraitDescKind},
};

enum Callee {
    Function(FunctionObject),
    Class(ClassId),
}

impl Vm {
    fn enter(&mut self) -> Result<(), VmError> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(VmError::Cancelled);
        }
        if self.depth >= self.settings.max_recursion {
            return Err(VmError::exhausted(1023));
        }
        self.depth += 1;
        Ok(())
    }

    /// Run `method` with `this`, `args`, the outer scope `scope` and the
    /// class whose `super` it sees.
    pub(crate) fn invoke(
        &mut self,
        method: MethodId,
        this: Atom,
        args: &[Atom],
        scope: ScopeChain,
        class: Option<ClassId>,
    ) -> Result<Atom, VmError> {
        self.enter()?;
        let result = match method {
            MethodId::Native(n) => match self.natives.get(n as usize).copied() {
                Some(native) => (native.func)(self, &this, args),
                None => Err(VmError::Internal(format!("no native method {n}"))),
            },
            MethodId::Script { unit, index } => {
                self.invoke_script(unit, index, this, args, scope, class)
            }
        };
        self.depth -= 1;
        result
    }

    fn invoke_script(
        &mut self,
        unit: u32,
        index: u32,
        this: Atom,
        args: &[Atom],
        scope: ScopeChain,
        class: Option<ClassId>,
    ) -> Result<Atom, VmError> {
        let unit = self
            .units
            .get(unit as usize)
            .cloned()
            .ok_or_else(|| VmError::Internal(format!("no unit {unit}")))?;
        let Some(info) = unit.methods.get(index as usize) else {
            return Err(VmError::Internal(format!("no method {index}")));
        };
        let Some(body) = info.body.clone() else {
            let name = self.strings.get(info.name).to_string();
            return Err(self.throw(ErrorKind::Error, 1001, &[&name]));
        };
        let locals = self.bind_arguments(info, &body, this, args)?;

        if let Some(compiled) = self.compiled_method(&unit, index, info, &body) {
            let params: Vec<f64> = locals[1..=info.params.len()]
                .iter()
                .map(|value| value.as_f64().unwrap_or(f64::NAN))
                .collect();
            trace!("native call {}", self.strings.get(info.name));
            return match compiled.run(&params, &self.cancel) {
                Some(value) => self.coerce(Atom::from_number(value), &info.return_type),
                None => Err(VmError::Cancelled),
            };
        }

        let frame = Activation::new(Arc::clone(&unit), body, locals, scope, class);
        let value = self.execute(frame)?;
        self.coerce(value, &info.return_type)
    }

    /// Registers for a call: `this`, the coerced declared parameters with
    /// defaults filled in, then the rest or `arguments` array.
    fn bind_arguments(
        &mut self,
        info: &MethodDesc,
        body: &BodyDesc,
        this: Atom,
        args: &[Atom],
    ) -> Result<Vec<Atom>, VmError> {
        let declared = info.params.len();
        let required = info.required_params();
        let rest = info.flags.contains(MethodFlags::NEED_REST);
        let arguments = info.flags.contains(MethodFlags::NEED_ARGUMENTS);
        if args.len() < required || (args.len() > declared && !rest && !arguments) {
            let name = format!("{}()", self.strings.get(info.name));
            let expected = if args.len() < required { required } else { declared };
            return Err(self.throw(
                ErrorKind::ArgumentError,
                1063,
                &[&name, &expected.to_string(), &args.len().to_string()],
            ));
        }

        let mut locals = Vec::with_capacity(body.local_count as usize);
        locals.push(this);
        for (i, ty) in info.params.iter().enumerate() {
            let value = match args.get(i) {
                Some(value) => value.clone(),
                None => info.optional[i - required].clone(),
            };
            locals.push(self.coerce(value, ty)?);
        }
        if rest {
            let extra = args.get(declared..).unwrap_or_default().to_vec();
            locals.push(Atom::Object(self.alloc_array(extra)));
        } else if arguments {
            locals.push(Atom::Object(self.alloc_array(args.to_vec())));
        }
        locals.resize(body.local_count as usize, Atom::Undefined);
        Ok(locals)
    }

    /// Compiled code for a method, asking the backend on first use.
    fn compiled_method(
        &mut self,
        unit: &LoadedUnit,
        index: u32,
        info: &MethodDesc,
        body: &BodyDesc,
    ) -> Option<Arc<CompiledMethod>> {
        if !self.settings.native_code || self.budget.is_some() {
            return None;
        }
        let key = (unit.index, index);
        if let Some(entry) = self.compiled.get(&key) {
            return entry.clone();
        }
        let name = self.strings.get(info.name);
        let handler_targets: Vec<usize> = body.handlers.iter().map(|h| h.target).collect();
        let request = CompileRequest {
            name: &name,
            code: &body.code,
            offsets: &body.offsets,
            params: &info.params,
            return_type: info.return_type,
            local_count: body.local_count,
            flags: info.flags,
            handler_targets: &handler_targets,
            has_activation: body.activation.is_some(),
            ints: &unit.ints,
            uints: &unit.uints,
            doubles: &unit.doubles,
            multinames: &unit.multinames,
        };
        let compiled = self.backend.compile(&request).map(Arc::new);
        if compiled.is_some() {
            debug!("{} compiled {}", self.backend.name(), name);
        }
        self.compiled.insert(key, compiled.clone());
        compiled
    }

    // ── Bindings and closures ─────────────────────────────────────────

    /// Outer scope of methods bound with `owner`.
    pub(crate) fn scope_for(&mut self, owner: MethodOwner) -> Result<ScopeChain, VmError> {
        Ok(match owner {
            MethodOwner::Instance(id) | MethodOwner::Static(id) => {
                self.classes[id.0 as usize].scope.clone()
            }
            MethodOwner::Script(id) => {
                let global = self.script_global(id)?;
                ScopeChain::from_scopes(vec![Scope::new(global)])
            }
            MethodOwner::Free => ScopeChain::new(),
        })
    }

    pub(crate) fn invoke_binding(
        &mut self,
        binding: &MethodBinding,
        this: Atom,
        args: &[Atom],
    ) -> Result<Atom, VmError> {
        let scope = match binding.method {
            MethodId::Native(_) => ScopeChain::new(),
            MethodId::Script { .. } => self.scope_for(binding.owner)?,
        };
        self.invoke(binding.method, this, args, scope, binding.class())
    }

    pub(crate) fn new_closure(
        &mut self,
        method: MethodId,
        owner: MethodOwner,
        scope: ScopeChain,
        receiver: Option<Atom>,
    ) -> ObjectRef {
        let entry = &self.classes[self.builtins.function.0 as usize];
        self.heap.alloc(ScriptObject::instance(
            Arc::clone(&entry.def),
            Some(entry.prototype.clone()),
            ObjectKind::Function(FunctionObject {
                method,
                owner,
                scope,
                receiver,
            }),
        ))
    }

    /// A method closure: `binding` with `this` fixed to `receiver`.
    pub(crate) fn bind_method(
        &mut self,
        binding: &MethodBinding,
        receiver: Atom,
    ) -> Result<ObjectRef, VmError> {
        let scope = match binding.method {
            MethodId::Native(_) => ScopeChain::new(),
            MethodId::Script { .. } => self.scope_for(binding.owner)?,
        };
        Ok(self.new_closure(binding.method, binding.owner, scope, Some(receiver)))
    }

    /// Fill the slots of `Function` traits with closures over `scope`.
    pub(crate) fn init_function_slots(
        &mut self,
        target: &ObjectRef,
        unit: u32,
        traits: &[TraitDesc],
        scope: &ScopeChain,
    ) -> Result<(), VmError> {
        for t in traits {
            let TraitDescKind::Function { method, .. } = t.kind else {
                continue;
            };
            let slot = match target.borrow().layout.get(&t.name) {
                Some(BoundTrait::Slot { index, .. }) => Some(*index),
                _ => None,
            };
            let Some(index) = slot else {
                continue;
            };
            let closure = self.new_closure(
                MethodId::Script {
                    unit,
                    index: method,
                },
                MethodOwner::Free,
                scope.clone(),
                None,
            );
            let stored = target.borrow_mut().set_slot(index, Atom::Object(closure));
            stored.map_err(|e| VmError::Internal(e.to_string()))?;
        }
        Ok(())
    }

    // ── Calling values ────────────────────────────────────────────────

    fn callee(value: &Atom) -> Option<Callee> {
        let Atom::Object(object) = value else {
            return None;
        };
        match &object.borrow().kind {
            ObjectKind::Function(function) => Some(Callee::Function(function.clone())),
            ObjectKind::Class(id) => Some(Callee::Class(*id)),
            _ => None,
        }
    }

    /// Call a function or class object. A function called with a nullish
    /// `this` gets the global of its captured scope instead.
    pub(crate) fn call_value(
        &mut self,
        callee: &Atom,
        this: Atom,
        args: &[Atom],
    ) -> Result<Atom, VmError> {
        match Self::callee(callee) {
            Some(Callee::Function(function)) => {
                let this = match function.receiver {
                    Some(receiver) => receiver,
                    None if this.is_nullish() => Atom::Object(
                        function
                            .scope
                            .global()
                            .cloned()
                            .unwrap_or_else(|| self.builtins.global.clone()),
                    ),
                    None => this,
                };
                let class = MethodBinding::new(function.method, function.owner).class();
                self.invoke(function.method, this, args, function.scope, class)
            }
            Some(Callee::Class(id)) => self.call_class(id, args),
            None => {
                let what = self.describe_value(callee);
                Err(self.throw(ErrorKind::TypeError, 1006, &[&what]))
            }
        }
    }

    /// A class called as a function: a conversion for builtins, a type
    /// coercion for everything else.
    fn call_class(&mut self, id: ClassId, args: &[Atom]) -> Result<Atom, VmError> {
        let entry = &self.classes[id.0 as usize];
        let (class, call) = (Atom::Object(entry.object.clone()), entry.call);
        if let Some(call) = call {
            return call(self, &class, args);
        }
        match args {
            [value] => self.coerce_to_class(value.clone(), id),
            _ => {
                let got = args.len().to_string();
                Err(self.throw(ErrorKind::ArgumentError, 1112, &[&got]))
            }
        }
    }

    pub(crate) fn construct_value(&mut self, callee: &Atom, args: &[Atom]) -> Result<Atom, VmError> {
        match Self::callee(callee) {
            Some(Callee::Class(id)) => self.construct_class(id, args),
            Some(Callee::Function(_)) => self.construct_function(callee, args),
            None => Err(self.throw(ErrorKind::TypeError, 1007, &[])),
        }
    }

    /// `new f()` for a plain function: a fresh object whose prototype is
    /// `f.prototype`, created on first use.
    fn construct_function(&mut self, callee: &Atom, args: &[Atom]) -> Result<Atom, VmError> {
        let Atom::Object(function) = callee else {
            return Err(self.throw(ErrorKind::TypeError, 1007, &[]));
        };
        let existing = function.borrow().get_dynamic(self.names.prototype).cloned();
        let prototype = match existing {
            Some(Atom::Object(prototype)) => prototype,
            _ => {
                let prototype = self.alloc_object();
                prototype
                    .borrow_mut()
                    .define_hidden(self.names.constructor, callee.clone());
                function
                    .borrow_mut()
                    .define_hidden(self.names.prototype, Atom::Object(prototype.clone()));
                prototype
            }
        };
        let object = self.alloc_with_proto(prototype);
        let this = Atom::Object(object);
        let result = self.call_value(callee, this.clone(), args)?;
        Ok(match result {
            Atom::Object(_) => result,
            _ => this,
        })
    }

    // ── super ─────────────────────────────────────────────────────────

    fn base_of(&self, class: Option<ClassId>) -> Result<Arc<object::ClassDef>, VmError> {
        class
            .and_then(|id| self.class_def(id).super_class.clone())
            .ok_or_else(|| VmError::verify(1107, &["super outside of a derived class"]))
    }

    /// `constructsuper`: run the base class initializer on `this`.
    pub(crate) fn construct_super(
        &mut self,
        class: Option<ClassId>,
        this: Atom,
        args: &[Atom],
    ) -> Result<(), VmError> {
        let base = self.base_of(class)?;
        if let Some(init) = base.instance_init {
            let scope = self.classes[base.id.0 as usize].scope.clone();
            self.invoke(init, this, args, scope, Some(base.id))?;
        }
        Ok(())
    }

    pub(crate) fn get_super(
        &mut self,
        class: Option<ClassId>,
        this: &Atom,
        mn: &Multiname,
    ) -> Result<Atom, VmError> {
        let base = self.base_of(class)?;
        let binding = base.instance_layout.find(mn).map(|(_, b)| b.clone());
        match (binding, this) {
            (Some(BoundTrait::Slot { index, .. }), Atom::Object(object)) => {
                Ok(object.borrow().slot(index).cloned().unwrap_or_default())
            }
            (Some(BoundTrait::Method(method)), _) => {
                Ok(Atom::Object(self.bind_method(&method, this.clone())?))
            }
            (
                Some(BoundTrait::Accessor {
                    getter: Some(getter),
                    ..
                }),
                _,
            ) => self.invoke_binding(&getter, this.clone(), &[]),
            _ => self.get_prop(this, mn),
        }
    }

    pub(crate) fn set_super(
        &mut self,
        class: Option<ClassId>,
        this: &Atom,
        mn: &Multiname,
        value: Atom,
    ) -> Result<(), VmError> {
        let base = self.base_of(class)?;
        let Some((name, binding)) = base.instance_layout.find(mn).map(|(q, b)| (*q, b.clone()))
        else {
            return self.set_prop(this, mn, value);
        };
        if check_write(&binding, &name, false).is_err() {
            return self.set_prop(this, mn, value);
        }
        match (binding, this) {
            (BoundTrait::Slot { index, ty, .. }, Atom::Object(object)) => {
                let value = self.coerce(value, &ty)?;
                let stored = object.borrow_mut().set_slot(index, value);
                stored.map_err(|e| VmError::Internal(e.to_string()))
            }
            (
                BoundTrait::Accessor {
                    setter: Some(setter),
                    ..
                },
                _,
            ) => self.invoke_binding(&setter, this.clone(), &[value]).map(drop),
            _ => self.set_prop(this, mn, value),
        }
    }

    pub(crate) fn call_super(
        &mut self,
        class: Option<ClassId>,
        this: &Atom,
        mn: &Multiname,
        args: &[Atom],
    ) -> Result<Atom, VmError> {
        let base = self.base_of(class)?;
        match base.instance_layout.find(mn).map(|(_, b)| b.clone()) {
            Some(BoundTrait::Method(method)) => self.invoke_binding(&method, this.clone(), args),
            Some(_) => {
                let function = self.get_super(class, this, mn)?;
                self.call_value(&function, this.clone(), args)
            }
            None => self.call_prop(this, mn, args, false),
        }
    }

    /// `callmethod`: the `disp_id`-th method declared on the receiver's
    /// class, counting from 1.
    pub(crate) fn call_method(
        &mut self,
        receiver: &Atom,
        disp_id: u32,
        args: &[Atom],
    ) -> Result<Atom, VmError> {
        let Atom::Object(object) = receiver else {
            return Err(self.throw(ErrorKind::TypeError, 1009, &[]));
        };
        let method = {
            let object = object.borrow();
            object
                .layout
                .iter()
                .filter_map(|(_, binding)| match binding {
                    BoundTrait::Method(method) => Some(*method),
                    _ => None,
                })
                .nth((disp_id as usize).wrapping_sub(1))
        };
        match method {
            Some(method) => self.invoke_binding(&method, receiver.clone(), args),
            None => {
                let what = format!("method {disp_id}");
                Err(self.throw(ErrorKind::TypeError, 1006, &[&what]))
            }
        }
    }

    pub(crate) fn call_static(
        &mut self,
        frame: &Activation,
        method: u32,
        this: Atom,
        args: &[Atom],
    ) -> Result<Atom, VmError> {
        let id = MethodId::Script {
            unit: frame.unit.index,
            index: method,
        };
        self.invoke(id, this, args, frame.outer.clone(), frame.class)
    }
}
