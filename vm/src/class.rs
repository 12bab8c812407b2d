//! Class creation (`newclass`), construction and object allocation.

use std::sync::Arc;

use log::debug;
use object::{
    Atom, ClassDef, ClassFlags, ClassId, FunctionObject, InstanceKind, Layout, MethodId,
    MethodOwner, Multiname, Namespace, ObjectKind, ObjectRef, Scope, ScopeChain, ScriptObject,
};

use crate::{
    ErrorKind, Vm, VmError,
    builtins::ClassEntry,
    loader::{LoadedUnit, build_layout},
};

impl Vm {
    // ── Allocation ────────────────────────────────────────────────────

    /// A plain `Object` instance.
    pub(crate) fn alloc_object(&mut self) -> ObjectRef {
        let prototype = self.classes[self.builtins.object.0 as usize].prototype.clone();
        self.alloc_with_proto(prototype)
    }

    /// A plain object inheriting from `prototype`.
    pub(crate) fn alloc_with_proto(&mut self, prototype: ObjectRef) -> ObjectRef {
        let def = Arc::clone(self.class_def(self.builtins.object));
        self.heap
            .alloc(ScriptObject::instance(def, Some(prototype), ObjectKind::Plain))
    }

    pub(crate) fn alloc_array(&mut self, items: Vec<Atom>) -> ObjectRef {
        let entry = &self.classes[self.builtins.array.0 as usize];
        self.heap.alloc(ScriptObject::instance(
            Arc::clone(&entry.def),
            Some(entry.prototype.clone()),
            ObjectKind::Array(items),
        ))
    }

    /// Scope object holding the slots of `layout`: an activation or the
    /// variable of a `catch` block.
    pub(crate) fn alloc_scope_object(&mut self, layout: &Arc<Layout>) -> ObjectRef {
        let def = Arc::clone(self.class_def(self.builtins.object));
        self.heap.alloc(ScriptObject::with_layout(
            def,
            Arc::clone(layout),
            None,
            ObjectKind::Activation,
            true,
        ))
    }

    /// An uninitialized instance of `class`.
    pub(crate) fn alloc_instance(&mut self, class: ClassId) -> Result<ObjectRef, VmError> {
        let (def, prototype) = {
            let entry = &self.classes[class.0 as usize];
            (Arc::clone(&entry.def), entry.prototype.clone())
        };
        let kind = match def.instance_kind {
            InstanceKind::Plain => ObjectKind::Plain,
            InstanceKind::Array => ObjectKind::Array(Vec::new()),
            InstanceKind::Function => ObjectKind::Function(FunctionObject {
                method: self.builtins.empty_function,
                owner: MethodOwner::Free,
                scope: ScopeChain::new(),
                receiver: None,
            }),
            InstanceKind::Namespace => ObjectKind::Namespace(Namespace::PUBLIC),
            InstanceKind::Abstract => return Err(self.throw(ErrorKind::TypeError, 1007, &[])),
        };
        Ok(self
            .heap
            .alloc(ScriptObject::instance(def, Some(prototype), kind)))
    }

    /// `new C(args)`.
    pub(crate) fn construct_class(&mut self, id: ClassId, args: &[Atom]) -> Result<Atom, VmError> {
        let entry = &self.classes[id.0 as usize];
        let def = Arc::clone(&entry.def);
        if def.is_interface() {
            return Err(self.throw(ErrorKind::TypeError, 1007, &[]));
        }
        if def.instance_kind == InstanceKind::Abstract {
            // Boolean, int and friends construct through their conversion.
            let (class, call) = (Atom::Object(entry.object.clone()), entry.call);
            return match call {
                Some(call) => call(self, &class, args),
                None => Err(self.throw(ErrorKind::TypeError, 1007, &[])),
            };
        }
        let this = Atom::Object(self.alloc_instance(id)?);
        if let Some(init) = def.instance_init {
            let scope = self.classes[id.0 as usize].scope.clone();
            self.invoke(init, this.clone(), args, scope, Some(id))?;
        }
        Ok(this)
    }

    // ── newclass ──────────────────────────────────────────────────────

    /// The class named by `mn` among known classes, running its script if
    /// it is a definition not initialized yet.
    fn lookup_class(&mut self, mn: &Multiname) -> Result<Option<Arc<ClassDef>>, VmError> {
        if let Some(entry) = self.classes.iter().find(|entry| mn.matches(&entry.def.name)) {
            return Ok(Some(Arc::clone(&entry.def)));
        }
        Ok(match self.find_definition(mn)? {
            Some(Atom::Object(object)) => {
                let id = object.borrow().as_class();
                id.map(|id| Arc::clone(self.class_def(id)))
            }
            _ => None,
        })
    }

    /// Create class `index` of `unit` with base class object `base`, run
    /// its static initializer and return the class object.
    pub(crate) fn new_class(
        &mut self,
        unit: &Arc<LoadedUnit>,
        index: u32,
        base: Atom,
        scope: ScopeChain,
    ) -> Result<ObjectRef, VmError> {
        if let Some(id) = self.unit_classes.get(&(unit.index, index)) {
            return Ok(self.classes[id.0 as usize].object.clone());
        }
        let desc = unit
            .classes
            .get(index as usize)
            .ok_or_else(|| VmError::verify(1032, &[&index.to_string(), &unit.classes.len().to_string()]))?;

        let base_id = match &base {
            Atom::Null | Atom::Undefined => None,
            Atom::Object(object) => object.borrow().as_class(),
            _ => None,
        };
        let base_def = match (base_id, &desc.super_name) {
            (Some(id), _) => Some(Arc::clone(self.class_def(id))),
            (None, None) => None,
            (None, Some(name)) => {
                let name = name.display(&self.strings);
                return Err(self.throw(ErrorKind::VerifyError, 1014, &[&name]));
            }
        };
        if let Some(base) = &base_def {
            if base.is_final() || base.is_interface() {
                let name = desc.name.display(&self.strings);
                return Err(self.throw(ErrorKind::VerifyError, 1103, &[&name]));
            }
        }

        let mut interfaces = Vec::with_capacity(desc.interfaces.len());
        for mn in &desc.interfaces {
            match self.lookup_class(mn)? {
                Some(interface) => interfaces.push(interface),
                None => {
                    let name = mn.display(&self.strings);
                    return Err(self.throw(ErrorKind::VerifyError, 1014, &[&name]));
                }
            }
        }

        let id = ClassId(self.classes.len() as u32);
        let instance_layout = build_layout(
            unit.index,
            &desc.instance_traits,
            base_def.as_ref().map(|base| &*base.instance_layout),
            MethodOwner::Instance(id),
            &self.strings,
        )?;
        let static_layout = build_layout(
            unit.index,
            &desc.static_traits,
            None,
            MethodOwner::Static(id),
            &self.strings,
        )?;
        let instance_kind = if desc.flags.contains(ClassFlags::INTERFACE) {
            InstanceKind::Abstract
        } else {
            base_def
                .as_ref()
                .map_or(InstanceKind::Plain, |base| base.instance_kind)
        };
        let def = Arc::new(ClassDef {
            id,
            name: desc.name,
            super_class: base_def.clone(),
            interfaces,
            flags: desc.flags,
            protected_ns: desc.protected_ns,
            instance_layout: Arc::new(instance_layout),
            static_layout: Arc::new(static_layout),
            instance_init: Some(MethodId::Script {
                unit: unit.index,
                index: desc.iinit,
            }),
            class_init: Some(MethodId::Script {
                unit: unit.index,
                index: desc.cinit,
            }),
            instance_kind,
        });

        let base_proto = match &base_def {
            Some(base) => self.classes[base.id.0 as usize].prototype.clone(),
            None => self.classes[self.builtins.object.0 as usize].prototype.clone(),
        };
        let prototype = self.alloc_with_proto(base_proto);
        let class_entry = &self.classes[self.builtins.class.0 as usize];
        let object = self.heap.alloc(ScriptObject::with_layout(
            Arc::clone(&class_entry.def),
            Arc::clone(&def.static_layout),
            Some(class_entry.prototype.clone()),
            ObjectKind::Class(id),
            true,
        ));
        object
            .borrow_mut()
            .define_hidden(self.names.prototype, Atom::Object(prototype.clone()));
        prototype
            .borrow_mut()
            .define_hidden(self.names.constructor, Atom::Object(object.clone()));
        self.pin(&object);
        self.pin(&prototype);

        let mut class_scope = scope;
        class_scope.push(Scope::new(object.clone()));
        self.classes.push(ClassEntry {
            def: Arc::clone(&def),
            object: object.clone(),
            prototype,
            scope: class_scope.clone(),
            call: None,
        });
        self.unit_classes.insert((unit.index, index), id);
        debug!(
            "newclass {} as {:?} ({} instance slots)",
            def.name.display(&self.strings),
            id,
            def.instance_layout.slot_count()
        );

        self.init_function_slots(&object, unit.index, &desc.static_traits, &class_scope)?;
        if let Some(cinit) = def.class_init {
            self.invoke(cinit, Atom::Object(object.clone()), &[], class_scope, Some(id))?;
        }
        Ok(object)
    }
}
