//! Builtin classes and global functions, implemented natively.
//!
//! Each builtin class is described by a [`ClassSpec`]: its instance and
//! static members plus the functions installed on its prototype. The
//! bootstrap turns the specs into class definitions, class objects and
//! prototype objects before any script is loaded. Everything it creates
//! lives as long as the VM and is pinned in the heap.

mod array;
mod error;
mod function;
mod globals;
mod number;
mod object_class;
mod string;

use std::sync::Arc;

use heap::Heap;
use log::debug;
use object::{
    Atom, ClassDef, ClassFlags, ClassId, FunctionObject, InstanceKind, Layout, MethodBinding,
    MethodId, MethodOwner, ObjectKind, ObjectRef, QName, ScopeChain, ScriptObject, SlotType,
    StringTable, TraitKind,
};

use crate::{ErrorKind, Vm, VmError};

pub(crate) use self::error::{ERROR_ID_SLOT, MESSAGE_SLOT, NAME_SLOT};

pub(crate) type NativeFn = fn(&mut Vm, &Atom, &[Atom]) -> Result<Atom, VmError>;

/// Entry of the native method table.
#[derive(Clone, Copy)]
pub(crate) struct NativeDesc {
    pub name: &'static str,
    /// Declared parameter count; reported as the function's `length`.
    pub arity: u8,
    pub func: NativeFn,
}

impl NativeDesc {
    pub const fn new(name: &'static str, arity: u8, func: NativeFn) -> Self {
        Self { name, arity, func }
    }
}

pub(crate) enum Member {
    Slot {
        name: &'static str,
        ty: SlotType,
        value: Atom,
        constant: bool,
    },
    Method(NativeDesc),
    Getter(NativeDesc),
    Setter(NativeDesc),
}

impl Member {
    pub fn constant(name: &'static str, value: Atom) -> Self {
        Member::Slot {
            name,
            ty: SlotType::Any,
            value,
            constant: true,
        }
    }

    pub fn slot(name: &'static str, ty: SlotType, value: Atom) -> Self {
        Member::Slot {
            name,
            ty,
            value,
            constant: false,
        }
    }
}

/// Description of one builtin class.
#[derive(Default)]
pub(crate) struct ClassSpec {
    pub name: &'static str,
    /// Defaults to `Object`.
    pub base: Option<ClassId>,
    pub kind: InstanceKind,
    pub flags: ClassFlags,
    pub init: Option<NativeDesc>,
    /// Behaviour of calling the class as a function, as in `String(x)`.
    pub call: Option<NativeFn>,
    pub instance: Vec<Member>,
    pub statics: Vec<Member>,
    pub prototype: Vec<NativeDesc>,
}

/// Runtime state of a class: its definition, class object and prototype.
pub(crate) struct ClassEntry {
    pub def: Arc<ClassDef>,
    pub object: ObjectRef,
    pub prototype: ObjectRef,
    /// Scope of the class's methods: the scope `newclass` ran in plus the
    /// class object.
    pub scope: ScopeChain,
    pub call: Option<NativeFn>,
}

/// Ids of the classes the runtime itself depends on.
pub(crate) struct Builtins {
    pub object: ClassId,
    pub class: ClassId,
    pub function: ClassId,
    pub namespace: ClassId,
    pub array: ClassId,
    pub string: ClassId,
    pub number: ClassId,
    pub int: ClassId,
    pub uint: ClassId,
    pub boolean: ClassId,
    /// Indexed by `ErrorKind as usize`.
    errors: Vec<ClassId>,
    /// Body of functions made by `new Function()`.
    pub empty_function: MethodId,
    /// Holds every builtin class and global function.
    pub global: ObjectRef,
}

impl Builtins {
    #[inline]
    pub fn error(&self, kind: ErrorKind) -> ClassId {
        self.errors[kind as usize]
    }
}

#[inline]
pub(crate) fn arg(args: &[Atom], index: usize) -> Atom {
    args.get(index).cloned().unwrap_or_default()
}

fn register(natives: &mut Vec<NativeDesc>, desc: NativeDesc) -> MethodId {
    natives.push(desc);
    MethodId::Native(natives.len() as u32 - 1)
}

fn declare(
    layout: &mut Layout,
    members: &[Member],
    owner: MethodOwner,
    natives: &mut Vec<NativeDesc>,
    strings: &StringTable,
) -> Result<(), VmError> {
    for member in members {
        let result = match member {
            Member::Slot {
                name,
                ty,
                value,
                constant,
            } => {
                let kind = if *constant {
                    TraitKind::Const
                } else {
                    TraitKind::Slot
                };
                let qname = QName::public(strings.intern(name));
                layout.declare_slot(qname, kind, *ty, 0, value.clone()).map(drop)
            }
            Member::Method(desc) => {
                let binding = MethodBinding::new(register(natives, *desc), owner);
                layout.declare_method(QName::public(strings.intern(desc.name)), binding)
            }
            Member::Getter(desc) => {
                let binding = MethodBinding::new(register(natives, *desc), owner);
                layout.declare_accessor(QName::public(strings.intern(desc.name)), Some(binding), None)
            }
            Member::Setter(desc) => {
                let binding = MethodBinding::new(register(natives, *desc), owner);
                layout.declare_accessor(QName::public(strings.intern(desc.name)), None, Some(binding))
            }
        };
        result.map_err(|e| VmError::Internal(format!("builtin layout: {e}")))?;
    }
    Ok(())
}

fn define(
    natives: &mut Vec<NativeDesc>,
    strings: &StringTable,
    id: ClassId,
    spec: &ClassSpec,
    base: Option<&Arc<ClassDef>>,
) -> Result<Arc<ClassDef>, VmError> {
    let mut instance = match base {
        Some(base) => Layout::derive(&base.instance_layout),
        None => Layout::new(),
    };
    declare(&mut instance, &spec.instance, MethodOwner::Instance(id), natives, strings)?;
    let mut statics = Layout::new();
    declare(&mut statics, &spec.statics, MethodOwner::Static(id), natives, strings)?;
    let instance_init = spec.init.map(|desc| register(natives, desc));
    Ok(Arc::new(ClassDef {
        id,
        name: QName::public(strings.intern(spec.name)),
        super_class: base.cloned(),
        interfaces: Vec::new(),
        flags: spec.flags,
        protected_ns: None,
        instance_layout: Arc::new(instance),
        static_layout: Arc::new(statics),
        instance_init,
        class_init: None,
        instance_kind: spec.kind,
    }))
}

struct Bootstrap<'a> {
    heap: &'a Heap<ScriptObject>,
    strings: &'a StringTable,
    natives: Vec<NativeDesc>,
    classes: Vec<ClassEntry>,
    object_def: Arc<ClassDef>,
    class_def: Arc<ClassDef>,
    function_def: Arc<ClassDef>,
    class_proto: ObjectRef,
    function_proto: ObjectRef,
}

impl Bootstrap<'_> {
    fn alloc(&self, value: ScriptObject) -> ObjectRef {
        let object = self.heap.alloc(value);
        self.heap.make_constant(&object);
        object
    }

    fn function(&mut self, desc: NativeDesc) -> ObjectRef {
        let method = register(&mut self.natives, desc);
        self.alloc(ScriptObject::instance(
            Arc::clone(&self.function_def),
            Some(self.function_proto.clone()),
            ObjectKind::Function(FunctionObject {
                method,
                owner: MethodOwner::Free,
                scope: ScopeChain::new(),
                receiver: None,
            }),
        ))
    }

    /// Create the class object for `def`, link it with `prototype` and
    /// fill the prototype.
    fn finish(
        &mut self,
        def: Arc<ClassDef>,
        prototype: ObjectRef,
        spec: &ClassSpec,
    ) -> ClassId {
        let id = def.id;
        let object = self.alloc(ScriptObject::with_layout(
            Arc::clone(&self.class_def),
            Arc::clone(&def.static_layout),
            Some(self.class_proto.clone()),
            ObjectKind::Class(id),
            true,
        ));
        object
            .borrow_mut()
            .define_hidden(self.strings.intern("prototype"), Atom::Object(prototype.clone()));
        prototype
            .borrow_mut()
            .define_hidden(self.strings.intern("constructor"), Atom::Object(object.clone()));
        for &desc in &spec.prototype {
            let function = self.function(desc);
            prototype
                .borrow_mut()
                .define_hidden(self.strings.intern(desc.name), Atom::Object(function));
        }
        self.classes.push(ClassEntry {
            def,
            object,
            prototype,
            scope: ScopeChain::new(),
            call: spec.call,
        });
        id
    }

    fn add(&mut self, spec: ClassSpec) -> Result<ClassId, VmError> {
        let base = spec.base.unwrap_or(ClassId(0));
        let (base_def, base_proto) = {
            let entry = &self.classes[base.0 as usize];
            (Arc::clone(&entry.def), entry.prototype.clone())
        };
        let id = ClassId(self.classes.len() as u32);
        let def = define(&mut self.natives, self.strings, id, &spec, Some(&base_def))?;
        let prototype = self.alloc(ScriptObject::instance(
            Arc::clone(&self.object_def),
            Some(base_proto),
            ObjectKind::Plain,
        ));
        Ok(self.finish(def, prototype, &spec))
    }

    fn global(&mut self, members: &[Member]) -> Result<ObjectRef, VmError> {
        let mut layout = Layout::new();
        for entry in &self.classes {
            layout
                .declare_slot(
                    entry.def.name,
                    TraitKind::Class,
                    SlotType::Any,
                    0,
                    Atom::Object(entry.object.clone()),
                )
                .map_err(|e| VmError::Internal(format!("builtin global: {e}")))?;
        }
        declare(&mut layout, members, MethodOwner::Free, &mut self.natives, self.strings)?;
        let object_proto = self.classes[0].prototype.clone();
        Ok(self.alloc(ScriptObject::with_layout(
            Arc::clone(&self.object_def),
            Arc::new(layout),
            Some(object_proto),
            ObjectKind::Plain,
            false,
        )))
    }
}

/// Build every builtin class and the builtin global object.
pub(crate) fn bootstrap(
    heap: &Heap<ScriptObject>,
    strings: &StringTable,
) -> Result<(Vec<ClassEntry>, Vec<NativeDesc>, Builtins), VmError> {
    let mut natives = Vec::new();

    // Object, Class and Function refer to each other, so their
    // definitions and prototypes exist before any class object does.
    let object_spec = object_class::object_spec();
    let class_spec = object_class::class_spec();
    let function_spec = function::spec();
    let object_def = define(&mut natives, strings, ClassId(0), &object_spec, None)?;
    let class_def = define(&mut natives, strings, ClassId(1), &class_spec, Some(&object_def))?;
    let function_def =
        define(&mut natives, strings, ClassId(2), &function_spec, Some(&object_def))?;

    let pinned = |value: ScriptObject| {
        let object = heap.alloc(value);
        heap.make_constant(&object);
        object
    };
    let object_proto = pinned(ScriptObject::instance(
        Arc::clone(&object_def),
        None,
        ObjectKind::Plain,
    ));
    let class_proto = pinned(ScriptObject::instance(
        Arc::clone(&object_def),
        Some(object_proto.clone()),
        ObjectKind::Plain,
    ));
    let function_proto = pinned(ScriptObject::instance(
        Arc::clone(&object_def),
        Some(object_proto.clone()),
        ObjectKind::Plain,
    ));

    let mut boot = Bootstrap {
        heap,
        strings,
        natives,
        classes: Vec::new(),
        object_def: Arc::clone(&object_def),
        class_def: Arc::clone(&class_def),
        function_def: Arc::clone(&function_def),
        class_proto: class_proto.clone(),
        function_proto: function_proto.clone(),
    };
    let object = boot.finish(object_def, object_proto, &object_spec);
    let class = boot.finish(class_def, class_proto, &class_spec);
    let function = boot.finish(function_def, function_proto, &function_spec);
    let empty_function = register(&mut boot.natives, function::EMPTY);

    let namespace = boot.add(object_class::namespace_spec())?;
    let array = boot.add(array::spec())?;
    let string = boot.add(string::spec())?;
    let boolean = boot.add(number::boolean_spec())?;
    let number = boot.add(number::number_spec())?;
    let int = boot.add(number::int_spec())?;
    let uint = boot.add(number::uint_spec())?;

    let mut errors = Vec::with_capacity(ErrorKind::ALL.len());
    let base = boot.add(error::spec(ErrorKind::Error, None))?;
    errors.push(base);
    for &kind in &ErrorKind::ALL[1..] {
        errors.push(boot.add(error::spec(kind, Some(base)))?);
    }

    let global = boot.global(&globals::members())?;
    debug!(
        "bootstrapped {} builtin classes with {} natives",
        boot.classes.len(),
        boot.natives.len()
    );

    let builtins = Builtins {
        object,
        class,
        function,
        namespace,
        array,
        string,
        number,
        int,
        uint,
        boolean,
        errors,
        empty_function,
        global,
    };
    Ok((boot.classes, boot.natives, builtins))
}
