//! Verification and installation of ABC units.
//!
//! [`UnitLoader`] checks every pool reference, trait and method body of an
//! [`AbcFile`] and converts it into the VM's own tables: interned strings,
//! resolved namespaces, decoded instruction streams with the byte offset
//! of every instruction. A unit that fails any check is rejected as a
//! whole and nothing from it becomes visible.

use std::sync::Arc;

use bytecode::{
    AbcFile, ClassInfo, ConstValue, ExceptionInfo, InstanceFlags, InstanceInfo, Instruction,
    MethodBody, MethodFlags, MultinameInfo, NamespaceKindInfo, TraitAttributes, TraitData,
    TraitInfo, decode_all,
};
use log::debug;
use object::{
    Atom, ClassFlags, Layout, MethodBinding, MethodId, MethodOwner, Multiname, MultinameFlags,
    Namespace, NamespaceKind, NsSet, QName, SlotType, StringId, StringTable, TraitError, TraitKind,
};

use crate::VmError;

/// Handle to a unit installed by [`Vm::load`](crate::Vm::load).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitHandle(pub(crate) u32);

#[derive(Debug)]
pub(crate) struct LoadedUnit {
    pub index: u32,
    pub ints: Vec<i32>,
    pub uints: Vec<u32>,
    pub doubles: Vec<f64>,
    pub strings: Vec<StringId>,
    pub namespaces: Vec<Namespace>,
    pub multinames: Vec<Multiname>,
    pub methods: Vec<MethodDesc>,
    pub classes: Vec<ClassDesc>,
    pub scripts: Vec<ScriptDesc>,
}

impl LoadedUnit {
    /// How many operands multiname `index` pops at runtime.
    pub fn runtime_parts(&self, index: u32) -> usize {
        self.multinames.get(index as usize).map_or(0, |mn| {
            usize::from(mn.has_runtime_name()) + usize::from(mn.has_runtime_ns())
        })
    }
}

#[derive(Debug)]
pub(crate) struct MethodDesc {
    pub name: StringId,
    pub params: Vec<SlotType>,
    /// Defaults of the trailing optional parameters.
    pub optional: Vec<Atom>,
    pub flags: MethodFlags,
    pub return_type: SlotType,
    pub body: Option<Arc<BodyDesc>>,
}

impl MethodDesc {
    pub fn required_params(&self) -> usize {
        self.params.len() - self.optional.len()
    }
}

#[derive(Debug)]
pub(crate) struct BodyDesc {
    pub max_stack: u32,
    pub local_count: u32,
    pub code: Vec<Instruction>,
    /// Byte offset of each instruction, ascending.
    pub offsets: Vec<u32>,
    pub handlers: Vec<Handler>,
    /// Layout of the object created by `newactivation`.
    pub activation: Option<Arc<Layout>>,
}

impl BodyDesc {
    /// Instruction index of the instruction starting at byte `offset`.
    #[inline]
    pub fn index_of(&self, offset: u32) -> Option<usize> {
        self.offsets.binary_search(&offset).ok()
    }
}

/// An exception table entry with instruction indices instead of byte
/// offsets. `from..to` is the covered range.
#[derive(Debug)]
pub(crate) struct Handler {
    pub from: usize,
    pub to: usize,
    pub target: usize,
    pub exc_type: SlotType,
    /// Layout of the scope object made by `newcatch` for this handler.
    pub catch_layout: Arc<Layout>,
}

#[derive(Debug)]
pub(crate) struct ClassDesc {
    pub name: QName,
    pub super_name: Option<Multiname>,
    pub flags: ClassFlags,
    pub protected_ns: Option<Namespace>,
    pub interfaces: Vec<Multiname>,
    pub iinit: u32,
    pub cinit: u32,
    pub instance_traits: Vec<TraitDesc>,
    pub static_traits: Vec<TraitDesc>,
}

#[derive(Debug)]
pub(crate) struct ScriptDesc {
    pub init: u32,
    pub traits: Vec<TraitDesc>,
}

#[derive(Clone, Debug)]
pub(crate) struct TraitDesc {
    pub name: QName,
    pub kind: TraitDescKind,
    pub is_final: bool,
}

#[derive(Clone, Debug)]
pub(crate) enum TraitDescKind {
    Slot {
        slot_id: u32,
        ty: SlotType,
        default: Atom,
        constant: bool,
    },
    Method(u32),
    Getter(u32),
    Setter(u32),
    Class { slot_id: u32, class: u32 },
    Function { slot_id: u32, method: u32 },
}

impl TraitDescKind {
    fn slot_id(&self) -> Option<u32> {
        match *self {
            TraitDescKind::Slot { slot_id, .. }
            | TraitDescKind::Class { slot_id, .. }
            | TraitDescKind::Function { slot_id, .. } => Some(slot_id),
            TraitDescKind::Method(_) | TraitDescKind::Getter(_) | TraitDescKind::Setter(_) => None,
        }
    }
}

/// Build the trait layout for `traits`. Methods are bound to `owner`.
pub(crate) fn build_layout(
    unit: u32,
    traits: &[TraitDesc],
    base: Option<&Layout>,
    owner: MethodOwner,
    strings: &StringTable,
) -> Result<Layout, VmError> {
    let mut layout = match base {
        Some(base) => Layout::derive(base),
        None => Layout::new(),
    };
    let bind = |index: u32| MethodBinding::new(MethodId::Script { unit, index }, owner);
    // Slot ids number the slot-like traits of this list, so none can
    // exceed their count.
    let slot_traits = traits.iter().filter(|t| t.kind.slot_id().is_some()).count();
    for t in traits {
        if let Some(requested) = t.kind.slot_id() {
            if requested as usize > slot_traits {
                let err = TraitError::SlotOutOfRange { requested };
                return Err(VmError::verify(1107, &[&format!("{} ({err})", t.name.display(strings))]));
            }
        }
        let result = match &t.kind {
            TraitDescKind::Slot {
                slot_id,
                ty,
                default,
                constant,
            } => {
                let kind = if *constant {
                    TraitKind::Const
                } else {
                    TraitKind::Slot
                };
                layout
                    .declare_slot(t.name, kind, *ty, *slot_id, default.clone())
                    .map(drop)
            }
            TraitDescKind::Class { slot_id, .. } => layout
                .declare_slot(t.name, TraitKind::Class, SlotType::Any, *slot_id, Atom::Undefined)
                .map(drop),
            TraitDescKind::Function { slot_id, .. } => layout
                .declare_slot(
                    t.name,
                    TraitKind::Function,
                    SlotType::Any,
                    *slot_id,
                    Atom::Undefined,
                )
                .map(drop),
            TraitDescKind::Method(m) => layout.declare_method(t.name, bind(*m)),
            TraitDescKind::Getter(m) => layout.declare_accessor(t.name, Some(bind(*m)), None),
            TraitDescKind::Setter(m) => layout.declare_accessor(t.name, None, Some(bind(*m))),
        };
        result.map_err(|e| VmError::verify(1107, &[&format!("{} ({e})", t.name.display(strings))]))?;
    }
    Ok(layout)
}

// ── Loading ───────────────────────────────────────────────────────────

pub(crate) struct UnitLoader<'a> {
    file: &'a AbcFile,
    strings: &'a StringTable,
    unit: LoadedUnit,
    next_private_ns: &'a mut u32,
    max_frame_size: u32,
}

fn out_of_range(index: u32, len: usize) -> VmError {
    VmError::verify(1032, &[&index.to_string(), &len.to_string()])
}

fn check(index: u32, len: usize) -> Result<usize, VmError> {
    if (index as usize) < len {
        Ok(index as usize)
    } else {
        Err(out_of_range(index, len))
    }
}

impl<'a> UnitLoader<'a> {
    pub fn new(
        file: &'a AbcFile,
        index: u32,
        strings: &'a StringTable,
        next_private_ns: &'a mut u32,
    ) -> Self {
        Self {
            file,
            strings,
            next_private_ns,
            max_frame_size: u32::MAX,
            unit: LoadedUnit {
                index,
                ints: Vec::new(),
                uints: Vec::new(),
                doubles: Vec::new(),
                strings: Vec::new(),
                namespaces: Vec::new(),
                multinames: Vec::new(),
                methods: Vec::new(),
                classes: Vec::new(),
                scripts: Vec::new(),
            },
        }
    }

    /// Reject bodies declaring more locals or operand stack entries than
    /// `limit`.
    pub fn max_frame_size(mut self, limit: u32) -> Self {
        self.max_frame_size = limit;
        self
    }

    pub fn load(mut self) -> Result<LoadedUnit, VmError> {
        let file = self.file;
        self.pool()?;
        self.methods()?;
        self.bodies()?;
        for (instance, class) in file.instances.iter().zip(&file.classes) {
            let desc = self.class(instance, class)?;
            // Conflicts among a class's own traits fail the load. Overrides
            // of base class traits are checked by `newclass`, once the base
            // is known.
            build_layout(self.unit.index, &desc.instance_traits, None, MethodOwner::Free, self.strings)?;
            build_layout(self.unit.index, &desc.static_traits, None, MethodOwner::Free, self.strings)?;
            self.unit.classes.push(desc);
        }
        if file.instances.len() != file.classes.len() {
            return Err(VmError::verify(1107, &["class table"]));
        }
        for script in &file.scripts {
            check(script.init, self.unit.methods.len())?;
            let traits = self.traits(&script.traits)?;
            self.unit.scripts.push(ScriptDesc {
                init: script.init,
                traits,
            });
        }
        debug!(
            "verified unit {}: {} methods, {} classes, {} scripts",
            self.unit.index,
            self.unit.methods.len(),
            self.unit.classes.len(),
            self.unit.scripts.len()
        );
        Ok(self.unit)
    }

    // ── Constant pool ─────────────────────────────────────────────────

    fn pool(&mut self) -> Result<(), VmError> {
        let file = self.file;
        let pool = &file.constant_pool;
        self.unit.ints = pool.ints.clone();
        self.unit.uints = pool.uints.clone();
        self.unit.doubles = pool.doubles.clone();
        self.unit.strings = pool.strings.iter().map(|s| self.strings.intern(s)).collect();

        for info in &pool.namespaces {
            let uri = self.unit.strings[check(info.name, pool.strings.len())?];
            let ns = match info.kind {
                NamespaceKindInfo::Private => {
                    *self.next_private_ns += 1;
                    Namespace::private(uri, *self.next_private_ns)
                }
                kind => Namespace::new(namespace_kind(kind), uri),
            };
            self.unit.namespaces.push(ns);
        }

        let mut sets = Vec::with_capacity(pool.ns_sets.len());
        for set in &pool.ns_sets {
            let mut namespaces = Vec::with_capacity(set.len());
            for &ns in set {
                namespaces.push(self.unit.namespaces[check(ns, pool.namespaces.len())?]);
            }
            sets.push(NsSet::new(namespaces));
        }

        for (index, info) in pool.multinames.iter().enumerate() {
            let mn = self.multiname_info(index, info, &sets)?;
            self.unit.multinames.push(mn);
        }
        Ok(())
    }

    fn multiname_info(
        &self,
        index: usize,
        info: &MultinameInfo,
        sets: &[NsSet],
    ) -> Result<Multiname, VmError> {
        let pool = &self.file.constant_pool;
        let name = |i: u32| -> Result<Option<StringId>, VmError> {
            check(i, pool.strings.len())?;
            Ok((i != 0).then(|| self.unit.strings[i as usize]))
        };
        let set = |i: u32| -> Result<NsSet, VmError> {
            if i == 0 {
                return Err(VmError::verify(1033, &[&i.to_string()]));
            }
            Ok(sets[check(i, sets.len())?].clone())
        };
        let (mn, attribute) = match info {
            MultinameInfo::QName {
                ns,
                name: n,
                attribute,
            } => {
                check(*ns, pool.namespaces.len())?;
                let ns = if *ns == 0 {
                    NsSet::any()
                } else {
                    NsSet::single(self.unit.namespaces[*ns as usize])
                };
                let mn = Multiname {
                    name: name(*n)?,
                    ns,
                    flags: MultinameFlags::empty(),
                };
                (mn, *attribute)
            }
            MultinameInfo::RtQName { name: n, attribute } => {
                (Multiname::runtime_ns(name(*n)?), *attribute)
            }
            MultinameInfo::RtQNameL { attribute } => {
                let mn = Multiname {
                    name: None,
                    ns: NsSet::any(),
                    flags: MultinameFlags::RUNTIME_NAME | MultinameFlags::RUNTIME_NS,
                };
                (mn, *attribute)
            }
            MultinameInfo::Multiname {
                name: n,
                ns_set,
                attribute,
            } => {
                let mn = Multiname {
                    name: name(*n)?,
                    ns: set(*ns_set)?,
                    flags: MultinameFlags::empty(),
                };
                (mn, *attribute)
            }
            MultinameInfo::MultinameL { ns_set, attribute } => {
                (Multiname::runtime_name(set(*ns_set)?), *attribute)
            }
            // Type parameters do not change lookup, only the base name does.
            MultinameInfo::TypeName { base, params } => {
                for &p in params {
                    check(p, pool.multinames.len())?;
                }
                if *base as usize >= index {
                    return Err(out_of_range(*base, index));
                }
                (self.unit.multinames[*base as usize].clone(), false)
            }
        };
        Ok(if attribute { mn.attribute() } else { mn })
    }

    fn multiname(&self, index: u32) -> Result<&Multiname, VmError> {
        Ok(&self.unit.multinames[check(index, self.unit.multinames.len())?])
    }

    /// Trait and class names must be plain QNames.
    fn qname(&self, index: u32) -> Result<QName, VmError> {
        let mn = self.multiname(index)?;
        match mn.as_qname() {
            Some(qname) if !mn.is_runtime() => Ok(qname),
            _ => Err(VmError::verify(1033, &[&index.to_string()])),
        }
    }

    fn slot_type(&self, index: u32) -> Result<SlotType, VmError> {
        if index == 0 {
            return Ok(SlotType::Any);
        }
        let mn = self.multiname(index)?;
        if mn.is_runtime() {
            return Err(VmError::verify(1033, &[&index.to_string()]));
        }
        let Some(qname) = mn.as_qname() else {
            return Ok(SlotType::Any);
        };
        if !qname.ns.is_public() {
            return Ok(SlotType::Class(qname));
        }
        Ok(match &*self.strings.get(qname.name) {
            "int" => SlotType::Int,
            "uint" => SlotType::UInt,
            "Number" => SlotType::Number,
            "Boolean" => SlotType::Boolean,
            "String" => SlotType::String,
            "*" | "void" => SlotType::Any,
            _ => SlotType::Class(qname),
        })
    }

    fn constant(&self, value: ConstValue) -> Result<Atom, VmError> {
        let pool = &self.file.constant_pool;
        Ok(match value {
            ConstValue::Undefined => Atom::Undefined,
            ConstValue::Null => Atom::Null,
            ConstValue::True => Atom::Bool(true),
            ConstValue::False => Atom::Bool(false),
            ConstValue::Int(i) => Atom::Int(pool.ints[check(i, pool.ints.len())?]),
            ConstValue::UInt(i) => Atom::UInt(pool.uints[check(i, pool.uints.len())?]),
            ConstValue::Double(i) => {
                Atom::from_number(pool.doubles[check(i, pool.doubles.len())?])
            }
            ConstValue::Utf8(i) => Atom::String(self.unit.strings[check(i, pool.strings.len())?]),
            ConstValue::Namespace(i) => {
                return Err(VmError::verify(1033, &[&i.to_string()]));
            }
        })
    }

    /// Default of a slot of type `ty`, optionally overridden by `value`.
    fn slot_default(&self, ty: SlotType, value: Option<ConstValue>) -> Result<Atom, VmError> {
        let Some(value) = value else {
            return Ok(match ty {
                SlotType::Any => Atom::Undefined,
                SlotType::Int => Atom::Int(0),
                SlotType::UInt => Atom::UInt(0),
                SlotType::Number => Atom::Number(f64::NAN),
                SlotType::Boolean => Atom::Bool(false),
                SlotType::String | SlotType::Class(_) => Atom::Null,
            });
        };
        let atom = self.constant(value)?;
        let strings = self.strings;
        Ok(match ty {
            SlotType::Int => Atom::Int(atom.to_int32(strings)),
            SlotType::UInt => Atom::UInt(atom.to_uint32(strings)),
            SlotType::Number => Atom::from_number(atom.to_number(strings)),
            SlotType::Boolean => Atom::Bool(atom.to_boolean()),
            SlotType::String if !atom.is_nullish() => Atom::String(atom.to_string_id(strings)),
            SlotType::String => Atom::Null,
            SlotType::Class(_) | SlotType::Any => atom,
        })
    }

    // ── Methods ───────────────────────────────────────────────────────

    fn methods(&mut self) -> Result<(), VmError> {
        let file = self.file;
        let pool = &file.constant_pool;
        for info in &file.methods {
            let name = self.unit.strings[check(info.name, pool.strings.len())?];
            let params = info
                .params
                .iter()
                .map(|&p| self.slot_type(p))
                .collect::<Result<Vec<_>, _>>()?;
            if info.optional.len() > params.len() {
                return Err(VmError::verify(1107, &["optional parameter count"]));
            }
            let first_optional = params.len() - info.optional.len();
            let mut optional = Vec::with_capacity(info.optional.len());
            for (i, &value) in info.optional.iter().enumerate() {
                optional.push(self.slot_default(params[first_optional + i], Some(value))?);
            }
            for &n in &info.param_names {
                check(n, pool.strings.len())?;
            }
            let desc = MethodDesc {
                name,
                params,
                optional,
                flags: info.flags,
                return_type: self.slot_type(info.return_type)?,
                body: None,
            };
            self.unit.methods.push(desc);
        }
        Ok(())
    }

    fn bodies(&mut self) -> Result<(), VmError> {
        let file = self.file;
        for body in &file.bodies {
            let method = check(body.method, self.unit.methods.len())?;
            if self.unit.methods[method].body.is_some() {
                return Err(VmError::verify(1107, &["duplicate method body"]));
            }
            let desc = self.body(body, method)?;
            self.unit.methods[method].body = Some(Arc::new(desc));
        }
        Ok(())
    }

    fn body(&self, body: &MethodBody, method: usize) -> Result<BodyDesc, VmError> {
        let decoded =
            decode_all(&body.code).map_err(|e| VmError::verify(1107, &[&e.to_string()]))?;
        let Some((_, last)) = decoded.last() else {
            return Err(VmError::verify(1020, &[]));
        };
        if !last.ends_block() {
            return Err(VmError::verify(1020, &[]));
        }
        let (offsets, code): (Vec<u32>, Vec<Instruction>) = decoded.into_iter().unzip();

        let info = &self.unit.methods[method];
        let params = info.params.len() as u32
            + u32::from(info.flags.intersects(MethodFlags::NEED_REST | MethodFlags::NEED_ARGUMENTS));
        if body.local_count < params + 1 {
            return Err(VmError::verify(1107, &["local count below parameter count"]));
        }
        if body.local_count > self.max_frame_size || body.max_stack > self.max_frame_size {
            return Err(VmError::verify(
                1107,
                &[&format!(
                    "frame of {} locals and {} stack entries exceeds {}",
                    body.local_count, body.max_stack, self.max_frame_size
                )],
            ));
        }

        let handlers = body
            .exceptions
            .iter()
            .map(|e| self.handler(e, &offsets, body.code.len()))
            .collect::<Result<Vec<_>, _>>()?;

        for inst in &code {
            self.check_instruction(inst, body.local_count, handlers.len())?;
            for target in inst.targets() {
                if offsets.binary_search(&target).is_err() {
                    return Err(VmError::verify(1021, &[]));
                }
            }
        }

        let activation = if body.traits.is_empty() {
            None
        } else {
            let traits = self.traits(&body.traits)?;
            if traits.iter().any(|t| !matches!(t.kind, TraitDescKind::Slot { .. })) {
                return Err(VmError::verify(1107, &["activation traits must be slots"]));
            }
            let layout = build_layout(self.unit.index, &traits, None, MethodOwner::Free, self.strings)?;
            Some(Arc::new(layout))
        };

        Ok(BodyDesc {
            max_stack: body.max_stack,
            local_count: body.local_count,
            code,
            offsets,
            handlers,
            activation,
        })
    }

    fn handler(
        &self,
        e: &ExceptionInfo,
        offsets: &[u32],
        code_len: usize,
    ) -> Result<Handler, VmError> {
        if e.from > e.to || e.to as usize > code_len {
            return Err(VmError::verify(1107, &["exception range"]));
        }
        let target = offsets
            .binary_search(&e.target)
            .map_err(|_| VmError::verify(1021, &[]))?;
        let from = offsets.partition_point(|&o| o < e.from);
        let to = offsets.partition_point(|&o| o < e.to);
        let exc_type = self.slot_type(e.exc_type)?;

        let mut layout = Layout::new();
        if e.var_name != 0 {
            let name = self.qname(e.var_name)?;
            layout
                .declare_slot(name, TraitKind::Slot, exc_type, 0, Atom::Undefined)
                .map_err(|err| VmError::verify(1107, &[&err.to_string()]))?;
        }
        Ok(Handler {
            from,
            to,
            target,
            exc_type,
            catch_layout: Arc::new(layout),
        })
    }

    fn check_instruction(
        &self,
        inst: &Instruction,
        local_count: u32,
        handlers: usize,
    ) -> Result<(), VmError> {
        let register = |reg: u32| {
            if reg < local_count {
                Ok(())
            } else {
                Err(VmError::verify(1025, &[&reg.to_string()]))
            }
        };
        let pool = &self.file.constant_pool;
        let u = &self.unit;
        match *inst {
            Instruction::GetLocal { reg }
            | Instruction::SetLocal { reg }
            | Instruction::Kill { reg }
            | Instruction::IncLocal { reg }
            | Instruction::DecLocal { reg }
            | Instruction::IncLocalI { reg }
            | Instruction::DecLocalI { reg } => register(reg),
            Instruction::HasNext2 {
                object_reg,
                index_reg,
            } => {
                register(object_reg)?;
                register(index_reg)
            }
            Instruction::PushString { index } => check(index, pool.strings.len()).map(drop),
            Instruction::PushInt { index } => check(index, pool.ints.len()).map(drop),
            Instruction::PushUInt { index } => check(index, pool.uints.len()).map(drop),
            Instruction::PushDouble { index } => check(index, pool.doubles.len()).map(drop),
            Instruction::PushNamespace { index } => check(index, pool.namespaces.len()).map(drop),
            Instruction::NewFunction { method } | Instruction::CallStatic { method, .. } => {
                check(method, u.methods.len()).map(drop)
            }
            Instruction::NewClass { class } => check(class, self.file.classes.len()).map(drop),
            Instruction::NewCatch { index } => check(index, handlers).map(drop),
            Instruction::GetLex { name } => {
                if self.multiname(name)?.is_runtime() {
                    Err(VmError::verify(1033, &[&name.to_string()]))
                } else {
                    Ok(())
                }
            }
            Instruction::GetSuper { name }
            | Instruction::SetSuper { name }
            | Instruction::CallSuper { name, .. }
            | Instruction::CallSuperVoid { name, .. }
            | Instruction::CallProperty { name, .. }
            | Instruction::CallPropLex { name, .. }
            | Instruction::CallPropVoid { name, .. }
            | Instruction::ConstructProp { name, .. }
            | Instruction::FindPropStrict { name }
            | Instruction::FindProperty { name }
            | Instruction::FindDef { name }
            | Instruction::GetProperty { name }
            | Instruction::SetProperty { name }
            | Instruction::InitProperty { name }
            | Instruction::DeleteProperty { name }
            | Instruction::Coerce { name }
            | Instruction::AsType { name }
            | Instruction::IsType { name } => self.multiname(name).map(drop),
            _ => Ok(()),
        }
    }

    // ── Traits and classes ────────────────────────────────────────────

    fn traits(&self, traits: &[TraitInfo]) -> Result<Vec<TraitDesc>, VmError> {
        traits.iter().map(|t| self.trait_desc(t)).collect()
    }

    fn trait_desc(&self, t: &TraitInfo) -> Result<TraitDesc, VmError> {
        let methods = self.unit.methods.len();
        let kind = match &t.data {
            TraitData::Slot {
                slot_id,
                type_name,
                value,
            }
            | TraitData::Const {
                slot_id,
                type_name,
                value,
            } => {
                let ty = self.slot_type(*type_name)?;
                TraitDescKind::Slot {
                    slot_id: *slot_id,
                    ty,
                    default: self.slot_default(ty, *value)?,
                    constant: matches!(t.data, TraitData::Const { .. }),
                }
            }
            TraitData::Method { method, .. } => TraitDescKind::Method(check(*method, methods)? as u32),
            TraitData::Getter { method, .. } => TraitDescKind::Getter(check(*method, methods)? as u32),
            TraitData::Setter { method, .. } => TraitDescKind::Setter(check(*method, methods)? as u32),
            TraitData::Class { slot_id, class } => TraitDescKind::Class {
                slot_id: *slot_id,
                class: check(*class, self.file.classes.len())? as u32,
            },
            TraitData::Function { slot_id, method } => TraitDescKind::Function {
                slot_id: *slot_id,
                method: check(*method, methods)? as u32,
            },
        };
        Ok(TraitDesc {
            name: self.qname(t.name)?,
            kind,
            is_final: t.attributes.contains(TraitAttributes::FINAL),
        })
    }

    fn class(&self, instance: &InstanceInfo, class: &ClassInfo) -> Result<ClassDesc, VmError> {
        let methods = self.unit.methods.len();
        let mut flags = ClassFlags::empty();
        flags.set(ClassFlags::SEALED, instance.flags.contains(InstanceFlags::SEALED));
        flags.set(ClassFlags::FINAL, instance.flags.contains(InstanceFlags::FINAL));
        flags.set(ClassFlags::INTERFACE, instance.flags.contains(InstanceFlags::INTERFACE));
        let protected_ns = if instance.flags.contains(InstanceFlags::PROTECTED_NS) {
            flags |= ClassFlags::PROTECTED_NS;
            let index = check(instance.protected_ns, self.unit.namespaces.len())?;
            Some(self.unit.namespaces[index])
        } else {
            None
        };
        let super_name = match instance.super_name {
            0 => None,
            index => Some(self.multiname(index)?.clone()),
        };
        let interfaces = instance
            .interfaces
            .iter()
            .map(|&i| self.multiname(i).cloned())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ClassDesc {
            name: self.qname(instance.name)?,
            super_name,
            flags,
            protected_ns,
            interfaces,
            iinit: check(instance.init, methods)? as u32,
            cinit: check(class.init, methods)? as u32,
            instance_traits: self.traits(&instance.traits)?,
            static_traits: self.traits(&class.traits)?,
        })
    }
}

fn namespace_kind(kind: NamespaceKindInfo) -> NamespaceKind {
    match kind {
        NamespaceKindInfo::Namespace => NamespaceKind::Namespace,
        NamespaceKindInfo::Package => NamespaceKind::Package,
        NamespaceKindInfo::PackageInternal => NamespaceKind::PackageInternal,
        NamespaceKindInfo::Protected => NamespaceKind::Protected,
        NamespaceKindInfo::Explicit => NamespaceKind::Explicit,
        NamespaceKindInfo::StaticProtected => NamespaceKind::StaticProtected,
        NamespaceKindInfo::Private => NamespaceKind::Private,
    }
}

#[cfg(test)]
mod tests {
    use bytecode::{BytecodeBuilder, MethodInfo, Op, UnitBuilder};

    use super::*;

    fn load(file: &AbcFile) -> Result<LoadedUnit, VmError> {
        let strings = StringTable::new();
        let mut next = 0;
        UnitLoader::new(file, 0, &strings, &mut next).load()
    }

    fn code_of(len_hint: &[Instruction]) -> Vec<u8> {
        let mut b = BytecodeBuilder::new();
        for inst in len_hint {
            b.emit(inst).unwrap();
        }
        b.finish().unwrap()
    }

    fn verify_code(err: VmError) -> u32 {
        match err {
            VmError::Verify { code, .. } => code,
            other => panic!("expected a verify error, got {other:?}"),
        }
    }

    fn single_method(code: Vec<u8>, local_count: u32) -> AbcFile {
        let mut u = UnitBuilder::new();
        let init = u.function("", 0, local_count, code);
        u.script(init, Vec::new());
        u.finish()
    }

    // ── Method bodies ─────────────────────────────────────────────────

    #[test]
    fn branches_become_instruction_indices() {
        let mut b = BytecodeBuilder::new();
        let top = b.here();
        b.op(Op::PushFalse);
        b.branch(Op::IfTrue, top);
        b.op(Op::ReturnVoid);
        let unit = load(&single_method(b.finish().unwrap(), 1)).unwrap();
        let body = unit.methods[0].body.as_ref().unwrap();
        assert_eq!(body.offsets, vec![0, 1, 5]);
        assert_eq!(body.index_of(0), Some(0));
        assert_eq!(body.index_of(3), None);
    }

    #[test]
    fn branch_into_an_operand_is_rejected() {
        let code = code_of(&[
            Instruction::PushByte { value: 1 },
            Instruction::Jump { target: 1 },
            Instruction::ReturnVoid,
        ]);
        let err = load(&single_method(code, 1)).unwrap_err();
        assert_eq!(verify_code(err), 1021);
    }

    #[test]
    fn falling_off_the_end_is_rejected() {
        let code = code_of(&[Instruction::PushNull]);
        assert_eq!(verify_code(load(&single_method(code, 1)).unwrap_err()), 1020);
        assert_eq!(verify_code(load(&single_method(Vec::new(), 1)).unwrap_err()), 1020);
    }

    #[test]
    fn registers_are_bounded_by_local_count() {
        let code = code_of(&[Instruction::GetLocal { reg: 3 }, Instruction::ReturnValue]);
        assert_eq!(verify_code(load(&single_method(code, 2)).unwrap_err()), 1025);
    }

    #[test]
    fn pool_indices_are_checked() {
        let code = code_of(&[Instruction::PushString { index: 40 }, Instruction::ReturnValue]);
        let err = load(&single_method(code, 1)).unwrap_err();
        assert_eq!(verify_code(err), 1032);

        let code = code_of(&[Instruction::GetProperty { name: 99 }, Instruction::ReturnValue]);
        assert_eq!(verify_code(load(&single_method(code, 1)).unwrap_err()), 1032);
    }

    #[test]
    fn handler_ranges_map_to_instructions() {
        let mut u = UnitBuilder::new();
        let code = code_of(&[
            Instruction::PushNull,
            Instruction::Throw,
            Instruction::ReturnValue,
        ]);
        let init = u.function_with(
            MethodInfo::default(),
            1,
            code,
            vec![ExceptionInfo {
                from: 0,
                to: 2,
                target: 2,
                exc_type: 0,
                var_name: 0,
            }],
        );
        u.script(init, Vec::new());
        let unit = load(&u.finish()).unwrap();
        let handler = &unit.methods[0].body.as_ref().unwrap().handlers[0];
        assert_eq!((handler.from, handler.to, handler.target), (0, 2, 2));
        assert_eq!(handler.exc_type, SlotType::Any);
    }

    // ── Traits ────────────────────────────────────────────────────────

    #[test]
    fn slot_types_and_defaults() {
        let mut u = UnitBuilder::new();
        let init = u.function("", 0, 1, vec![Op::ReturnVoid as u8]);
        let int = u.public_name("int");
        let number = u.public_name("Number");
        let point = u.public_name("Point");
        let (a, b, c) = (u.public_name("a"), u.public_name("b"), u.public_name("c"));
        let half = u.double(0.5);
        u.script(
            init,
            vec![
                TraitInfo::slot(a, 0, int, Some(ConstValue::Double(half))),
                TraitInfo::slot(b, 0, number, None),
                TraitInfo::constant(c, 0, point, None),
            ],
        );
        let unit = load(&u.finish()).unwrap();
        let traits = &unit.scripts[0].traits;
        match &traits[0].kind {
            TraitDescKind::Slot { ty, default, .. } => {
                assert_eq!(*ty, SlotType::Int);
                assert!(matches!(default, Atom::Int(0)));
            }
            _ => panic!("expected a slot"),
        }
        match &traits[1].kind {
            TraitDescKind::Slot { default, .. } => {
                assert!(default.as_f64().is_some_and(f64::is_nan))
            }
            _ => panic!("expected a slot"),
        }
        match &traits[2].kind {
            TraitDescKind::Slot { ty, constant, default, .. } => {
                assert!(matches!(ty, SlotType::Class(_)));
                assert!(*constant);
                assert!(default.is_null());
            }
            _ => panic!("expected a const"),
        }
    }

    #[test]
    fn namespace_defaults_are_rejected() {
        let mut u = UnitBuilder::new();
        let init = u.function("", 0, 1, vec![Op::ReturnVoid as u8]);
        let ns = u.public_ns();
        let name = u.public_name("n");
        u.script(init, vec![TraitInfo::slot(name, 0, 0, Some(ConstValue::Namespace(ns)))]);
        assert_eq!(verify_code(load(&u.finish()).unwrap_err()), 1033);
    }

    #[test]
    fn private_namespaces_are_unique_per_pool_entry() {
        let mut u = UnitBuilder::new();
        let a = u.private_ns("C");
        let b = u.private_ns("C");
        let init = u.function("", 0, 1, vec![Op::ReturnVoid as u8]);
        u.script(init, Vec::new());
        let unit = load(&u.finish()).unwrap();
        assert_ne!(unit.namespaces[a as usize], unit.namespaces[b as usize]);
    }
}
