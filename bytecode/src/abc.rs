//! In-memory form of an ABC unit: constant pool, method signatures and
//! bodies, class and script descriptors.
//!
//! Indices are kept exactly as they appear in the file. Entry 0 of every
//! pool table is a placeholder (`0`, `NaN`, `""`, the any-namespace, the
//! any-name), so pool indices can be used directly.

/// ABC version written by [`UnitBuilder`](crate::UnitBuilder).
pub const MAJOR_VERSION: u16 = 46;
pub const MINOR_VERSION: u16 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamespaceKindInfo {
    Namespace,
    Package,
    PackageInternal,
    Protected,
    Explicit,
    StaticProtected,
    Private,
}

impl NamespaceKindInfo {
    pub const fn to_byte(self) -> u8 {
        match self {
            NamespaceKindInfo::Namespace => 0x08,
            NamespaceKindInfo::Package => 0x16,
            NamespaceKindInfo::PackageInternal => 0x17,
            NamespaceKindInfo::Protected => 0x18,
            NamespaceKindInfo::Explicit => 0x19,
            NamespaceKindInfo::StaticProtected => 0x1A,
            NamespaceKindInfo::Private => 0x05,
        }
    }

    pub const fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0x08 => NamespaceKindInfo::Namespace,
            0x16 => NamespaceKindInfo::Package,
            0x17 => NamespaceKindInfo::PackageInternal,
            0x18 => NamespaceKindInfo::Protected,
            0x19 => NamespaceKindInfo::Explicit,
            0x1A => NamespaceKindInfo::StaticProtected,
            0x05 => NamespaceKindInfo::Private,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NamespaceInfo {
    pub kind: NamespaceKindInfo,
    /// String index of the URI.
    pub name: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MultinameInfo {
    /// One namespace, one name. `ns`/`name` of 0 mean "any".
    QName { ns: u32, name: u32, attribute: bool },
    /// Namespace from the operand stack.
    RtQName { name: u32, attribute: bool },
    /// Namespace and name from the operand stack.
    RtQNameL { attribute: bool },
    /// Name plus namespace set.
    Multiname { name: u32, ns_set: u32, attribute: bool },
    /// Name from the operand stack, namespace set from the pool.
    MultinameL { ns_set: u32, attribute: bool },
    /// Parameterised type such as `Vector.<int>`.
    TypeName { base: u32, params: Vec<u32> },
}

impl MultinameInfo {
    pub const QNAME: u8 = 0x07;
    pub const QNAME_A: u8 = 0x0D;
    pub const RTQNAME: u8 = 0x0F;
    pub const RTQNAME_A: u8 = 0x10;
    pub const RTQNAME_L: u8 = 0x11;
    pub const RTQNAME_LA: u8 = 0x12;
    pub const MULTINAME: u8 = 0x09;
    pub const MULTINAME_A: u8 = 0x0E;
    pub const MULTINAME_L: u8 = 0x1B;
    pub const MULTINAME_LA: u8 = 0x1C;
    pub const TYPENAME: u8 = 0x1D;

    /// The any-name `*`, stored at pool index 0.
    pub const ANY: MultinameInfo = MultinameInfo::QName {
        ns: 0,
        name: 0,
        attribute: false,
    };
}

/// A pool-backed constant: default values of optional parameters and slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstValue {
    Undefined,
    Null,
    True,
    False,
    Int(u32),
    UInt(u32),
    Double(u32),
    Utf8(u32),
    Namespace(u32),
}

impl ConstValue {
    /// `(vindex, vkind)` as stored in the file.
    pub fn encode(self) -> (u32, u8) {
        match self {
            ConstValue::Undefined => (0, 0x00),
            ConstValue::Null => (0x0C, 0x0C),
            ConstValue::True => (0x0B, 0x0B),
            ConstValue::False => (0x0A, 0x0A),
            ConstValue::Int(i) => (i, 0x03),
            ConstValue::UInt(i) => (i, 0x04),
            ConstValue::Double(i) => (i, 0x06),
            ConstValue::Utf8(i) => (i, 0x01),
            ConstValue::Namespace(i) => (i, 0x08),
        }
    }

    pub fn decode(index: u32, kind: u8) -> Option<Self> {
        Some(match kind {
            0x00 => ConstValue::Undefined,
            0x0C => ConstValue::Null,
            0x0B => ConstValue::True,
            0x0A => ConstValue::False,
            0x03 => ConstValue::Int(index),
            0x04 => ConstValue::UInt(index),
            0x06 => ConstValue::Double(index),
            0x01 => ConstValue::Utf8(index),
            k if NamespaceKindInfo::from_byte(k).is_some() => ConstValue::Namespace(index),
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstantPool {
    pub ints: Vec<i32>,
    pub uints: Vec<u32>,
    pub doubles: Vec<f64>,
    pub strings: Vec<String>,
    pub namespaces: Vec<NamespaceInfo>,
    /// Each set lists namespace indices.
    pub ns_sets: Vec<Vec<u32>>,
    pub multinames: Vec<MultinameInfo>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self {
            ints: vec![0],
            uints: vec![0],
            doubles: vec![f64::NAN],
            strings: vec![String::new()],
            namespaces: vec![NamespaceInfo {
                kind: NamespaceKindInfo::Namespace,
                name: 0,
            }],
            ns_sets: vec![Vec::new()],
            multinames: vec![MultinameInfo::ANY],
        }
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct MethodFlags: u8 {
        const NEED_ARGUMENTS  = 0x01;
        const NEED_ACTIVATION = 0x02;
        const NEED_REST       = 0x04;
        const HAS_OPTIONAL    = 0x08;
        const SET_DXNS        = 0x40;
        const HAS_PARAM_NAMES = 0x80;
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MethodInfo {
    /// Multiname index of each parameter type (0 = any).
    pub params: Vec<u32>,
    pub return_type: u32,
    /// String index of the debug name.
    pub name: u32,
    pub flags: MethodFlags,
    /// Defaults for the trailing optional parameters.
    pub optional: Vec<ConstValue>,
    pub param_names: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetadataInfo {
    pub name: u32,
    pub items: Vec<(u32, u32)>,
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct TraitAttributes: u8 {
        const FINAL    = 0x1;
        const OVERRIDE = 0x2;
        const METADATA = 0x4;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TraitData {
    Slot {
        slot_id: u32,
        type_name: u32,
        value: Option<ConstValue>,
    },
    Const {
        slot_id: u32,
        type_name: u32,
        value: Option<ConstValue>,
    },
    Method { disp_id: u32, method: u32 },
    Getter { disp_id: u32, method: u32 },
    Setter { disp_id: u32, method: u32 },
    Class { slot_id: u32, class: u32 },
    Function { slot_id: u32, method: u32 },
}

impl TraitData {
    pub fn kind_byte(&self) -> u8 {
        match self {
            TraitData::Slot { .. } => 0,
            TraitData::Method { .. } => 1,
            TraitData::Getter { .. } => 2,
            TraitData::Setter { .. } => 3,
            TraitData::Class { .. } => 4,
            TraitData::Function { .. } => 5,
            TraitData::Const { .. } => 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraitInfo {
    /// Multiname index; must be a QName.
    pub name: u32,
    pub data: TraitData,
    pub attributes: TraitAttributes,
    pub metadata: Vec<u32>,
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct InstanceFlags: u8 {
        const SEALED       = 0x01;
        const FINAL        = 0x02;
        const INTERFACE    = 0x04;
        const PROTECTED_NS = 0x08;
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct InstanceInfo {
    pub name: u32,
    /// Multiname index of the base class (0 = none).
    pub super_name: u32,
    pub flags: InstanceFlags,
    pub protected_ns: u32,
    pub interfaces: Vec<u32>,
    /// Method index of the instance initializer.
    pub init: u32,
    pub traits: Vec<TraitInfo>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClassInfo {
    /// Method index of the static initializer.
    pub init: u32,
    pub traits: Vec<TraitInfo>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScriptInfo {
    pub init: u32,
    pub traits: Vec<TraitInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExceptionInfo {
    /// Covered code range `[from, to)`.
    pub from: u32,
    pub to: u32,
    pub target: u32,
    /// Multiname index of the caught type (0 = any).
    pub exc_type: u32,
    pub var_name: u32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MethodBody {
    pub method: u32,
    pub max_stack: u32,
    pub local_count: u32,
    pub init_scope_depth: u32,
    pub max_scope_depth: u32,
    pub code: Vec<u8>,
    pub exceptions: Vec<ExceptionInfo>,
    /// Traits of the activation object.
    pub traits: Vec<TraitInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AbcFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub methods: Vec<MethodInfo>,
    pub metadata: Vec<MetadataInfo>,
    /// Parallel to `classes`.
    pub instances: Vec<InstanceInfo>,
    pub classes: Vec<ClassInfo>,
    pub scripts: Vec<ScriptInfo>,
    pub bodies: Vec<MethodBody>,
}

impl Default for AbcFile {
    fn default() -> Self {
        Self {
            minor_version: MINOR_VERSION,
            major_version: MAJOR_VERSION,
            constant_pool: ConstantPool::default(),
            methods: Vec::new(),
            metadata: Vec::new(),
            instances: Vec::new(),
            classes: Vec::new(),
            scripts: Vec::new(),
            bodies: Vec::new(),
        }
    }
}

impl AbcFile {
    /// Body of method `method`, if it has one.
    pub fn body_of(&self, method: u32) -> Option<&MethodBody> {
        self.bodies.iter().find(|body| body.method == method)
    }
}
