use core::fmt;

use crate::op::Op;

/// Comparison performed by a conditional branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    StrictEq,
    StrictNe,
    /// `!(a < b)`. Taken when the comparison is undefined (NaN operands).
    NotLt,
    NotLe,
    NotGt,
    NotGe,
}

impl Condition {
    pub const fn op(self) -> Op {
        match self {
            Condition::Eq => Op::IfEq,
            Condition::Ne => Op::IfNe,
            Condition::Lt => Op::IfLt,
            Condition::Le => Op::IfLe,
            Condition::Gt => Op::IfGt,
            Condition::Ge => Op::IfGe,
            Condition::StrictEq => Op::IfStrictEq,
            Condition::StrictNe => Op::IfStrictNe,
            Condition::NotLt => Op::IfNlt,
            Condition::NotLe => Op::IfNle,
            Condition::NotGt => Op::IfNgt,
            Condition::NotGe => Op::IfNge,
        }
    }

    pub const fn from_op(op: Op) -> Option<Condition> {
        Some(match op {
            Op::IfEq => Condition::Eq,
            Op::IfNe => Condition::Ne,
            Op::IfLt => Condition::Lt,
            Op::IfLe => Condition::Le,
            Op::IfGt => Condition::Gt,
            Op::IfGe => Condition::Ge,
            Op::IfStrictEq => Condition::StrictEq,
            Op::IfStrictNe => Condition::StrictNe,
            Op::IfNlt => Condition::NotLt,
            Op::IfNle => Condition::NotLe,
            Op::IfNgt => Condition::NotGt,
            Op::IfNge => Condition::NotGe,
            _ => return None,
        })
    }
}

/// A decoded instruction.
///
/// Pool indices (`index`, `name`, `method`, `class`) are raw `u30` values;
/// the loader checks them against the constant pool. Branch `target`s are
/// absolute byte offsets into the method body.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Bkpt,
    Nop,
    Label,
    Throw,
    GetSuper { name: u32 },
    SetSuper { name: u32 },
    Kill { reg: u32 },

    Jump { target: u32 },
    IfTrue { target: u32 },
    IfFalse { target: u32 },
    If { cond: Condition, target: u32 },
    LookupSwitch { default: u32, cases: Box<[u32]> },

    PushWith,
    PopScope,
    PushScope,
    GetGlobalScope,
    GetScopeObject { index: u8 },

    NextName,
    NextValue,
    HasNext,
    HasNext2 { object_reg: u32, index_reg: u32 },

    PushNull,
    PushUndefined,
    PushTrue,
    PushFalse,
    PushNaN,
    PushByte { value: i8 },
    PushShort { value: i16 },
    PushString { index: u32 },
    PushInt { index: u32 },
    PushUInt { index: u32 },
    PushDouble { index: u32 },
    PushNamespace { index: u32 },
    Pop,
    Dup,
    Swap,

    NewFunction { method: u32 },
    Call { argc: u32 },
    Construct { argc: u32 },
    CallMethod { disp_id: u32, argc: u32 },
    CallStatic { method: u32, argc: u32 },
    CallSuper { name: u32, argc: u32 },
    CallSuperVoid { name: u32, argc: u32 },
    CallProperty { name: u32, argc: u32 },
    CallPropLex { name: u32, argc: u32 },
    CallPropVoid { name: u32, argc: u32 },
    ConstructSuper { argc: u32 },
    ConstructProp { name: u32, argc: u32 },
    ReturnVoid,
    ReturnValue,

    NewObject { argc: u32 },
    NewArray { argc: u32 },
    NewActivation,
    NewClass { class: u32 },
    NewCatch { index: u32 },

    FindPropStrict { name: u32 },
    FindProperty { name: u32 },
    FindDef { name: u32 },
    GetLex { name: u32 },
    GetProperty { name: u32 },
    SetProperty { name: u32 },
    InitProperty { name: u32 },
    DeleteProperty { name: u32 },
    GetSlot { slot: u32 },
    SetSlot { slot: u32 },
    GetGlobalSlot { slot: u32 },
    SetGlobalSlot { slot: u32 },

    GetLocal { reg: u32 },
    SetLocal { reg: u32 },

    ConvertS,
    ConvertI,
    ConvertU,
    ConvertD,
    ConvertB,
    ConvertO,
    Coerce { name: u32 },
    CoerceA,
    CoerceB,
    CoerceD,
    CoerceI,
    CoerceO,
    CoerceS,
    CoerceU,
    AsType { name: u32 },
    AsTypeLate,
    IsType { name: u32 },
    IsTypeLate,
    InstanceOf,
    In,
    TypeOf,

    Negate,
    Increment,
    Decrement,
    IncLocal { reg: u32 },
    DecLocal { reg: u32 },
    Not,
    BitNot,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    LShift,
    RShift,
    URShift,
    BitAnd,
    BitOr,
    BitXor,
    Equals,
    StrictEquals,
    LessThan,
    LessEquals,
    GreaterThan,
    GreaterEquals,
    IncrementI,
    DecrementI,
    IncLocalI { reg: u32 },
    DecLocalI { reg: u32 },
    NegateI,
    AddI,
    SubtractI,
    MultiplyI,

    Debug { kind: u8, name: u32, reg: u8, extra: u32 },
    DebugLine { line: u32 },
    DebugFile { file: u32 },
}

impl Instruction {
    /// The opcode this instruction is encoded with. Local accesses to
    /// registers 0-3 use the short forms.
    pub fn op(&self) -> Op {
        match self {
            Self::Bkpt => Op::Bkpt,
            Self::Nop => Op::Nop,
            Self::Label => Op::Label,
            Self::Throw => Op::Throw,
            Self::GetSuper { .. } => Op::GetSuper,
            Self::SetSuper { .. } => Op::SetSuper,
            Self::Kill { .. } => Op::Kill,
            Self::Jump { .. } => Op::Jump,
            Self::IfTrue { .. } => Op::IfTrue,
            Self::IfFalse { .. } => Op::IfFalse,
            Self::If { cond, .. } => cond.op(),
            Self::LookupSwitch { .. } => Op::LookupSwitch,
            Self::PushWith => Op::PushWith,
            Self::PopScope => Op::PopScope,
            Self::PushScope => Op::PushScope,
            Self::GetGlobalScope => Op::GetGlobalScope,
            Self::GetScopeObject { .. } => Op::GetScopeObject,
            Self::NextName => Op::NextName,
            Self::NextValue => Op::NextValue,
            Self::HasNext => Op::HasNext,
            Self::HasNext2 { .. } => Op::HasNext2,
            Self::PushNull => Op::PushNull,
            Self::PushUndefined => Op::PushUndefined,
            Self::PushTrue => Op::PushTrue,
            Self::PushFalse => Op::PushFalse,
            Self::PushNaN => Op::PushNaN,
            Self::PushByte { .. } => Op::PushByte,
            Self::PushShort { .. } => Op::PushShort,
            Self::PushString { .. } => Op::PushString,
            Self::PushInt { .. } => Op::PushInt,
            Self::PushUInt { .. } => Op::PushUInt,
            Self::PushDouble { .. } => Op::PushDouble,
            Self::PushNamespace { .. } => Op::PushNamespace,
            Self::Pop => Op::Pop,
            Self::Dup => Op::Dup,
            Self::Swap => Op::Swap,
            Self::NewFunction { .. } => Op::NewFunction,
            Self::Call { .. } => Op::Call,
            Self::Construct { .. } => Op::Construct,
            Self::CallMethod { .. } => Op::CallMethod,
            Self::CallStatic { .. } => Op::CallStatic,
            Self::CallSuper { .. } => Op::CallSuper,
            Self::CallSuperVoid { .. } => Op::CallSuperVoid,
            Self::CallProperty { .. } => Op::CallProperty,
            Self::CallPropLex { .. } => Op::CallPropLex,
            Self::CallPropVoid { .. } => Op::CallPropVoid,
            Self::ConstructSuper { .. } => Op::ConstructSuper,
            Self::ConstructProp { .. } => Op::ConstructProp,
            Self::ReturnVoid => Op::ReturnVoid,
            Self::ReturnValue => Op::ReturnValue,
            Self::NewObject { .. } => Op::NewObject,
            Self::NewArray { .. } => Op::NewArray,
            Self::NewActivation => Op::NewActivation,
            Self::NewClass { .. } => Op::NewClass,
            Self::NewCatch { .. } => Op::NewCatch,
            Self::FindPropStrict { .. } => Op::FindPropStrict,
            Self::FindProperty { .. } => Op::FindProperty,
            Self::FindDef { .. } => Op::FindDef,
            Self::GetLex { .. } => Op::GetLex,
            Self::GetProperty { .. } => Op::GetProperty,
            Self::SetProperty { .. } => Op::SetProperty,
            Self::InitProperty { .. } => Op::InitProperty,
            Self::DeleteProperty { .. } => Op::DeleteProperty,
            Self::GetSlot { .. } => Op::GetSlot,
            Self::SetSlot { .. } => Op::SetSlot,
            Self::GetGlobalSlot { .. } => Op::GetGlobalSlot,
            Self::SetGlobalSlot { .. } => Op::SetGlobalSlot,
            Self::GetLocal { reg: 0 } => Op::GetLocal0,
            Self::GetLocal { reg: 1 } => Op::GetLocal1,
            Self::GetLocal { reg: 2 } => Op::GetLocal2,
            Self::GetLocal { reg: 3 } => Op::GetLocal3,
            Self::GetLocal { .. } => Op::GetLocal,
            Self::SetLocal { reg: 0 } => Op::SetLocal0,
            Self::SetLocal { reg: 1 } => Op::SetLocal1,
            Self::SetLocal { reg: 2 } => Op::SetLocal2,
            Self::SetLocal { reg: 3 } => Op::SetLocal3,
            Self::SetLocal { .. } => Op::SetLocal,
            Self::ConvertS => Op::ConvertS,
            Self::ConvertI => Op::ConvertI,
            Self::ConvertU => Op::ConvertU,
            Self::ConvertD => Op::ConvertD,
            Self::ConvertB => Op::ConvertB,
            Self::ConvertO => Op::ConvertO,
            Self::Coerce { .. } => Op::Coerce,
            Self::CoerceA => Op::CoerceA,
            Self::CoerceB => Op::CoerceB,
            Self::CoerceD => Op::CoerceD,
            Self::CoerceI => Op::CoerceI,
            Self::CoerceO => Op::CoerceO,
            Self::CoerceS => Op::CoerceS,
            Self::CoerceU => Op::CoerceU,
            Self::AsType { .. } => Op::AsType,
            Self::AsTypeLate => Op::AsTypeLate,
            Self::IsType { .. } => Op::IsType,
            Self::IsTypeLate => Op::IsTypeLate,
            Self::InstanceOf => Op::InstanceOf,
            Self::In => Op::In,
            Self::TypeOf => Op::TypeOf,
            Self::Negate => Op::Negate,
            Self::Increment => Op::Increment,
            Self::Decrement => Op::Decrement,
            Self::IncLocal { .. } => Op::IncLocal,
            Self::DecLocal { .. } => Op::DecLocal,
            Self::Not => Op::Not,
            Self::BitNot => Op::BitNot,
            Self::Add => Op::Add,
            Self::Subtract => Op::Subtract,
            Self::Multiply => Op::Multiply,
            Self::Divide => Op::Divide,
            Self::Modulo => Op::Modulo,
            Self::LShift => Op::LShift,
            Self::RShift => Op::RShift,
            Self::URShift => Op::URShift,
            Self::BitAnd => Op::BitAnd,
            Self::BitOr => Op::BitOr,
            Self::BitXor => Op::BitXor,
            Self::Equals => Op::Equals,
            Self::StrictEquals => Op::StrictEquals,
            Self::LessThan => Op::LessThan,
            Self::LessEquals => Op::LessEquals,
            Self::GreaterThan => Op::GreaterThan,
            Self::GreaterEquals => Op::GreaterEquals,
            Self::IncrementI => Op::IncrementI,
            Self::DecrementI => Op::DecrementI,
            Self::IncLocalI { .. } => Op::IncLocalI,
            Self::DecLocalI { .. } => Op::DecLocalI,
            Self::NegateI => Op::NegateI,
            Self::AddI => Op::AddI,
            Self::SubtractI => Op::SubtractI,
            Self::MultiplyI => Op::MultiplyI,
            Self::Debug { .. } => Op::Debug,
            Self::DebugLine { .. } => Op::DebugLine,
            Self::DebugFile { .. } => Op::DebugFile,
        }
    }

    /// Branch targets of this instruction, excluding fall-through.
    pub fn targets(&self) -> Vec<u32> {
        match self {
            Self::Jump { target }
            | Self::IfTrue { target }
            | Self::IfFalse { target }
            | Self::If { target, .. } => vec![*target],
            Self::LookupSwitch { default, cases } => {
                let mut targets = Vec::with_capacity(cases.len() + 1);
                targets.push(*default);
                targets.extend_from_slice(cases);
                targets
            }
            _ => Vec::new(),
        }
    }

    /// Whether control never falls through to the next instruction.
    pub fn ends_block(&self) -> bool {
        matches!(
            self,
            Self::Jump { .. }
                | Self::LookupSwitch { .. }
                | Self::Throw
                | Self::ReturnVoid
                | Self::ReturnValue
        )
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = self.op();
        match self {
            Self::GetSuper { name }
            | Self::SetSuper { name }
            | Self::FindPropStrict { name }
            | Self::FindProperty { name }
            | Self::FindDef { name }
            | Self::GetLex { name }
            | Self::GetProperty { name }
            | Self::SetProperty { name }
            | Self::InitProperty { name }
            | Self::DeleteProperty { name }
            | Self::Coerce { name }
            | Self::AsType { name }
            | Self::IsType { name } => write!(f, "{op} mn#{name}"),

            Self::CallSuper { name, argc }
            | Self::CallSuperVoid { name, argc }
            | Self::CallProperty { name, argc }
            | Self::CallPropLex { name, argc }
            | Self::CallPropVoid { name, argc }
            | Self::ConstructProp { name, argc } => write!(f, "{op} mn#{name} ({argc})"),

            Self::Call { argc }
            | Self::Construct { argc }
            | Self::ConstructSuper { argc }
            | Self::NewObject { argc }
            | Self::NewArray { argc } => write!(f, "{op} ({argc})"),

            Self::CallMethod { disp_id, argc } => write!(f, "{op} disp#{disp_id} ({argc})"),
            Self::CallStatic { method, argc } => write!(f, "{op} method#{method} ({argc})"),

            Self::Jump { target }
            | Self::IfTrue { target }
            | Self::IfFalse { target }
            | Self::If { target, .. } => write!(f, "{op} @{target}"),
            Self::LookupSwitch { default, cases } => {
                write!(f, "{op} default:@{default} [")?;
                for (i, case) in cases.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "@{case}")?;
                }
                f.write_str("]")
            }

            Self::Kill { reg }
            | Self::IncLocal { reg }
            | Self::DecLocal { reg }
            | Self::IncLocalI { reg }
            | Self::DecLocalI { reg } => write!(f, "{op} r{reg}"),
            Self::GetLocal { reg } | Self::SetLocal { reg } if *reg > 3 => write!(f, "{op} r{reg}"),
            Self::HasNext2 {
                object_reg,
                index_reg,
            } => write!(f, "{op} r{object_reg}, r{index_reg}"),

            Self::GetScopeObject { index } => write!(f, "{op} {index}"),
            Self::PushByte { value } => write!(f, "{op} {value}"),
            Self::PushShort { value } => write!(f, "{op} {value}"),
            Self::PushString { index } => write!(f, "{op} str#{index}"),
            Self::PushInt { index } => write!(f, "{op} int#{index}"),
            Self::PushUInt { index } => write!(f, "{op} uint#{index}"),
            Self::PushDouble { index } => write!(f, "{op} double#{index}"),
            Self::PushNamespace { index } => write!(f, "{op} ns#{index}"),
            Self::NewFunction { method } => write!(f, "{op} method#{method}"),
            Self::NewClass { class } => write!(f, "{op} class#{class}"),
            Self::NewCatch { index } => write!(f, "{op} exception#{index}"),
            Self::GetSlot { slot }
            | Self::SetSlot { slot }
            | Self::GetGlobalSlot { slot }
            | Self::SetGlobalSlot { slot } => write!(f, "{op} {slot}"),
            Self::Debug {
                kind,
                name,
                reg,
                extra,
            } => write!(f, "{op} {kind} str#{name} r{reg} {extra}"),
            Self::DebugLine { line } => write!(f, "{op} {line}"),
            Self::DebugFile { file } => write!(f, "{op} str#{file}"),

            _ => write!(f, "{op}"),
        }
    }
}
