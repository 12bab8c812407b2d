use crate::instruction::{Condition, Instruction};
use crate::op::Op;
use crate::stream::ByteReader;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unexpected end of stream at byte {offset}")]
    Truncated { offset: usize },
    #[error("unknown opcode 0x{byte:02x} at byte {offset}")]
    UnknownOpcode { offset: usize, byte: u8 },
    #[error("malformed variable-length integer at byte {offset}")]
    BadVarint { offset: usize },
    #[error("branch at byte {offset} targets {target}, outside the method body")]
    BadTarget { offset: usize, target: i64 },
}

/// Decodes a method body's code into [`Instruction`]s.
///
/// Every read is bounds-checked: malformed code produces a [`DecodeError`],
/// after which iteration stops.
pub struct BytecodeDecoder<'a> {
    reader: ByteReader<'a>,
    failed: bool,
}

impl<'a> BytecodeDecoder<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            reader: ByteReader::new(bytes),
            failed: false,
        }
    }

    /// Start decoding at `offset`.
    pub fn at(bytes: &'a [u8], offset: usize) -> Self {
        Self {
            reader: ByteReader::at(bytes, offset),
            failed: false,
        }
    }

    /// Current byte offset in the stream.
    #[inline(always)]
    pub fn offset(&self) -> usize {
        self.reader.pos()
    }

    #[inline(always)]
    pub fn is_at_end(&self) -> bool {
        self.reader.is_at_end()
    }

    /// Decode the next instruction, or `None` at end of stream.
    pub fn decode_next(&mut self) -> Option<Result<(u32, Instruction), DecodeError>> {
        if self.failed || self.is_at_end() {
            return None;
        }
        let start = self.reader.pos();
        let result = self.decode(start).map(|inst| (start as u32, inst));
        self.failed = result.is_err();
        Some(result)
    }

    fn decode(&mut self, start: usize) -> Result<Instruction, DecodeError> {
        let byte = self.reader.read_u8()?;
        let op = Op::try_from(byte).map_err(|byte| DecodeError::UnknownOpcode {
            offset: start,
            byte,
        })?;

        let r = &mut self.reader;
        let inst = match op {
            Op::Bkpt => Instruction::Bkpt,
            Op::Nop => Instruction::Nop,
            Op::Label => Instruction::Label,
            Op::Throw => Instruction::Throw,
            Op::GetSuper => Instruction::GetSuper { name: r.read_u30()? },
            Op::SetSuper => Instruction::SetSuper { name: r.read_u30()? },
            Op::Kill => Instruction::Kill { reg: r.read_u30()? },

            Op::Jump
            | Op::IfTrue
            | Op::IfFalse
            | Op::IfEq
            | Op::IfNe
            | Op::IfLt
            | Op::IfLe
            | Op::IfGt
            | Op::IfGe
            | Op::IfStrictEq
            | Op::IfStrictNe
            | Op::IfNlt
            | Op::IfNle
            | Op::IfNgt
            | Op::IfNge => {
                let offset = r.read_s24()?;
                let target = Self::target(start, r.pos(), offset)?;
                match (op, Condition::from_op(op)) {
                    (_, Some(cond)) => Instruction::If { cond, target },
                    (Op::Jump, None) => Instruction::Jump { target },
                    (Op::IfTrue, None) => Instruction::IfTrue { target },
                    _ => Instruction::IfFalse { target },
                }
            }

            Op::LookupSwitch => {
                let default = r.read_s24()?;
                let count = r.read_u30()? as usize;
                let mut offsets = Vec::with_capacity((count + 1).min(1024));
                for _ in 0..=count {
                    offsets.push(r.read_s24()?);
                }
                let default = Self::target(start, start, default)?;
                let cases = offsets
                    .into_iter()
                    .map(|offset| Self::target(start, start, offset))
                    .collect::<Result<Box<[u32]>, _>>()?;
                Instruction::LookupSwitch { default, cases }
            }

            Op::PushWith => Instruction::PushWith,
            Op::PopScope => Instruction::PopScope,
            Op::PushScope => Instruction::PushScope,
            Op::GetGlobalScope => Instruction::GetGlobalScope,
            Op::GetScopeObject => Instruction::GetScopeObject { index: r.read_u8()? },

            Op::NextName => Instruction::NextName,
            Op::NextValue => Instruction::NextValue,
            Op::HasNext => Instruction::HasNext,
            Op::HasNext2 => {
                let object_reg = r.read_u30()?;
                let index_reg = r.read_u30()?;
                Instruction::HasNext2 {
                    object_reg,
                    index_reg,
                }
            }

            Op::PushNull => Instruction::PushNull,
            Op::PushUndefined => Instruction::PushUndefined,
            Op::PushTrue => Instruction::PushTrue,
            Op::PushFalse => Instruction::PushFalse,
            Op::PushNaN => Instruction::PushNaN,
            Op::PushByte => Instruction::PushByte {
                value: r.read_u8()? as i8,
            },
            Op::PushShort => Instruction::PushShort {
                value: r.read_u30()? as u16 as i16,
            },
            Op::PushString => Instruction::PushString { index: r.read_u30()? },
            Op::PushInt => Instruction::PushInt { index: r.read_u30()? },
            Op::PushUInt => Instruction::PushUInt { index: r.read_u30()? },
            Op::PushDouble => Instruction::PushDouble { index: r.read_u30()? },
            Op::PushNamespace => Instruction::PushNamespace { index: r.read_u30()? },
            Op::Pop => Instruction::Pop,
            Op::Dup => Instruction::Dup,
            Op::Swap => Instruction::Swap,

            Op::NewFunction => Instruction::NewFunction { method: r.read_u30()? },
            Op::Call => Instruction::Call { argc: r.read_u30()? },
            Op::Construct => Instruction::Construct { argc: r.read_u30()? },
            Op::CallMethod => {
                let disp_id = r.read_u30()?;
                let argc = r.read_u30()?;
                Instruction::CallMethod { disp_id, argc }
            }
            Op::CallStatic => {
                let method = r.read_u30()?;
                let argc = r.read_u30()?;
                Instruction::CallStatic { method, argc }
            }
            Op::CallSuper
            | Op::CallSuperVoid
            | Op::CallProperty
            | Op::CallPropLex
            | Op::CallPropVoid
            | Op::ConstructProp => {
                let name = r.read_u30()?;
                let argc = r.read_u30()?;
                match op {
                    Op::CallSuper => Instruction::CallSuper { name, argc },
                    Op::CallSuperVoid => Instruction::CallSuperVoid { name, argc },
                    Op::CallProperty => Instruction::CallProperty { name, argc },
                    Op::CallPropLex => Instruction::CallPropLex { name, argc },
                    Op::CallPropVoid => Instruction::CallPropVoid { name, argc },
                    _ => Instruction::ConstructProp { name, argc },
                }
            }
            Op::ConstructSuper => Instruction::ConstructSuper { argc: r.read_u30()? },
            Op::ReturnVoid => Instruction::ReturnVoid,
            Op::ReturnValue => Instruction::ReturnValue,

            Op::NewObject => Instruction::NewObject { argc: r.read_u30()? },
            Op::NewArray => Instruction::NewArray { argc: r.read_u30()? },
            Op::NewActivation => Instruction::NewActivation,
            Op::NewClass => Instruction::NewClass { class: r.read_u30()? },
            Op::NewCatch => Instruction::NewCatch { index: r.read_u30()? },

            Op::FindPropStrict => Instruction::FindPropStrict { name: r.read_u30()? },
            Op::FindProperty => Instruction::FindProperty { name: r.read_u30()? },
            Op::FindDef => Instruction::FindDef { name: r.read_u30()? },
            Op::GetLex => Instruction::GetLex { name: r.read_u30()? },
            Op::GetProperty => Instruction::GetProperty { name: r.read_u30()? },
            Op::SetProperty => Instruction::SetProperty { name: r.read_u30()? },
            Op::InitProperty => Instruction::InitProperty { name: r.read_u30()? },
            Op::DeleteProperty => Instruction::DeleteProperty { name: r.read_u30()? },
            Op::GetSlot => Instruction::GetSlot { slot: r.read_u30()? },
            Op::SetSlot => Instruction::SetSlot { slot: r.read_u30()? },
            Op::GetGlobalSlot => Instruction::GetGlobalSlot { slot: r.read_u30()? },
            Op::SetGlobalSlot => Instruction::SetGlobalSlot { slot: r.read_u30()? },

            Op::GetLocal => Instruction::GetLocal { reg: r.read_u30()? },
            Op::SetLocal => Instruction::SetLocal { reg: r.read_u30()? },
            Op::GetLocal0 => Instruction::GetLocal { reg: 0 },
            Op::GetLocal1 => Instruction::GetLocal { reg: 1 },
            Op::GetLocal2 => Instruction::GetLocal { reg: 2 },
            Op::GetLocal3 => Instruction::GetLocal { reg: 3 },
            Op::SetLocal0 => Instruction::SetLocal { reg: 0 },
            Op::SetLocal1 => Instruction::SetLocal { reg: 1 },
            Op::SetLocal2 => Instruction::SetLocal { reg: 2 },
            Op::SetLocal3 => Instruction::SetLocal { reg: 3 },

            Op::ConvertS => Instruction::ConvertS,
            Op::ConvertI => Instruction::ConvertI,
            Op::ConvertU => Instruction::ConvertU,
            Op::ConvertD => Instruction::ConvertD,
            Op::ConvertB => Instruction::ConvertB,
            Op::ConvertO => Instruction::ConvertO,
            Op::Coerce => Instruction::Coerce { name: r.read_u30()? },
            Op::CoerceA => Instruction::CoerceA,
            Op::CoerceB => Instruction::CoerceB,
            Op::CoerceD => Instruction::CoerceD,
            Op::CoerceI => Instruction::CoerceI,
            Op::CoerceO => Instruction::CoerceO,
            Op::CoerceS => Instruction::CoerceS,
            Op::CoerceU => Instruction::CoerceU,
            Op::AsType => Instruction::AsType { name: r.read_u30()? },
            Op::AsTypeLate => Instruction::AsTypeLate,
            Op::IsType => Instruction::IsType { name: r.read_u30()? },
            Op::IsTypeLate => Instruction::IsTypeLate,
            Op::InstanceOf => Instruction::InstanceOf,
            Op::In => Instruction::In,
            Op::TypeOf => Instruction::TypeOf,

            Op::Negate => Instruction::Negate,
            Op::Increment => Instruction::Increment,
            Op::Decrement => Instruction::Decrement,
            Op::IncLocal => Instruction::IncLocal { reg: r.read_u30()? },
            Op::DecLocal => Instruction::DecLocal { reg: r.read_u30()? },
            Op::Not => Instruction::Not,
            Op::BitNot => Instruction::BitNot,
            Op::Add => Instruction::Add,
            Op::Subtract => Instruction::Subtract,
            Op::Multiply => Instruction::Multiply,
            Op::Divide => Instruction::Divide,
            Op::Modulo => Instruction::Modulo,
            Op::LShift => Instruction::LShift,
            Op::RShift => Instruction::RShift,
            Op::URShift => Instruction::URShift,
            Op::BitAnd => Instruction::BitAnd,
            Op::BitOr => Instruction::BitOr,
            Op::BitXor => Instruction::BitXor,
            Op::Equals => Instruction::Equals,
            Op::StrictEquals => Instruction::StrictEquals,
            Op::LessThan => Instruction::LessThan,
            Op::LessEquals => Instruction::LessEquals,
            Op::GreaterThan => Instruction::GreaterThan,
            Op::GreaterEquals => Instruction::GreaterEquals,
            Op::IncrementI => Instruction::IncrementI,
            Op::DecrementI => Instruction::DecrementI,
            Op::IncLocalI => Instruction::IncLocalI { reg: r.read_u30()? },
            Op::DecLocalI => Instruction::DecLocalI { reg: r.read_u30()? },
            Op::NegateI => Instruction::NegateI,
            Op::AddI => Instruction::AddI,
            Op::SubtractI => Instruction::SubtractI,
            Op::MultiplyI => Instruction::MultiplyI,

            Op::Debug => {
                let kind = r.read_u8()?;
                let name = r.read_u30()?;
                let reg = r.read_u8()?;
                let extra = r.read_u30()?;
                Instruction::Debug {
                    kind,
                    name,
                    reg,
                    extra,
                }
            }
            Op::DebugLine => Instruction::DebugLine { line: r.read_u30()? },
            Op::DebugFile => Instruction::DebugFile { file: r.read_u30()? },

        };
        Ok(inst)
    }

    fn target(start: usize, base: usize, offset: i32) -> Result<u32, DecodeError> {
        let target = base as i64 + offset as i64;
        u32::try_from(target).map_err(|_| DecodeError::BadTarget {
            offset: start,
            target,
        })
    }
}

impl Iterator for BytecodeDecoder<'_> {
    type Item = Result<(u32, Instruction), DecodeError>;

    #[inline(always)]
    fn next(&mut self) -> Option<Self::Item> {
        self.decode_next()
    }
}

/// Decode a whole method body.
pub fn decode_all(code: &[u8]) -> Result<Vec<(u32, Instruction)>, DecodeError> {
    BytecodeDecoder::new(code).collect()
}
