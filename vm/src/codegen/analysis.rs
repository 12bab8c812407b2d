//! Static types of operand-stack slots and registers.
//!
//! A forward dataflow pass over a method body. For every reachable
//! instruction it records the type each stack slot and register is known
//! to have before the instruction runs. Paths that join merge their types:
//! two different numeric types become `Number`, anything else unknown.

use std::fmt;

use bytecode::{Instruction, MethodFlags};
use object::{Multiname, SlotType};

use super::CompileRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StaticType {
    Int,
    UInt,
    Number,
    Boolean,
    String,
    Object,
    /// Nothing is known.
    Any,
}

impl StaticType {
    pub fn of_slot(ty: &SlotType) -> Self {
        match ty {
            SlotType::Int => StaticType::Int,
            SlotType::UInt => StaticType::UInt,
            SlotType::Number => StaticType::Number,
            SlotType::Boolean => StaticType::Boolean,
            SlotType::String => StaticType::String,
            SlotType::Any | SlotType::Class(_) => StaticType::Any,
        }
    }

    #[inline]
    pub fn is_numeric(self) -> bool {
        matches!(self, StaticType::Int | StaticType::UInt | StaticType::Number)
    }

    fn merge(self, other: StaticType) -> StaticType {
        if self == other {
            self
        } else if self.is_numeric() && other.is_numeric() {
            StaticType::Number
        } else {
            StaticType::Any
        }
    }
}

impl fmt::Display for StaticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StaticType::Int => "int",
            StaticType::UInt => "uint",
            StaticType::Number => "Number",
            StaticType::Boolean => "Boolean",
            StaticType::String => "String",
            StaticType::Object => "Object",
            StaticType::Any => "*",
        })
    }
}

/// Types before one instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameTypes {
    pub stack: Vec<StaticType>,
    pub locals: Vec<StaticType>,
}

impl FrameTypes {
    /// Merge `other` into `self`; whether anything changed.
    fn merge(&mut self, other: &FrameTypes, at: usize) -> Result<bool, AnalysisError> {
        if self.stack.len() != other.stack.len() {
            return Err(AnalysisError::DepthMismatch(at));
        }
        let mut changed = false;
        let pairs = self
            .stack
            .iter_mut()
            .zip(&other.stack)
            .chain(self.locals.iter_mut().zip(&other.locals));
        for (mine, theirs) in pairs {
            let merged = mine.merge(*theirs);
            changed |= merged != *mine;
            *mine = merged;
        }
        Ok(changed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnalysisError {
    #[error("operand stack underflow at instruction {0}")]
    Underflow(usize),
    #[error("operand stack depth differs between paths joining at instruction {0}")]
    DepthMismatch(usize),
    #[error("branch at instruction {0} does not target an instruction")]
    BadTarget(usize),
    #[error("register {reg} out of range at instruction {at}")]
    BadRegister { at: usize, reg: u32 },
}

#[derive(Debug, Clone)]
pub struct Analysis {
    /// Indexed by instruction; `None` for unreachable instructions.
    pub before: Vec<Option<FrameTypes>>,
}

impl Analysis {
    #[inline]
    pub fn at(&self, index: usize) -> Option<&FrameTypes> {
        self.before.get(index).and_then(Option::as_ref)
    }

    /// Deepest operand stack seen before any instruction, plus one for
    /// the push of the deepest instruction.
    pub fn max_stack(&self) -> usize {
        self.before
            .iter()
            .flatten()
            .map(|frame| frame.stack.len())
            .max()
            .unwrap_or(0)
            + 1
    }

    #[inline]
    pub fn is_reachable(&self, index: usize) -> bool {
        self.at(index).is_some()
    }
}

/// Instruction indices control may continue at after instruction `at`.
pub fn successors(request: &CompileRequest<'_>, at: usize) -> Result<Vec<usize>, AnalysisError> {
    let instruction = &request.code[at];
    let mut next = Vec::new();
    for target in instruction.targets() {
        next.push(request.index_of(target).ok_or(AnalysisError::BadTarget(at))?);
    }
    if !instruction.ends_block() && at + 1 < request.code.len() {
        next.push(at + 1);
    }
    Ok(next)
}

struct Transfer<'a> {
    at: usize,
    frame: FrameTypes,
    multinames: &'a [Multiname],
}

impl Transfer<'_> {
    fn pop(&mut self) -> Result<StaticType, AnalysisError> {
        self.frame.stack.pop().ok_or(AnalysisError::Underflow(self.at))
    }

    fn pop_n(&mut self, n: usize) -> Result<(), AnalysisError> {
        for _ in 0..n {
            self.pop()?;
        }
        Ok(())
    }

    fn push(&mut self, ty: StaticType) {
        self.frame.stack.push(ty);
    }

    fn local(&mut self, reg: u32) -> Result<&mut StaticType, AnalysisError> {
        let at = self.at;
        self.frame
            .locals
            .get_mut(reg as usize)
            .ok_or(AnalysisError::BadRegister { at, reg })
    }

    /// Operands a multiname pops at runtime.
    fn runtime(&self, name: u32) -> usize {
        self.multinames.get(name as usize).map_or(0, |mn| {
            usize::from(mn.has_runtime_name()) + usize::from(mn.has_runtime_ns())
        })
    }

    fn numeric_result(a: StaticType, b: StaticType) -> StaticType {
        if a.is_numeric() && b.is_numeric() {
            StaticType::Number
        } else {
            StaticType::Any
        }
    }

    fn apply(&mut self, instruction: &Instruction) -> Result<(), AnalysisError> {
        use Instruction as I;
        use StaticType as T;
        match instruction {
            I::Bkpt | I::Nop | I::Label | I::Jump { .. } | I::ReturnVoid | I::PopScope => {}
            I::Debug { .. } | I::DebugLine { .. } | I::DebugFile { .. } => {}
            I::Throw | I::ReturnValue | I::IfTrue { .. } | I::IfFalse { .. } => self.pop_n(1)?,
            I::LookupSwitch { .. } | I::Pop | I::PushWith | I::PushScope => self.pop_n(1)?,
            I::If { .. } => self.pop_n(2)?,
            I::Kill { reg } => *self.local(*reg)? = T::Any,

            I::GetSuper { name } => {
                self.pop_n(1 + self.runtime(*name))?;
                self.push(T::Any);
            }
            I::SetSuper { name } => self.pop_n(2 + self.runtime(*name))?,

            I::GetGlobalScope | I::GetScopeObject { .. } => self.push(T::Object),
            I::NextName | I::NextValue => {
                self.pop_n(2)?;
                self.push(T::Any);
            }
            I::HasNext => {
                self.pop_n(2)?;
                self.push(T::Int);
            }
            I::HasNext2 {
                object_reg,
                index_reg,
            } => {
                *self.local(*object_reg)? = T::Any;
                *self.local(*index_reg)? = T::Int;
                self.push(T::Boolean);
            }

            I::PushNull | I::PushUndefined => self.push(T::Any),
            I::PushTrue | I::PushFalse => self.push(T::Boolean),
            I::PushNaN | I::PushDouble { .. } => self.push(T::Number),
            I::PushByte { .. } | I::PushShort { .. } | I::PushInt { .. } => self.push(T::Int),
            I::PushUInt { .. } => self.push(T::UInt),
            I::PushString { .. } => self.push(T::String),
            I::PushNamespace { .. } => self.push(T::Object),
            I::Dup => {
                let top = self.pop()?;
                self.push(top);
                self.push(top);
            }
            I::Swap => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(b);
                self.push(a);
            }

            I::NewFunction { .. } | I::NewActivation | I::NewCatch { .. } => self.push(T::Object),
            I::Call { argc } => {
                self.pop_n(*argc as usize + 2)?;
                self.push(T::Any);
            }
            I::Construct { argc } | I::CallMethod { argc, .. } | I::CallStatic { argc, .. } => {
                self.pop_n(*argc as usize + 1)?;
                self.push(T::Any);
            }
            I::ConstructSuper { argc } => self.pop_n(*argc as usize + 1)?,
            I::CallSuper { name, argc }
            | I::CallProperty { name, argc }
            | I::CallPropLex { name, argc }
            | I::ConstructProp { name, argc } => {
                self.pop_n(*argc as usize + 1 + self.runtime(*name))?;
                self.push(T::Any);
            }
            I::CallSuperVoid { name, argc } | I::CallPropVoid { name, argc } => {
                self.pop_n(*argc as usize + 1 + self.runtime(*name))?;
            }

            I::NewObject { argc } => {
                self.pop_n(*argc as usize * 2)?;
                self.push(T::Object);
            }
            I::NewArray { argc } => {
                self.pop_n(*argc as usize)?;
                self.push(T::Object);
            }
            I::NewClass { .. } => {
                self.pop_n(1)?;
                self.push(T::Object);
            }

            I::FindPropStrict { name } | I::FindProperty { name } => {
                self.pop_n(self.runtime(*name))?;
                self.push(T::Object);
            }
            I::FindDef { .. } => self.push(T::Object),
            I::GetLex { .. } | I::GetGlobalSlot { .. } => self.push(T::Any),
            I::GetProperty { name } => {
                self.pop_n(1 + self.runtime(*name))?;
                self.push(T::Any);
            }
            I::SetProperty { name } | I::InitProperty { name } => {
                self.pop_n(2 + self.runtime(*name))?;
            }
            I::DeleteProperty { name } => {
                self.pop_n(1 + self.runtime(*name))?;
                self.push(T::Boolean);
            }
            I::GetSlot { .. } => {
                self.pop_n(1)?;
                self.push(T::Any);
            }
            I::SetSlot { .. } => self.pop_n(2)?,
            I::SetGlobalSlot { .. } => self.pop_n(1)?,

            I::GetLocal { reg } => {
                let ty = *self.local(*reg)?;
                self.push(ty);
            }
            I::SetLocal { reg } => {
                let ty = self.pop()?;
                *self.local(*reg)? = ty;
            }

            I::ConvertS | I::CoerceS | I::TypeOf => {
                self.pop_n(1)?;
                self.push(T::String);
            }
            I::ConvertI | I::CoerceI | I::BitNot | I::IncrementI | I::DecrementI | I::NegateI => {
                self.pop_n(1)?;
                self.push(T::Int);
            }
            I::ConvertU | I::CoerceU => {
                self.pop_n(1)?;
                self.push(T::UInt);
            }
            I::ConvertD | I::CoerceD | I::Negate | I::Increment | I::Decrement => {
                self.pop_n(1)?;
                self.push(T::Number);
            }
            I::ConvertB | I::CoerceB | I::Not | I::IsType { .. } => {
                self.pop_n(1)?;
                self.push(T::Boolean);
            }
            I::ConvertO => {}
            I::CoerceA | I::CoerceO | I::Coerce { .. } | I::AsType { .. } => {
                self.pop_n(1)?;
                self.push(T::Any);
            }
            I::AsTypeLate => {
                self.pop_n(2)?;
                self.push(T::Any);
            }
            I::IsTypeLate | I::InstanceOf | I::In => {
                self.pop_n(2)?;
                self.push(T::Boolean);
            }

            I::IncLocal { reg } | I::DecLocal { reg } => *self.local(*reg)? = T::Number,
            I::IncLocalI { reg } | I::DecLocalI { reg } => *self.local(*reg)? = T::Int,

            I::Add => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(Self::numeric_result(a, b));
            }
            I::Subtract | I::Multiply | I::Divide | I::Modulo => {
                self.pop_n(2)?;
                self.push(T::Number);
            }
            I::LShift | I::RShift | I::BitAnd | I::BitOr | I::BitXor => {
                self.pop_n(2)?;
                self.push(T::Int);
            }
            I::AddI | I::SubtractI | I::MultiplyI => {
                self.pop_n(2)?;
                self.push(T::Int);
            }
            I::URShift => {
                self.pop_n(2)?;
                self.push(T::UInt);
            }
            I::Equals
            | I::StrictEquals
            | I::LessThan
            | I::LessEquals
            | I::GreaterThan
            | I::GreaterEquals => {
                self.pop_n(2)?;
                self.push(T::Boolean);
            }
        }
        Ok(())
    }
}

/// Types at method entry: `this`, the declared parameters, the rest or
/// `arguments` array, then registers not yet written.
fn entry_frame(request: &CompileRequest<'_>) -> FrameTypes {
    let mut locals = Vec::with_capacity(request.local_count as usize);
    locals.push(StaticType::Any);
    locals.extend(request.params.iter().map(StaticType::of_slot));
    if request
        .flags
        .intersects(MethodFlags::NEED_REST | MethodFlags::NEED_ARGUMENTS)
    {
        locals.push(StaticType::Object);
    }
    let len = (request.local_count as usize).max(locals.len());
    locals.resize(len, StaticType::Any);
    FrameTypes {
        stack: Vec::new(),
        locals,
    }
}

pub fn analyze(request: &CompileRequest<'_>) -> Result<Analysis, AnalysisError> {
    let count = request.code.len();
    let mut before: Vec<Option<FrameTypes>> = vec![None; count];
    let mut work = Vec::new();
    if count == 0 {
        return Ok(Analysis { before });
    }

    let entry = entry_frame(request);
    // Handlers start with only the thrown value on the stack and nothing
    // known about registers.
    let handler = FrameTypes {
        stack: vec![StaticType::Any],
        locals: vec![StaticType::Any; entry.locals.len()],
    };
    before[0] = Some(entry);
    work.push(0);
    for &target in request.handler_targets {
        if target < count {
            before[target] = Some(handler.clone());
            work.push(target);
        }
    }

    while let Some(at) = work.pop() {
        let Some(frame) = before[at].clone() else {
            continue;
        };
        let mut transfer = Transfer {
            at,
            frame,
            multinames: request.multinames,
        };
        transfer.apply(&request.code[at])?;
        for next in successors(request, at)? {
            let changed = match &mut before[next] {
                Some(existing) => existing.merge(&transfer.frame, next)?,
                slot @ None => {
                    *slot = Some(transfer.frame.clone());
                    true
                }
            };
            if changed {
                work.push(next);
            }
        }
    }
    Ok(Analysis { before })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytecode::Condition;

    fn request<'a>(code: &'a [Instruction], offsets: &'a [u32], params: &'a [SlotType]) -> CompileRequest<'a> {
        CompileRequest {
            name: "test",
            code,
            offsets,
            params,
            return_type: SlotType::Any,
            local_count: params.len() as u32 + 2,
            flags: MethodFlags::empty(),
            handler_targets: &[],
            has_activation: false,
            ints: &[],
            uints: &[],
            doubles: &[],
            multinames: &[],
        }
    }

    // ── Straight-line code ──

    #[test]
    fn arithmetic_on_typed_params() {
        let code = [
            Instruction::GetLocal { reg: 1 },
            Instruction::GetLocal { reg: 2 },
            Instruction::AddI,
            Instruction::ReturnValue,
        ];
        let params = [SlotType::Int, SlotType::Number];
        let analysis = analyze(&request(&code, &[0, 1, 2, 3], &params)).expect("analysis");
        let at_add = analysis.at(2).expect("reachable");
        assert_eq!(at_add.stack, vec![StaticType::Int, StaticType::Number]);
        assert_eq!(analysis.at(3).expect("reachable").stack, vec![StaticType::Int]);
    }

    #[test]
    fn underflow_is_reported() {
        let code = [Instruction::Add, Instruction::ReturnValue];
        let err = analyze(&request(&code, &[0, 1], &[])).expect_err("underflow");
        assert_eq!(err, AnalysisError::Underflow(0));
    }

    // ── Joins ──

    #[test]
    fn joining_int_and_number_gives_number() {
        // local 1 is int; one path stores a double into it.
        let code = [
            Instruction::GetLocal { reg: 1 },
            Instruction::PushByte { value: 0 },
            Instruction::If {
                cond: Condition::Lt,
                target: 6,
            },
            Instruction::PushDouble { index: 1 },
            Instruction::SetLocal { reg: 1 },
            Instruction::Label,
            Instruction::GetLocal { reg: 1 },
            Instruction::ReturnValue,
        ];
        let offsets = [0, 1, 2, 3, 4, 5, 6, 7];
        let analysis = analyze(&request(&code, &offsets, &[SlotType::Int])).expect("analysis");
        assert_eq!(analysis.at(6).expect("reachable").locals[1], StaticType::Number);
    }

    #[test]
    fn code_after_return_is_unreachable() {
        let code = [Instruction::ReturnVoid, Instruction::PushTrue, Instruction::ReturnValue];
        let analysis = analyze(&request(&code, &[0, 1, 2], &[])).expect("analysis");
        assert!(analysis.is_reachable(0));
        assert!(!analysis.is_reachable(1));
    }

    #[test]
    fn mismatched_depths_are_rejected() {
        let code = [
            Instruction::PushTrue,
            Instruction::IfTrue { target: 3 },
            Instruction::PushByte { value: 1 },
            Instruction::ReturnVoid,
        ];
        let err = analyze(&request(&code, &[0, 1, 2, 3], &[])).expect_err("mismatch");
        assert_eq!(err, AnalysisError::DepthMismatch(3));
    }
}
