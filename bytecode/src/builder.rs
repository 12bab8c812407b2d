use crate::instruction::Instruction;
use crate::op::Op;
use crate::stream::ByteWriter;

/// A branch target whose position may not be known yet.
///
/// Created by [`BytecodeBuilder::new_label`] and placed with
/// [`BytecodeBuilder::bind`]. Branches may reference a label before or
/// after it is bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("label {0} is referenced but never bound")]
    UnboundLabel(usize),
    #[error("branch from byte {from} to byte {to} does not fit in 24 bits")]
    BranchTooFar { from: usize, to: usize },
}

#[derive(Debug)]
struct Fixup {
    label: Label,
    /// Position of the s24 operand.
    at: usize,
    /// Offset the operand is relative to.
    base: usize,
}

/// Builds the code of one method body.
pub struct BytecodeBuilder {
    out: ByteWriter,
    labels: Vec<Option<usize>>,
    fixups: Vec<Fixup>,
}

impl BytecodeBuilder {
    pub fn new() -> Self {
        Self {
            out: ByteWriter::new(),
            labels: Vec::new(),
            fixups: Vec::new(),
        }
    }

    /// Current byte offset in the code stream.
    pub fn current_offset(&self) -> u32 {
        self.out.len() as u32
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.out.as_bytes()
    }

    /// Resolve every pending branch and return the code.
    pub fn finish(mut self) -> Result<Vec<u8>, BuildError> {
        for fixup in std::mem::take(&mut self.fixups) {
            let target = self.labels[fixup.label.0].ok_or(BuildError::UnboundLabel(fixup.label.0))?;
            self.patch(&fixup, target)?;
        }
        Ok(self.out.into_bytes())
    }

    // ── Labels ────────────────────────────────────────────────────────

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind `label` to the current position.
    pub fn bind(&mut self, label: Label) {
        self.labels[label.0] = Some(self.out.len());
    }

    /// A new label bound to the current position, for backward branches.
    pub fn here(&mut self) -> Label {
        let label = self.new_label();
        self.bind(label);
        label
    }

    /// Byte offset of a bound label. Used for exception ranges.
    pub fn offset_of(&self, label: Label) -> Option<u32> {
        self.labels[label.0].map(|pos| pos as u32)
    }

    // ── Emission ──────────────────────────────────────────────────────

    /// Emit a branch opcode (`jump`, `iftrue`, `ifeq`, ...) to `label`.
    pub fn branch(&mut self, op: Op, label: Label) {
        debug_assert!(op.is_branch(), "{op:?} is not a branch");
        self.out.write_u8(op as u8);
        let at = self.out.len();
        self.out.write_s24(0);
        self.fixups.push(Fixup {
            label,
            at,
            base: self.out.len(),
        });
    }

    pub fn jump(&mut self, label: Label) {
        self.branch(Op::Jump, label);
    }

    /// Emit a `lookupswitch`. Case offsets are relative to the start of
    /// the instruction.
    pub fn lookup_switch(&mut self, default: Label, cases: &[Label]) {
        debug_assert!(!cases.is_empty(), "lookupswitch needs at least one case");
        let base = self.out.len();
        self.out.write_u8(Op::LookupSwitch as u8);
        let slot = |builder: &mut Self, label: Label| {
            let at = builder.out.len();
            builder.out.write_s24(0);
            builder.fixups.push(Fixup { label, at, base });
        };
        slot(self, default);
        self.out.write_u32(cases.len().saturating_sub(1) as u32);
        for &case in cases {
            slot(self, case);
        }
    }

    /// Emit a bare opcode with no operands.
    pub fn op(&mut self, op: Op) {
        self.out.write_u8(op as u8);
    }

    /// Encode a decoded instruction. Branch targets are absolute offsets.
    pub fn emit(&mut self, inst: &Instruction) -> Result<(), BuildError> {
        let start = self.out.len();
        let w = &mut self.out;
        w.write_u8(inst.op() as u8);
        match inst {
            Instruction::Jump { target }
            | Instruction::IfTrue { target }
            | Instruction::IfFalse { target }
            | Instruction::If { target, .. } => {
                let base = start + 4;
                w.write_s24(relative(base, *target as usize)?);
            }
            Instruction::LookupSwitch { default, cases } => {
                w.write_s24(relative(start, *default as usize)?);
                w.write_u32(cases.len().saturating_sub(1) as u32);
                for &case in cases.iter() {
                    w.write_s24(relative(start, case as usize)?);
                }
            }

            Instruction::GetSuper { name }
            | Instruction::SetSuper { name }
            | Instruction::FindPropStrict { name }
            | Instruction::FindProperty { name }
            | Instruction::FindDef { name }
            | Instruction::GetLex { name }
            | Instruction::GetProperty { name }
            | Instruction::SetProperty { name }
            | Instruction::InitProperty { name }
            | Instruction::DeleteProperty { name }
            | Instruction::Coerce { name }
            | Instruction::AsType { name }
            | Instruction::IsType { name } => w.write_u32(*name),

            Instruction::CallSuper { name, argc }
            | Instruction::CallSuperVoid { name, argc }
            | Instruction::CallProperty { name, argc }
            | Instruction::CallPropLex { name, argc }
            | Instruction::CallPropVoid { name, argc }
            | Instruction::ConstructProp { name, argc } => {
                w.write_u32(*name);
                w.write_u32(*argc);
            }
            Instruction::CallMethod { disp_id, argc } => {
                w.write_u32(*disp_id);
                w.write_u32(*argc);
            }
            Instruction::CallStatic { method, argc } => {
                w.write_u32(*method);
                w.write_u32(*argc);
            }

            Instruction::Call { argc }
            | Instruction::Construct { argc }
            | Instruction::ConstructSuper { argc }
            | Instruction::NewObject { argc }
            | Instruction::NewArray { argc } => w.write_u32(*argc),

            Instruction::GetLocal { reg } | Instruction::SetLocal { reg } if *reg > 3 => {
                w.write_u32(*reg)
            }
            Instruction::Kill { reg }
            | Instruction::IncLocal { reg }
            | Instruction::DecLocal { reg }
            | Instruction::IncLocalI { reg }
            | Instruction::DecLocalI { reg } => w.write_u32(*reg),
            Instruction::HasNext2 {
                object_reg,
                index_reg,
            } => {
                w.write_u32(*object_reg);
                w.write_u32(*index_reg);
            }

            Instruction::GetScopeObject { index } => w.write_u8(*index),
            Instruction::PushByte { value } => w.write_u8(*value as u8),
            Instruction::PushShort { value } => w.write_u32(*value as u16 as u32),
            Instruction::PushString { index }
            | Instruction::PushInt { index }
            | Instruction::PushUInt { index }
            | Instruction::PushDouble { index }
            | Instruction::PushNamespace { index }
            | Instruction::NewCatch { index } => w.write_u32(*index),
            Instruction::NewFunction { method } => w.write_u32(*method),
            Instruction::NewClass { class } => w.write_u32(*class),
            Instruction::GetSlot { slot }
            | Instruction::SetSlot { slot }
            | Instruction::GetGlobalSlot { slot }
            | Instruction::SetGlobalSlot { slot } => w.write_u32(*slot),

            Instruction::Debug {
                kind,
                name,
                reg,
                extra,
            } => {
                w.write_u8(*kind);
                w.write_u32(*name);
                w.write_u8(*reg);
                w.write_u32(*extra);
            }
            Instruction::DebugLine { line } => w.write_u32(*line),
            Instruction::DebugFile { file } => w.write_u32(*file),

            _ => {}
        }
        Ok(())
    }

    fn patch(&mut self, fixup: &Fixup, target: usize) -> Result<(), BuildError> {
        let offset = relative(fixup.base, target)?;
        self.out.patch_s24(fixup.at, offset);
        Ok(())
    }
}

impl Default for BytecodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn relative(base: usize, target: usize) -> Result<i32, BuildError> {
    let offset = target as i64 - base as i64;
    if !(-(1 << 23)..(1 << 23)).contains(&offset) {
        return Err(BuildError::BranchTooFar {
            from: base,
            to: target,
        });
    }
    Ok(offset as i32)
}
