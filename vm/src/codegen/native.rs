//! Cranelift backend for numeric leaf methods.
//!
//! Methods qualify when every declared parameter is `int`, `uint` or
//! `Number`, they make no calls, touch no objects and have no handlers,
//! and [`analyze`](super::analysis::analyze) proves each operand of the
//! instructions below numeric (or boolean for branches). Every value is
//! held as an `f64`; integer instructions round-trip through `i64` so that
//! wrap-around matches 32-bit semantics. Loop headers poll the
//! cancellation flag.

use std::collections::{HashMap, HashSet};

use bytecode::{Condition, Instruction, MethodFlags};
use cranelift::codegen::Context;
use cranelift::prelude::*;
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{Linkage, Module};
use log::debug;
use object::SlotType;

use super::analysis::{Analysis, StaticType, analyze};
use super::{Backend, CompileRequest, CompiledMethod, NativeEntry};

pub struct NativeBackend {
    module: JITModule,
    ctx: Context,
    builder_ctx: FunctionBuilderContext,
    compiled: usize,
}

impl NativeBackend {
    pub fn new() -> Result<Self, String> {
        let mut flag_builder = settings::builder();
        flag_builder
            .set("opt_level", "speed")
            .map_err(|e| e.to_string())?;
        flag_builder
            .set("is_pic", "false")
            .map_err(|e| e.to_string())?;
        let isa = cranelift_native::builder()
            .map_err(|e| format!("host not supported: {e}"))?
            .finish(settings::Flags::new(flag_builder))
            .map_err(|e| format!("cannot build target isa: {e}"))?;
        let builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
        let module = JITModule::new(builder);
        Ok(Self {
            ctx: module.make_context(),
            module,
            builder_ctx: FunctionBuilderContext::new(),
            compiled: 0,
        })
    }

    fn translate(&mut self, request: &CompileRequest<'_>, analysis: &Analysis) -> Result<NativeEntry, String> {
        let pointer = self.module.target_config().pointer_type();
        self.module.clear_context(&mut self.ctx);
        let mut sig = self.module.make_signature();
        sig.params.push(AbiParam::new(pointer));
        sig.params.push(AbiParam::new(pointer));
        sig.params.push(AbiParam::new(pointer));
        sig.returns.push(AbiParam::new(types::I8));
        self.ctx.func.signature = sig.clone();

        let symbol = format!("avm2_{}_{}", self.compiled, request.name);
        let id = self
            .module
            .declare_function(&symbol, Linkage::Local, &sig)
            .map_err(|e| format!("declare {symbol}: {e}"))?;

        {
            let mut builder = FunctionBuilder::new(&mut self.ctx.func, &mut self.builder_ctx);
            Translator::new(&mut builder, request, analysis).emit()?;
            builder.finalize();
        }

        self.module
            .define_function(id, &mut self.ctx)
            .map_err(|e| format!("define {symbol}: {e}"))?;
        self.module.clear_context(&mut self.ctx);
        self.module
            .finalize_definitions()
            .map_err(|e| format!("finalize {symbol}: {e}"))?;
        let code = self.module.get_finalized_function(id);
        self.compiled += 1;
        // SAFETY: `code` was compiled for exactly the `NativeEntry`
        // signature declared above.
        Ok(unsafe { std::mem::transmute::<*const u8, NativeEntry>(code) })
    }
}

impl Backend for NativeBackend {
    fn name(&self) -> &'static str {
        "cranelift"
    }

    fn compile(&mut self, request: &CompileRequest<'_>) -> Option<CompiledMethod> {
        let analysis = match eligible(request) {
            Ok(analysis) => analysis,
            Err(reason) => {
                debug!("not compiling {}: {reason}", request.name);
                return None;
            }
        };
        match self.translate(request, &analysis) {
            Ok(entry) => Some(CompiledMethod::new(entry, request.params.len())),
            Err(err) => {
                debug!("cranelift rejected {}: {err}", request.name);
                None
            }
        }
    }
}

fn numeric_slot(ty: &SlotType) -> bool {
    matches!(ty, SlotType::Int | SlotType::UInt | SlotType::Number)
}

/// The analysis of `request` when it can be compiled, or why not.
fn eligible(request: &CompileRequest<'_>) -> Result<Analysis, String> {
    let blocked = MethodFlags::NEED_ARGUMENTS
        | MethodFlags::NEED_ACTIVATION
        | MethodFlags::NEED_REST
        | MethodFlags::SET_DXNS;
    if request.flags.intersects(blocked) || request.has_activation || request.has_handlers() {
        return Err("needs a full activation".to_owned());
    }
    if !request.params.iter().all(numeric_slot) {
        return Err("non-numeric parameter".to_owned());
    }
    if !matches!(
        request.return_type,
        SlotType::Int | SlotType::UInt | SlotType::Number | SlotType::Any
    ) {
        return Err("non-numeric return type".to_owned());
    }
    let analysis = analyze(request).map_err(|e| e.to_string())?;
    for (at, instruction) in request.code.iter().enumerate() {
        let Some(frame) = analysis.at(at) else {
            continue;
        };
        let top = |n: usize| {
            frame
                .stack
                .len()
                .checked_sub(n + 1)
                .map_or(StaticType::Any, |i| frame.stack[i])
        };
        let local = |reg: u32| {
            frame
                .locals
                .get(reg as usize)
                .copied()
                .unwrap_or(StaticType::Any)
        };
        let numeric = |n: usize| (0..n).all(|i| top(i).is_numeric());
        let testable = top(0).is_numeric() || top(0) == StaticType::Boolean;

        use Instruction as I;
        let ok = match instruction {
            I::Nop | I::Label | I::Jump { .. } => true,
            I::Debug { .. } | I::DebugLine { .. } | I::DebugFile { .. } => true,
            I::PushByte { .. } | I::PushShort { .. } | I::PushNaN => true,
            I::PushTrue | I::PushFalse => true,
            I::PushInt { index } => request.ints.get(*index as usize).is_some(),
            I::PushUInt { index } => request.uints.get(*index as usize).is_some(),
            I::PushDouble { index } => request.doubles.get(*index as usize).is_some(),
            I::Pop | I::Dup | I::Swap => true,
            I::GetLocal { reg } => local(*reg).is_numeric() || local(*reg) == StaticType::Boolean,
            I::SetLocal { .. } => true,
            I::IfTrue { .. } | I::IfFalse { .. } | I::Not => testable,
            I::If { .. } => numeric(2),
            I::ConvertD | I::CoerceD | I::Negate | I::Increment | I::Decrement => numeric(1),
            I::ConvertI | I::CoerceI => top(0) == StaticType::Int,
            I::ConvertU | I::CoerceU => top(0) == StaticType::UInt,
            I::IncLocal { reg } | I::DecLocal { reg } => local(*reg).is_numeric(),
            I::IncLocalI { reg } | I::DecLocalI { reg } => local(*reg) == StaticType::Int,
            I::Add | I::Subtract | I::Multiply | I::Divide => numeric(2),
            I::Equals
            | I::StrictEquals
            | I::LessThan
            | I::LessEquals
            | I::GreaterThan
            | I::GreaterEquals => numeric(2),
            I::IncrementI | I::DecrementI | I::NegateI => top(0) == StaticType::Int,
            I::AddI | I::SubtractI | I::MultiplyI => {
                top(0) == StaticType::Int && top(1) == StaticType::Int
            }
            I::ReturnValue => numeric(1),
            _ => false,
        };
        if !ok {
            return Err(format!("unsupported `{instruction}` at {at}"));
        }
    }
    Ok(analysis)
}

struct Translator<'a, 'b> {
    builder: &'a mut FunctionBuilder<'b>,
    request: &'a CompileRequest<'a>,
    analysis: &'a Analysis,
    /// Block starting at each leader instruction.
    blocks: HashMap<usize, Block>,
    loop_headers: HashSet<usize>,
    cancelled: Block,
    args: Value,
    cancel: Value,
    out: Value,
    depth: usize,
    stack_base: u32,
}

impl<'a, 'b> Translator<'a, 'b> {
    /// Start the function: its entry block reads the arguments.
    fn new(
        builder: &'a mut FunctionBuilder<'b>,
        request: &'a CompileRequest<'a>,
        analysis: &'a Analysis,
    ) -> Self {
        let entry = builder.create_block();
        builder.append_block_params_for_function_params(entry);
        builder.switch_to_block(entry);
        let params = builder.block_params(entry).to_vec();
        let cancelled = builder.create_block();
        Self {
            builder,
            request,
            analysis,
            blocks: HashMap::new(),
            loop_headers: HashSet::new(),
            cancelled,
            args: params[0],
            cancel: params[1],
            out: params[2],
            depth: 0,
            stack_base: request.local_count.max(request.params.len() as u32 + 1),
        }
    }

    #[inline]
    fn stack_var(&self, depth: usize) -> Variable {
        Variable::from_u32(self.stack_base + depth as u32)
    }

    fn push(&mut self, value: Value) {
        let var = self.stack_var(self.depth);
        self.builder.def_var(var, value);
        self.depth += 1;
    }

    fn pop(&mut self) -> Value {
        self.depth -= 1;
        let var = self.stack_var(self.depth);
        self.builder.use_var(var)
    }

    fn peek(&mut self) -> Value {
        let var = self.stack_var(self.depth - 1);
        self.builder.use_var(var)
    }

    fn constant(&mut self, value: f64) -> Value {
        self.builder.ins().f64const(value)
    }

    fn boolean(&mut self, cond: Value) -> Value {
        let one = self.constant(1.0);
        let zero = self.constant(0.0);
        self.builder.ins().select(cond, one, zero)
    }

    fn truthy(&mut self, value: Value) -> Value {
        let zero = self.constant(0.0);
        self.builder.ins().fcmp(FloatCC::OrderedNotEqual, value, zero)
    }

    /// `op` applied to the 32-bit integer values of `a` and `b`, wrapped.
    fn int_op(&mut self, a: Value, b: Value, op: fn(&mut FunctionBuilder<'b>, Value, Value) -> Value) -> Value {
        let a = self.builder.ins().fcvt_to_sint_sat(types::I64, a);
        let b = self.builder.ins().fcvt_to_sint_sat(types::I64, b);
        let wide = op(&mut *self.builder, a, b);
        let narrow = self.builder.ins().ireduce(types::I32, wide);
        self.builder.ins().fcvt_from_sint(types::F64, narrow)
    }

    fn target(&self, at: usize, offset: u32) -> Result<Block, String> {
        self.request
            .index_of(offset)
            .and_then(|index| self.blocks.get(&index).copied())
            .ok_or_else(|| format!("no block for branch at {at}"))
    }

    fn fallthrough(&self, at: usize) -> Result<Block, String> {
        self.blocks
            .get(&(at + 1))
            .copied()
            .ok_or_else(|| format!("no fall-through block after {at}"))
    }

    /// Create a block for every reachable instruction control can enter
    /// other than by falling through.
    fn plan_blocks(&mut self) -> Result<(), String> {
        let code = self.request.code;
        let mut leaders = vec![0];
        for (at, instruction) in code.iter().enumerate() {
            if !self.analysis.is_reachable(at) {
                continue;
            }
            let targets = instruction.targets();
            for offset in &targets {
                let index = self
                    .request
                    .index_of(*offset)
                    .ok_or_else(|| format!("bad branch target at {at}"))?;
                leaders.push(index);
                if index <= at {
                    self.loop_headers.insert(index);
                }
            }
            if !targets.is_empty() || instruction.ends_block() {
                leaders.push(at + 1);
            }
        }
        for index in leaders {
            if index < code.len() && self.analysis.is_reachable(index) {
                self.blocks
                    .entry(index)
                    .or_insert_with(|| self.builder.create_block());
            }
        }
        Ok(())
    }

    fn emit(mut self) -> Result<(), String> {
        let max_stack = self.analysis.max_stack();
        let total = self.stack_base as usize + max_stack;
        for index in 0..total {
            self.builder.declare_var(Variable::from_u32(index as u32), types::F64);
        }
        let zero = self.constant(0.0);
        for index in 0..total {
            self.builder.def_var(Variable::from_u32(index as u32), zero);
        }
        for i in 0..self.request.params.len() {
            let value = self
                .builder
                .ins()
                .load(types::F64, MemFlags::trusted(), self.args, (i * 8) as i32);
            self.builder.def_var(local_var(i as u32 + 1), value);
        }

        self.plan_blocks()?;
        let first = self.fallthrough_from_entry()?;
        self.builder.ins().jump(first, &[]);

        let (code, analysis) = (self.request.code, self.analysis);
        let mut terminated = true;
        for (at, instruction) in code.iter().enumerate() {
            let Some(frame) = analysis.at(at) else {
                continue;
            };
            if let Some(&block) = self.blocks.get(&at) {
                if !terminated {
                    self.builder.ins().jump(block, &[]);
                }
                self.builder.switch_to_block(block);
                if self.loop_headers.contains(&at) {
                    self.poll_cancel();
                }
            }
            self.depth = frame.stack.len();
            terminated = self.instruction(at, instruction)?;
        }
        if !terminated {
            return Err("control falls off the end".to_owned());
        }

        self.builder.switch_to_block(self.cancelled);
        let stopped = self.builder.ins().iconst(types::I8, 1);
        self.builder.ins().return_(&[stopped]);

        self.builder.seal_all_blocks();
        Ok(())
    }

    fn fallthrough_from_entry(&self) -> Result<Block, String> {
        self.blocks
            .get(&0)
            .copied()
            .ok_or_else(|| "empty method".to_owned())
    }

    fn poll_cancel(&mut self) {
        let flag = self
            .builder
            .ins()
            .atomic_load(types::I8, MemFlags::trusted(), self.cancel);
        let resume = self.builder.create_block();
        self.builder.ins().brif(flag, self.cancelled, &[], resume, &[]);
        self.builder.switch_to_block(resume);
    }

    /// Emit one instruction; whether it ends its block.
    fn instruction(&mut self, at: usize, instruction: &Instruction) -> Result<bool, String> {
        use Instruction as I;
        match instruction {
            I::Nop | I::Label | I::Debug { .. } | I::DebugLine { .. } | I::DebugFile { .. } => {}
            I::ConvertD | I::CoerceD | I::ConvertI | I::CoerceI | I::ConvertU | I::CoerceU => {}

            I::PushByte { value } => {
                let v = self.constant(f64::from(*value));
                self.push(v);
            }
            I::PushShort { value } => {
                let v = self.constant(f64::from(*value));
                self.push(v);
            }
            I::PushInt { index } => {
                let n = self.request.ints.get(*index as usize).copied().unwrap_or(0);
                let v = self.constant(f64::from(n));
                self.push(v);
            }
            I::PushUInt { index } => {
                let n = self.request.uints.get(*index as usize).copied().unwrap_or(0);
                let v = self.constant(f64::from(n));
                self.push(v);
            }
            I::PushDouble { index } => {
                let n = self.request.doubles.get(*index as usize).copied().unwrap_or(f64::NAN);
                let v = self.constant(n);
                self.push(v);
            }
            I::PushNaN => {
                let v = self.constant(f64::NAN);
                self.push(v);
            }
            I::PushTrue | I::PushFalse => {
                let v = self.constant(if matches!(instruction, I::PushTrue) { 1.0 } else { 0.0 });
                self.push(v);
            }
            I::Pop => {
                self.pop();
            }
            I::Dup => {
                let v = self.peek();
                self.push(v);
            }
            I::Swap => {
                let b = self.pop();
                let a = self.pop();
                self.push(b);
                self.push(a);
            }

            I::GetLocal { reg } => {
                let v = self.builder.use_var(local_var(*reg));
                self.push(v);
            }
            I::SetLocal { reg } => {
                let v = self.pop();
                self.builder.def_var(local_var(*reg), v);
            }
            I::IncLocal { reg } | I::DecLocal { reg } => {
                let var = local_var(*reg);
                let v = self.builder.use_var(var);
                let step = self.constant(if matches!(instruction, I::IncLocal { .. }) { 1.0 } else { -1.0 });
                let r = self.builder.ins().fadd(v, step);
                self.builder.def_var(var, r);
            }
            I::IncLocalI { reg } | I::DecLocalI { reg } => {
                let var = local_var(*reg);
                let v = self.builder.use_var(var);
                let step = self.constant(if matches!(instruction, I::IncLocalI { .. }) { 1.0 } else { -1.0 });
                let r = self.int_op(v, step, |b, x, y| b.ins().iadd(x, y));
                self.builder.def_var(var, r);
            }

            I::Negate => {
                let v = self.pop();
                let r = self.builder.ins().fneg(v);
                self.push(r);
            }
            I::Increment | I::Decrement => {
                let v = self.pop();
                let step = self.constant(if matches!(instruction, I::Increment) { 1.0 } else { -1.0 });
                let r = self.builder.ins().fadd(v, step);
                self.push(r);
            }
            I::IncrementI | I::DecrementI => {
                let v = self.pop();
                let step = self.constant(if matches!(instruction, I::IncrementI) { 1.0 } else { -1.0 });
                let r = self.int_op(v, step, |b, x, y| b.ins().iadd(x, y));
                self.push(r);
            }
            I::NegateI => {
                let v = self.pop();
                let zero = self.constant(0.0);
                let r = self.int_op(zero, v, |b, x, y| b.ins().isub(x, y));
                self.push(r);
            }
            I::Not => {
                let v = self.pop();
                let t = self.truthy(v);
                let zero = self.constant(0.0);
                let one = self.constant(1.0);
                let r = self.builder.ins().select(t, zero, one);
                self.push(r);
            }

            I::Add | I::Subtract | I::Multiply | I::Divide => {
                let b = self.pop();
                let a = self.pop();
                let ins = self.builder.ins();
                let r = match instruction {
                    I::Add => ins.fadd(a, b),
                    I::Subtract => ins.fsub(a, b),
                    I::Multiply => ins.fmul(a, b),
                    _ => ins.fdiv(a, b),
                };
                self.push(r);
            }
            I::AddI | I::SubtractI | I::MultiplyI => {
                let b = self.pop();
                let a = self.pop();
                let r = match instruction {
                    I::AddI => self.int_op(a, b, |bd, x, y| bd.ins().iadd(x, y)),
                    I::SubtractI => self.int_op(a, b, |bd, x, y| bd.ins().isub(x, y)),
                    _ => self.int_op(a, b, |bd, x, y| bd.ins().imul(x, y)),
                };
                self.push(r);
            }
            I::Equals | I::StrictEquals | I::LessThan | I::LessEquals | I::GreaterThan | I::GreaterEquals => {
                let b = self.pop();
                let a = self.pop();
                let cc = match instruction {
                    I::Equals | I::StrictEquals => FloatCC::Equal,
                    I::LessThan => FloatCC::LessThan,
                    I::LessEquals => FloatCC::LessThanOrEqual,
                    I::GreaterThan => FloatCC::GreaterThan,
                    _ => FloatCC::GreaterThanOrEqual,
                };
                let c = self.builder.ins().fcmp(cc, a, b);
                let r = self.boolean(c);
                self.push(r);
            }

            I::Jump { target } => {
                let block = self.target(at, *target)?;
                self.builder.ins().jump(block, &[]);
                return Ok(true);
            }
            I::IfTrue { target } | I::IfFalse { target } => {
                let v = self.pop();
                let t = self.truthy(v);
                let taken = self.target(at, *target)?;
                let next = self.fallthrough(at)?;
                if matches!(instruction, I::IfTrue { .. }) {
                    self.builder.ins().brif(t, taken, &[], next, &[]);
                } else {
                    self.builder.ins().brif(t, next, &[], taken, &[]);
                }
                return Ok(true);
            }
            I::If { cond, target } => {
                let b = self.pop();
                let a = self.pop();
                let c = self.builder.ins().fcmp(float_cc(*cond), a, b);
                let taken = self.target(at, *target)?;
                let next = self.fallthrough(at)?;
                self.builder.ins().brif(c, taken, &[], next, &[]);
                return Ok(true);
            }
            I::ReturnValue => {
                let v = self.pop();
                self.builder.ins().store(MemFlags::trusted(), v, self.out, 0);
                let done = self.builder.ins().iconst(types::I8, 0);
                self.builder.ins().return_(&[done]);
                return Ok(true);
            }
            other => return Err(format!("cannot translate `{other}`")),
        }
        Ok(false)
    }
}

#[inline]
fn local_var(reg: u32) -> Variable {
    Variable::from_u32(reg)
}

fn float_cc(cond: Condition) -> FloatCC {
    match cond {
        Condition::Eq | Condition::StrictEq => FloatCC::Equal,
        Condition::Ne | Condition::StrictNe => FloatCC::NotEqual,
        Condition::Lt => FloatCC::LessThan,
        Condition::Le => FloatCC::LessThanOrEqual,
        Condition::Gt => FloatCC::GreaterThan,
        Condition::Ge => FloatCC::GreaterThanOrEqual,
        Condition::NotLt => FloatCC::UnorderedOrGreaterThanOrEqual,
        Condition::NotLe => FloatCC::UnorderedOrGreaterThan,
        Condition::NotGt => FloatCC::UnorderedOrLessThanOrEqual,
        Condition::NotGe => FloatCC::UnorderedOrLessThan,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;

    fn request<'a>(code: &'a [Instruction], offsets: &'a [u32], params: &'a [SlotType]) -> CompileRequest<'a> {
        CompileRequest {
            name: "test",
            code,
            offsets,
            params,
            return_type: SlotType::Number,
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

    #[test]
    fn compiles_a_counting_loop() {
        // var i:int = 0; var s = 0; while (i < n) { s += i; i++ } return s
        // with r1 = n, r2 = i; s lives on top of the loop as r2's twin.
        let code = [
            Instruction::PushByte { value: 0 },  // 0
            Instruction::SetLocal { reg: 2 },    // 1
            Instruction::PushByte { value: 0 },  // 2  s
            Instruction::Label,                  // 3  loop header
            Instruction::GetLocal { reg: 2 },    // 4
            Instruction::GetLocal { reg: 1 },    // 5
            Instruction::If { cond: Condition::NotLt, target: 11 }, // 6
            Instruction::GetLocal { reg: 2 },    // 7
            Instruction::Add,                    // 8
            Instruction::IncLocalI { reg: 2 },   // 9
            Instruction::Jump { target: 3 },     // 10
            Instruction::ReturnValue,            // 11
        ];
        let offsets: Vec<u32> = (0..code.len() as u32).collect();
        let params = [SlotType::Int];
        let mut backend = NativeBackend::new().expect("backend");
        let compiled = backend
            .compile(&request(&code, &offsets, &params))
            .expect("compiled");
        let cancel = AtomicBool::new(false);
        assert_eq!(compiled.run(&[5.0], &cancel), Some(10.0));
        assert_eq!(compiled.run(&[0.0], &cancel), Some(0.0));
    }

    #[test]
    fn raised_flag_stops_loops() {
        let code = [
            Instruction::Label,
            Instruction::Jump { target: 0 },
        ];
        let mut backend = NativeBackend::new().expect("backend");
        // An endless loop never returns a value, so it only compiles if
        // nothing falls off the end.
        let compiled = backend
            .compile(&request(&code, &[0, 1], &[]))
            .expect("compiled");
        let cancel = AtomicBool::new(true);
        assert_eq!(compiled.run(&[], &cancel), None);
    }

    #[test]
    fn object_code_is_left_to_the_interpreter() {
        let code = [Instruction::NewObject { argc: 0 }, Instruction::ReturnValue];
        let mut backend = NativeBackend::new().expect("backend");
        assert!(backend.compile(&request(&code, &[0, 1], &[])).is_none());
    }

    #[test]
    fn int_arithmetic_wraps() {
        let code = [
            Instruction::GetLocal { reg: 1 },
            Instruction::GetLocal { reg: 1 },
            Instruction::AddI,
            Instruction::ReturnValue,
        ];
        let mut backend = NativeBackend::new().expect("backend");
        let compiled = backend
            .compile(&request(&code, &[0, 1, 2, 3], &[SlotType::Int]))
            .expect("compiled");
        let cancel = AtomicBool::new(false);
        assert_eq!(compiled.run(&[i32::MAX as f64], &cancel), Some(-2.0));
    }
}
