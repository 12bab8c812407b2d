//! Optional native compilation of method bodies.
//!
//! The interpreter is always correct on its own. A [`Backend`] may
//! translate a method into native code when [`analysis`] proves every
//! value it touches is a number; the VM then calls the compiled entry
//! instead of interpreting the body. A backend that declines a method
//! changes nothing but speed.

pub mod analysis;
#[cfg(feature = "native")]
mod native;

use std::sync::atomic::AtomicBool;

use bytecode::{Instruction, MethodFlags};
use object::{Multiname, SlotType};

#[cfg(feature = "native")]
pub use self::native::NativeBackend;

/// Everything a backend may look at when compiling one method.
pub struct CompileRequest<'a> {
    pub name: &'a str,
    pub code: &'a [Instruction],
    /// Byte offset of each instruction; branch targets refer to these.
    pub offsets: &'a [u32],
    pub params: &'a [SlotType],
    pub return_type: SlotType,
    pub local_count: u32,
    pub flags: MethodFlags,
    /// Instruction index of each exception handler's entry point.
    pub handler_targets: &'a [usize],
    pub has_activation: bool,
    pub ints: &'a [i32],
    pub uints: &'a [u32],
    pub doubles: &'a [f64],
    pub multinames: &'a [Multiname],
}

impl CompileRequest<'_> {
    #[inline]
    pub fn has_handlers(&self) -> bool {
        !self.handler_targets.is_empty()
    }

    /// Instruction index of the instruction at byte `offset`.
    #[inline]
    pub fn index_of(&self, offset: u32) -> Option<usize> {
        self.offsets.binary_search(&offset).ok()
    }
}

/// Signature of compiled code: the numeric arguments, the cancellation
/// flag and the result slot. Returns 0 on completion and 1 when it
/// stopped because the flag was raised.
pub(crate) type NativeEntry = unsafe extern "C" fn(*const f64, *const AtomicBool, *mut f64) -> u8;

/// A method compiled to native code. The code lives in its backend, which
/// the VM keeps alive for as long as any `CompiledMethod` exists.
pub struct CompiledMethod {
    #[cfg_attr(not(feature = "native"), allow(dead_code))]
    entry: NativeEntry,
    arity: usize,
}

impl CompiledMethod {
    #[cfg_attr(not(feature = "native"), allow(dead_code))]
    pub(crate) fn new(entry: NativeEntry, arity: usize) -> Self {
        Self { entry, arity }
    }

    /// Run with the declared parameters, already coerced to numbers.
    /// `None` when `cancel` was raised while running.
    pub fn run(&self, args: &[f64], cancel: &AtomicBool) -> Option<f64> {
        debug_assert_eq!(args.len(), self.arity);
        if args.len() != self.arity {
            return None;
        }
        let mut result = 0.0;
        // SAFETY: `entry` reads exactly `arity` doubles from `args`, only
        // loads from `cancel` and writes one double to `result`.
        let status = unsafe { (self.entry)(args.as_ptr(), cancel, &mut result) };
        (status == 0).then_some(result)
    }
}

/// A native code generator.
pub trait Backend {
    fn name(&self) -> &'static str;

    /// Compile `request`, or `None` to leave the method to the
    /// interpreter.
    fn compile(&mut self, request: &CompileRequest<'_>) -> Option<CompiledMethod>;
}

/// Never compiles anything.
#[derive(Debug, Default)]
pub struct InterpreterOnly;

impl Backend for InterpreterOnly {
    fn name(&self) -> &'static str {
        "interpreter"
    }

    fn compile(&mut self, _request: &CompileRequest<'_>) -> Option<CompiledMethod> {
        None
    }
}

/// The best backend this build supports.
pub fn default_backend() -> Box<dyn Backend> {
    #[cfg(feature = "native")]
    match NativeBackend::new() {
        Ok(backend) => return Box::new(backend),
        Err(err) => log::warn!("native backend unavailable: {err}"),
    }
    Box::new(InterpreterOnly)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpreter_only_declines_everything() {
        let mut backend = InterpreterOnly;
        let request = CompileRequest {
            name: "f",
            code: &[Instruction::ReturnVoid],
            offsets: &[0],
            params: &[],
            return_type: SlotType::Any,
            local_count: 1,
            flags: MethodFlags::empty(),
            handler_targets: &[],
            has_activation: false,
            ints: &[],
            uints: &[],
            doubles: &[],
            multinames: &[],
        };
        assert!(backend.compile(&request).is_none());
        assert_eq!(backend.name(), "interpreter");
    }
}
