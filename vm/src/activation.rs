use std::sync::Arc;

use object::{Atom, ClassId, ObjectRef, Scope, ScopeChain};

use crate::{
    VmError,
    loader::{BodyDesc, LoadedUnit},
};

/// One interpreted call: registers, operand stack and local scope stack.
pub(crate) struct Activation {
    pub unit: Arc<LoadedUnit>,
    pub body: Arc<BodyDesc>,
    /// Index of the next instruction.
    pub pc: usize,
    pub locals: Vec<Atom>,
    pub stack: Vec<Atom>,
    /// Scopes pushed by this frame, outermost first.
    pub scope: Vec<Scope>,
    /// Scope captured by the closure or class this method belongs to.
    pub outer: ScopeChain,
    /// Class whose `super` this method sees.
    pub class: Option<ClassId>,
}

impl Activation {
    pub fn new(
        unit: Arc<LoadedUnit>,
        body: Arc<BodyDesc>,
        locals: Vec<Atom>,
        outer: ScopeChain,
        class: Option<ClassId>,
    ) -> Self {
        let stack = Vec::with_capacity(body.max_stack as usize);
        Self {
            unit,
            body,
            pc: 0,
            locals,
            stack,
            scope: Vec::new(),
            outer,
            class,
        }
    }

    #[inline]
    pub fn push(&mut self, value: Atom) {
        self.stack.push(value);
    }

    #[inline]
    pub fn pop(&mut self) -> Result<Atom, VmError> {
        self.stack.pop().ok_or_else(|| VmError::verify(1024, &[]))
    }

    #[inline]
    pub fn peek(&self) -> Result<&Atom, VmError> {
        self.stack.last().ok_or_else(|| VmError::verify(1024, &[]))
    }

    /// Pop `argc` values, returned in push order.
    pub fn pop_args(&mut self, argc: u32) -> Result<Vec<Atom>, VmError> {
        let argc = argc as usize;
        if self.stack.len() < argc {
            return Err(VmError::verify(1024, &[]));
        }
        Ok(self.stack.split_off(self.stack.len() - argc))
    }

    #[inline]
    pub fn local(&self, reg: u32) -> Result<&Atom, VmError> {
        self.locals
            .get(reg as usize)
            .ok_or_else(|| VmError::verify(1025, &[&reg.to_string()]))
    }

    #[inline]
    pub fn set_local(&mut self, reg: u32, value: Atom) -> Result<(), VmError> {
        match self.locals.get_mut(reg as usize) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(VmError::verify(1025, &[&reg.to_string()])),
        }
    }

    /// The scope object at `index`, counting from the outermost entry
    /// pushed by this frame.
    pub fn scope_object(&self, index: usize) -> Result<ObjectRef, VmError> {
        self.scope
            .get(index)
            .map(|scope| scope.object.clone())
            .ok_or_else(|| VmError::verify(1024, &[]))
    }

    /// The global object this frame sees.
    pub fn global(&self) -> Option<ObjectRef> {
        self.outer
            .global()
            .or_else(|| self.scope.first().map(|scope| &scope.object))
            .cloned()
    }

    /// The full scope chain for a closure created in this frame.
    pub fn capture(&self) -> ScopeChain {
        self.outer.extend(&self.scope)
    }
}
