use crate::ObjectRef;

/// One entry of a scope stack.
#[derive(Debug, Clone)]
pub struct Scope {
    pub object: ObjectRef,
    /// Pushed by `pushwith`: every property of the object is in scope, not
    /// only its declared traits.
    pub with: bool,
}

impl Scope {
    pub fn new(object: ObjectRef) -> Self {
        Self {
            object,
            with: false,
        }
    }

    pub fn with(object: ObjectRef) -> Self {
        Self { object, with: true }
    }
}

/// A captured scope stack, outermost (the global) first.
///
/// Every closure owns its own copy so that each entry corresponds to exactly
/// one reference count held by the closure.
#[derive(Debug, Clone, Default)]
pub struct ScopeChain {
    scopes: Vec<Scope>,
}

impl ScopeChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_scopes(scopes: Vec<Scope>) -> Self {
        Self { scopes }
    }

    /// This chain followed by `inner`.
    pub fn extend(&self, inner: &[Scope]) -> Self {
        let mut scopes = Vec::with_capacity(self.scopes.len() + inner.len());
        scopes.extend_from_slice(&self.scopes);
        scopes.extend_from_slice(inner);
        Self { scopes }
    }

    pub fn push(&mut self, scope: Scope) {
        self.scopes.push(scope);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Scope> {
        self.scopes.get(index)
    }

    /// The outermost scope: the script global.
    pub fn global(&self) -> Option<&ObjectRef> {
        self.scopes.first().map(|scope| &scope.object)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Scope> {
        self.scopes.iter()
    }

    pub fn clear(&mut self) {
        self.scopes.clear();
    }
}
