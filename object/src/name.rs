use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use crate::{StringId, StringTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamespaceKind {
    Namespace,
    Package,
    PackageInternal,
    Protected,
    Explicit,
    StaticProtected,
    Private,
}

impl NamespaceKind {
    /// Kinds that compare equal when their URIs match.
    fn class(self) -> u8 {
        match self {
            NamespaceKind::Namespace | NamespaceKind::Package | NamespaceKind::Explicit => 0,
            NamespaceKind::PackageInternal => 1,
            NamespaceKind::Protected => 2,
            NamespaceKind::StaticProtected => 3,
            NamespaceKind::Private => 4,
        }
    }
}

/// A namespace. Private namespaces are distinct per definition site and
/// compare by `unique`; all others compare by kind class and URI.
#[derive(Debug, Clone, Copy)]
pub struct Namespace {
    pub kind: NamespaceKind,
    pub uri: StringId,
    pub unique: u32,
}

impl Namespace {
    /// The public (empty package) namespace.
    pub const PUBLIC: Namespace = Namespace {
        kind: NamespaceKind::Package,
        uri: StringId::EMPTY,
        unique: 0,
    };

    pub fn new(kind: NamespaceKind, uri: StringId) -> Self {
        Self {
            kind,
            uri,
            unique: 0,
        }
    }

    pub fn package(uri: StringId) -> Self {
        Self::new(NamespaceKind::Package, uri)
    }

    pub fn internal(uri: StringId) -> Self {
        Self::new(NamespaceKind::PackageInternal, uri)
    }

    pub fn private(uri: StringId, unique: u32) -> Self {
        Self {
            kind: NamespaceKind::Private,
            uri,
            unique,
        }
    }

    #[inline]
    pub fn is_public(&self) -> bool {
        self.kind.class() == 0 && self.uri == StringId::EMPTY
    }

    pub fn display(&self, strings: &StringTable) -> String {
        match self.kind {
            NamespaceKind::Private => format!("private#{}", self.unique),
            _ => strings.get(self.uri).to_string(),
        }
    }
}

impl PartialEq for Namespace {
    fn eq(&self, other: &Self) -> bool {
        let class = self.kind.class();
        class == other.kind.class()
            && if class == 4 {
                self.unique == other.unique
            } else {
                self.uri == other.uri
            }
    }
}

impl Eq for Namespace {}

impl Hash for Namespace {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let class = self.kind.class();
        class.hash(state);
        if class == 4 {
            self.unique.hash(state);
        } else {
            self.uri.hash(state);
        }
    }
}

/// Ordered set of candidate namespaces. An empty set matches any namespace.
#[derive(Debug, Clone, Default)]
pub struct NsSet(Arc<[Namespace]>);

impl NsSet {
    pub fn new(namespaces: Vec<Namespace>) -> Self {
        Self(namespaces.into())
    }

    pub fn single(ns: Namespace) -> Self {
        Self(Arc::from([ns]))
    }

    pub fn any() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_any(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, Namespace> {
        self.0.iter()
    }

    pub fn contains(&self, ns: &Namespace) -> bool {
        self.0.contains(ns)
    }

    /// Whether names in this set can reach the public dynamic properties.
    pub fn allows_public(&self) -> bool {
        self.is_any() || self.0.iter().any(Namespace::is_public)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A fully qualified name: one namespace and one local name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QName {
    pub ns: Namespace,
    pub name: StringId,
}

impl QName {
    pub fn new(ns: Namespace, name: StringId) -> Self {
        Self { ns, name }
    }

    pub fn public(name: StringId) -> Self {
        Self::new(Namespace::PUBLIC, name)
    }

    pub fn display(&self, strings: &StringTable) -> String {
        let uri = self.ns.display(strings);
        let name = strings.get(self.name);
        if uri.is_empty() {
            name.to_string()
        } else {
            format!("{uri}::{name}")
        }
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MultinameFlags: u8 {
        const ATTRIBUTE    = 1 << 0;
        /// The local name is popped from the operand stack at each use.
        const RUNTIME_NAME = 1 << 1;
        /// The namespace is popped from the operand stack at each use.
        const RUNTIME_NS   = 1 << 2;
    }
}

/// A lookup key: a local name plus an ordered set of candidate namespaces.
///
/// `name` is `None` for runtime names that have not been bound yet and for
/// the any-name `*`.
#[derive(Debug, Clone)]
pub struct Multiname {
    pub name: Option<StringId>,
    pub ns: NsSet,
    pub flags: MultinameFlags,
}

impl Multiname {
    pub fn qname(ns: Namespace, name: StringId) -> Self {
        Self {
            name: Some(name),
            ns: NsSet::single(ns),
            flags: MultinameFlags::empty(),
        }
    }

    pub fn public(name: StringId) -> Self {
        Self::qname(Namespace::PUBLIC, name)
    }

    pub fn with_set(name: StringId, ns: NsSet) -> Self {
        Self {
            name: Some(name),
            ns,
            flags: MultinameFlags::empty(),
        }
    }

    /// Name matched in any namespace.
    pub fn any_ns(name: StringId) -> Self {
        Self::with_set(name, NsSet::any())
    }

    pub fn runtime_name(ns: NsSet) -> Self {
        Self {
            name: None,
            ns,
            flags: MultinameFlags::RUNTIME_NAME,
        }
    }

    pub fn runtime_ns(name: Option<StringId>) -> Self {
        Self {
            name,
            ns: NsSet::any(),
            flags: MultinameFlags::RUNTIME_NS,
        }
    }

    pub fn attribute(mut self) -> Self {
        self.flags |= MultinameFlags::ATTRIBUTE;
        self
    }

    #[inline]
    pub fn is_attribute(&self) -> bool {
        self.flags.contains(MultinameFlags::ATTRIBUTE)
    }

    #[inline]
    pub fn has_runtime_name(&self) -> bool {
        self.flags.contains(MultinameFlags::RUNTIME_NAME)
    }

    #[inline]
    pub fn has_runtime_ns(&self) -> bool {
        self.flags.contains(MultinameFlags::RUNTIME_NS)
    }

    /// Whether the name still needs operands from the stack.
    #[inline]
    pub fn is_runtime(&self) -> bool {
        self.flags
            .intersects(MultinameFlags::RUNTIME_NAME | MultinameFlags::RUNTIME_NS)
    }

    /// Fill in the runtime parts, producing a static multiname.
    pub fn bind(&self, name: Option<StringId>, ns: Option<Namespace>) -> Multiname {
        let mut flags = self.flags;
        flags.remove(MultinameFlags::RUNTIME_NAME | MultinameFlags::RUNTIME_NS);
        Multiname {
            name: name.or(self.name),
            ns: match ns {
                Some(ns) => NsSet::single(ns),
                None => self.ns.clone(),
            },
            flags,
        }
    }

    /// The single namespace of a QName-shaped multiname.
    pub fn as_qname(&self) -> Option<QName> {
        let name = self.name?;
        let mut iter = self.ns.iter();
        let ns = *iter.next()?;
        if iter.next().is_some() {
            return None;
        }
        Some(QName::new(ns, name))
    }

    pub fn matches(&self, qname: &QName) -> bool {
        self.name == Some(qname.name) && (self.ns.is_any() || self.ns.contains(&qname.ns))
    }

    pub fn display(&self, strings: &StringTable) -> String {
        match self.name {
            Some(name) => strings.get(name).to_string(),
            None => "*".to_owned(),
        }
    }
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            NamespaceKind::Namespace => "namespace",
            NamespaceKind::Package => "package",
            NamespaceKind::PackageInternal => "internal",
            NamespaceKind::Protected => "protected",
            NamespaceKind::Explicit => "explicit",
            NamespaceKind::StaticProtected => "static protected",
            NamespaceKind::Private => "private",
        };
        f.write_str(text)
    }
}
