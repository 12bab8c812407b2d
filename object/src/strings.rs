use std::{collections::HashMap, fmt, sync::Arc};

use parking_lot::RwLock;

/// Index of an interned string.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StringId(u32);

impl StringId {
    /// The empty string. Always interned first.
    pub const EMPTY: StringId = StringId(0);

    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for StringId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s#{}", self.0)
    }
}

struct Interner {
    mappings: HashMap<Arc<str>, StringId, ahash::RandomState>,
    table: Vec<Arc<str>>,
}

impl Interner {
    fn get_or_add(&mut self, value: &str) -> StringId {
        if let Some(&id) = self.mappings.get(value) {
            return id;
        }
        let id = StringId(self.table.len() as u32);
        let interned: Arc<str> = Arc::from(value);
        self.table.push(Arc::clone(&interned));
        self.mappings.insert(interned, id);
        id
    }
}

/// Shared string interner.
///
/// Equal contents always map to the same [`StringId`], so string equality
/// is id equality. Cloning the table clones the handle, not the contents.
#[derive(Clone)]
pub struct StringTable(Arc<RwLock<Interner>>);

impl StringTable {
    pub fn new() -> Self {
        let mut interner = Interner {
            mappings: HashMap::default(),
            table: Vec::new(),
        };
        let empty = interner.get_or_add("");
        debug_assert_eq!(empty, StringId::EMPTY);
        Self(Arc::new(RwLock::new(interner)))
    }

    pub fn intern(&self, value: &str) -> StringId {
        if let Some(&id) = self.0.read().mappings.get(value) {
            return id;
        }
        self.0.write().get_or_add(value)
    }

    /// Look up an already interned string without adding it.
    pub fn find(&self, value: &str) -> Option<StringId> {
        self.0.read().mappings.get(value).copied()
    }

    /// Contents of `id`. Unknown ids read as the empty string.
    pub fn get(&self, id: StringId) -> Arc<str> {
        self.0
            .read()
            .table
            .get(id.0 as usize)
            .cloned()
            .unwrap_or_else(|| Arc::from(""))
    }

    pub fn len(&self) -> usize {
        self.0.read().table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for StringTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StringTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StringTable({} strings)", self.len())
    }
}
