use std::collections::HashMap;

use crate::abc::*;

/// Programmatic construction of an [`AbcFile`].
///
/// Pool entries are deduplicated. Entry 0 of each table stays the
/// placeholder, so every value interned here gets an index of at least 1.
pub struct UnitBuilder {
    file: AbcFile,
    strings: HashMap<String, u32, ahash::RandomState>,
    namespaces: HashMap<NamespaceInfo, u32, ahash::RandomState>,
    ns_sets: HashMap<Vec<u32>, u32, ahash::RandomState>,
    multinames: HashMap<MultinameInfo, u32, ahash::RandomState>,
    ints: HashMap<i32, u32, ahash::RandomState>,
    uints: HashMap<u32, u32, ahash::RandomState>,
    doubles: HashMap<u64, u32, ahash::RandomState>,
}

impl UnitBuilder {
    pub fn new() -> Self {
        Self {
            file: AbcFile::default(),
            strings: HashMap::default(),
            namespaces: HashMap::default(),
            ns_sets: HashMap::default(),
            multinames: HashMap::default(),
            ints: HashMap::default(),
            uints: HashMap::default(),
            doubles: HashMap::default(),
        }
    }

    // ── Constant pool ─────────────────────────────────────────────────

    pub fn string(&mut self, value: &str) -> u32 {
        if let Some(&index) = self.strings.get(value) {
            return index;
        }
        let pool = &mut self.file.constant_pool.strings;
        let index = pool.len() as u32;
        pool.push(value.to_owned());
        self.strings.insert(value.to_owned(), index);
        index
    }

    pub fn int(&mut self, value: i32) -> u32 {
        let pool = &mut self.file.constant_pool.ints;
        *self.ints.entry(value).or_insert_with(|| {
            pool.push(value);
            pool.len() as u32 - 1
        })
    }

    pub fn uint(&mut self, value: u32) -> u32 {
        let pool = &mut self.file.constant_pool.uints;
        *self.uints.entry(value).or_insert_with(|| {
            pool.push(value);
            pool.len() as u32 - 1
        })
    }

    pub fn double(&mut self, value: f64) -> u32 {
        let pool = &mut self.file.constant_pool.doubles;
        *self.doubles.entry(value.to_bits()).or_insert_with(|| {
            pool.push(value);
            pool.len() as u32 - 1
        })
    }

    pub fn namespace(&mut self, kind: NamespaceKindInfo, uri: &str) -> u32 {
        let name = self.string(uri);
        let info = NamespaceInfo { kind, name };
        let pool = &mut self.file.constant_pool.namespaces;
        *self.namespaces.entry(info).or_insert_with(|| {
            pool.push(info);
            pool.len() as u32 - 1
        })
    }

    /// The public namespace (package `""`).
    pub fn public_ns(&mut self) -> u32 {
        self.namespace(NamespaceKindInfo::Package, "")
    }

    pub fn package_ns(&mut self, uri: &str) -> u32 {
        self.namespace(NamespaceKindInfo::Package, uri)
    }

    /// A fresh private namespace. Never deduplicated: each call denotes a
    /// distinct definition site.
    pub fn private_ns(&mut self, uri: &str) -> u32 {
        let name = self.string(uri);
        let pool = &mut self.file.constant_pool.namespaces;
        pool.push(NamespaceInfo {
            kind: NamespaceKindInfo::Private,
            name,
        });
        pool.len() as u32 - 1
    }

    pub fn ns_set(&mut self, namespaces: &[u32]) -> u32 {
        let pool = &mut self.file.constant_pool.ns_sets;
        *self
            .ns_sets
            .entry(namespaces.to_vec())
            .or_insert_with(|| {
                pool.push(namespaces.to_vec());
                pool.len() as u32 - 1
            })
    }

    pub fn multiname_info(&mut self, info: MultinameInfo) -> u32 {
        let pool = &mut self.file.constant_pool.multinames;
        *self.multinames.entry(info.clone()).or_insert_with(|| {
            pool.push(info);
            pool.len() as u32 - 1
        })
    }

    pub fn qname(&mut self, ns: u32, name: &str) -> u32 {
        let name = self.string(name);
        self.multiname_info(MultinameInfo::QName {
            ns,
            name,
            attribute: false,
        })
    }

    /// QName in the public namespace.
    pub fn public_name(&mut self, name: &str) -> u32 {
        let ns = self.public_ns();
        self.qname(ns, name)
    }

    pub fn multiname(&mut self, name: &str, ns_set: u32) -> u32 {
        let name = self.string(name);
        self.multiname_info(MultinameInfo::Multiname {
            name,
            ns_set,
            attribute: false,
        })
    }

    /// Multiname whose local name comes from the operand stack.
    pub fn multiname_late(&mut self, ns_set: u32) -> u32 {
        self.multiname_info(MultinameInfo::MultinameL {
            ns_set,
            attribute: false,
        })
    }

    /// Multiname with a fixed local name and a runtime namespace.
    pub fn rt_qname(&mut self, name: &str) -> u32 {
        let name = self.string(name);
        self.multiname_info(MultinameInfo::RtQName {
            name,
            attribute: false,
        })
    }

    // ── Methods ───────────────────────────────────────────────────────

    pub fn method(&mut self, info: MethodInfo) -> u32 {
        self.file.methods.push(info);
        self.file.methods.len() as u32 - 1
    }

    pub fn body(&mut self, body: MethodBody) {
        self.file.bodies.push(body);
    }

    /// Declare a method with `param_count` untyped parameters and attach
    /// `code` as its body.
    pub fn function(
        &mut self,
        name: &str,
        param_count: usize,
        local_count: u32,
        code: Vec<u8>,
    ) -> u32 {
        let name = self.string(name);
        self.function_with(
            MethodInfo {
                params: vec![0; param_count],
                name,
                ..MethodInfo::default()
            },
            local_count,
            code,
            Vec::new(),
        )
    }

    pub fn function_with(
        &mut self,
        info: MethodInfo,
        local_count: u32,
        code: Vec<u8>,
        exceptions: Vec<ExceptionInfo>,
    ) -> u32 {
        let local_count = local_count.max(info.params.len() as u32 + 1);
        let method = self.method(info);
        self.body(MethodBody {
            method,
            max_stack: 16,
            local_count,
            init_scope_depth: 0,
            max_scope_depth: 8,
            code,
            exceptions,
            traits: Vec::new(),
        });
        method
    }

    // ── Classes and scripts ───────────────────────────────────────────

    /// Add a class; returns its class index.
    pub fn class(&mut self, instance: InstanceInfo, class: ClassInfo) -> u32 {
        self.file.instances.push(instance);
        self.file.classes.push(class);
        self.file.classes.len() as u32 - 1
    }

    pub fn script(&mut self, init: u32, traits: Vec<TraitInfo>) -> u32 {
        self.file.scripts.push(ScriptInfo { init, traits });
        self.file.scripts.len() as u32 - 1
    }

    pub fn finish(self) -> AbcFile {
        self.file
    }
}

impl Default for UnitBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ── Trait shorthands ──────────────────────────────────────────────────

impl TraitInfo {
    pub fn slot(name: u32, slot_id: u32, type_name: u32, value: Option<ConstValue>) -> Self {
        Self::plain(
            name,
            TraitData::Slot {
                slot_id,
                type_name,
                value,
            },
        )
    }

    pub fn constant(name: u32, slot_id: u32, type_name: u32, value: Option<ConstValue>) -> Self {
        Self::plain(
            name,
            TraitData::Const {
                slot_id,
                type_name,
                value,
            },
        )
    }

    pub fn method(name: u32, method: u32) -> Self {
        Self::plain(name, TraitData::Method { disp_id: 0, method })
    }

    pub fn getter(name: u32, method: u32) -> Self {
        Self::plain(name, TraitData::Getter { disp_id: 0, method })
    }

    pub fn setter(name: u32, method: u32) -> Self {
        Self::plain(name, TraitData::Setter { disp_id: 0, method })
    }

    pub fn class(name: u32, slot_id: u32, class: u32) -> Self {
        Self::plain(name, TraitData::Class { slot_id, class })
    }

    pub fn function(name: u32, slot_id: u32, method: u32) -> Self {
        Self::plain(name, TraitData::Function { slot_id, method })
    }

    fn plain(name: u32, data: TraitData) -> Self {
        Self {
            name,
            data,
            attributes: TraitAttributes::empty(),
            metadata: Vec::new(),
        }
    }

    pub fn with_attributes(mut self, attributes: TraitAttributes) -> Self {
        self.attributes = attributes;
        self
    }
}
