//! The application domain: every installed script, the definitions each
//! one exports, and their lazy initialization.
//!
//! A script's global object is created and its initializer run the first
//! time anything looks up one of its definitions (or when the host runs it
//! as an entry point). While the initializer runs the script is
//! `Running`, and lookups that reach it again see the partially
//! initialized global instead of re-entering the initializer.

use std::{collections::HashMap, sync::Arc};

use log::debug;
use object::{
    Atom, Layout, MethodId, MethodOwner, Multiname, ObjectKind, ObjectRef, QName, Scope,
    ScopeChain, ScriptObject, StringId, StringTable, resolve_declared,
};

use crate::{
    Vm, VmError,
    loader::{LoadedUnit, build_layout},
};

#[derive(Clone)]
pub(crate) enum ScriptState {
    Pending,
    Running(ObjectRef),
    Ready(ObjectRef),
}

pub(crate) struct ScriptEntry {
    pub unit: u32,
    /// Index of the script within its unit.
    pub script: u32,
    pub layout: Arc<Layout>,
    pub state: ScriptState,
}

/// Scripts of one unit, checked and ready to install.
pub(crate) struct Prepared {
    entries: Vec<ScriptEntry>,
    exports: Vec<(QName, u32)>,
}

#[derive(Default)]
pub(crate) struct Domain {
    scripts: Vec<ScriptEntry>,
    definitions: HashMap<QName, u32, ahash::RandomState>,
    by_name: HashMap<StringId, Vec<(QName, u32)>, ahash::RandomState>,
    /// Last script of each unit.
    entry_points: HashMap<u32, u32, ahash::RandomState>,
}

impl Domain {
    /// Build script layouts for `unit` and check that none of its
    /// definitions is already defined.
    pub fn prepare(&self, unit: &LoadedUnit, strings: &StringTable) -> Result<Prepared, VmError> {
        let base = self.scripts.len() as u32;
        let mut entries = Vec::with_capacity(unit.scripts.len());
        let mut exports: Vec<(QName, u32)> = Vec::new();
        for (i, script) in unit.scripts.iter().enumerate() {
            let id = base + i as u32;
            let layout = build_layout(
                unit.index,
                &script.traits,
                None,
                MethodOwner::Script(id),
                strings,
            )?;
            for t in &script.traits {
                let duplicate = self.definitions.contains_key(&t.name)
                    || exports.iter().any(|(name, _)| *name == t.name);
                if duplicate {
                    return Err(VmError::verify(
                        1107,
                        &[&format!("duplicate definition {}", t.name.display(strings))],
                    ));
                }
                exports.push((t.name, id));
            }
            entries.push(ScriptEntry {
                unit: unit.index,
                script: i as u32,
                layout: Arc::new(layout),
                state: ScriptState::Pending,
            });
        }
        Ok(Prepared { entries, exports })
    }

    pub fn install(&mut self, prepared: Prepared) {
        if let Some(last) = prepared.entries.last() {
            let id = self.scripts.len() as u32 + prepared.entries.len() as u32 - 1;
            self.entry_points.insert(last.unit, id);
        }
        for (name, id) in prepared.exports {
            self.definitions.insert(name, id);
            self.by_name.entry(name.name).or_default().push((name, id));
        }
        self.scripts.extend(prepared.entries);
    }

    pub fn entry_script(&self, unit: u32) -> Option<u32> {
        self.entry_points.get(&unit).copied()
    }

    /// The script that defines a name matching `mn`.
    pub fn find(&self, mn: &Multiname) -> Option<u32> {
        let name = mn.name?;
        self.by_name
            .get(&name)?
            .iter()
            .find(|(qname, _)| mn.matches(qname))
            .map(|&(_, id)| id)
    }

    pub fn entry(&self, id: u32) -> Option<&ScriptEntry> {
        self.scripts.get(id as usize)
    }

    fn set_state(&mut self, id: u32, state: ScriptState) {
        if let Some(entry) = self.scripts.get_mut(id as usize) {
            entry.state = state;
        }
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }
}

impl Vm {
    /// The global object of script `id`, initializing the script first if
    /// it has not run yet.
    pub(crate) fn script_global(&mut self, id: u32) -> Result<ObjectRef, VmError> {
        let state = self
            .domain
            .entry(id)
            .map(|entry| entry.state.clone())
            .ok_or_else(|| VmError::Internal(format!("no script {id}")))?;
        match state {
            ScriptState::Running(global) | ScriptState::Ready(global) => Ok(global),
            ScriptState::Pending => self.init_script(id).map(|(global, _)| global),
        }
    }

    /// Run script `id` unless it already ran; returns the initializer's
    /// result.
    pub(crate) fn run_script(&mut self, id: u32) -> Result<Atom, VmError> {
        match self.domain.entry(id).map(|entry| &entry.state) {
            Some(ScriptState::Pending) => self.init_script(id).map(|(_, value)| value),
            Some(_) => Ok(Atom::Undefined),
            None => Err(VmError::Internal(format!("no script {id}"))),
        }
    }

    fn init_script(&mut self, id: u32) -> Result<(ObjectRef, Atom), VmError> {
        let (unit_index, script_index, layout) = {
            let entry = self
                .domain
                .entry(id)
                .ok_or_else(|| VmError::Internal(format!("no script {id}")))?;
            (entry.unit, entry.script, Arc::clone(&entry.layout))
        };
        let unit = Arc::clone(&self.units[unit_index as usize]);
        let script = &unit.scripts[script_index as usize];

        let object = &self.classes[self.builtins.object.0 as usize];
        let global = self.heap.alloc(ScriptObject::with_layout(
            Arc::clone(&object.def),
            layout,
            Some(object.prototype.clone()),
            ObjectKind::Plain,
            false,
        ));
        self.pin(&global);
        self.domain.set_state(id, ScriptState::Running(global.clone()));

        let scope = ScopeChain::from_scopes(vec![Scope::new(global.clone())]);
        self.init_function_slots(&global, unit_index, &script.traits, &scope)?;

        debug!("initializing script {id} of unit {unit_index}");
        let result = self.invoke(
            MethodId::Script {
                unit: unit_index,
                index: script.init,
            },
            Atom::Object(global.clone()),
            &[],
            ScopeChain::new(),
            None,
        );
        // A failed initializer does not run again; its partial global stays.
        self.domain.set_state(id, ScriptState::Ready(global.clone()));
        result.map(|value| (global, value))
    }

    /// The object that holds the definition `mn`: the builtin global, or
    /// the global of the script defining it.
    pub(crate) fn find_definition_holder(
        &mut self,
        mn: &Multiname,
    ) -> Result<Option<ObjectRef>, VmError> {
        let global = self.builtins.global.clone();
        if resolve_declared(&global, mn).is_some() {
            return Ok(Some(global));
        }
        match self.domain.find(mn) {
            Some(id) => self.script_global(id).map(Some),
            None => Ok(None),
        }
    }

    pub(crate) fn find_definition(&mut self, mn: &Multiname) -> Result<Option<Atom>, VmError> {
        match self.find_definition_holder(mn)? {
            Some(holder) => self.get_prop(&Atom::Object(holder), mn).map(Some),
            None => Ok(None),
        }
    }
}
