//! An ActionScript 3 virtual machine.
//!
//! [`Vm`] owns everything one execution context needs: the refcounted
//! object heap, the string table, the class table, the application domain
//! of loaded scripts and the native method table. Units are verified and
//! installed with [`Vm::load`]; their entry script runs with
//! [`Vm::run_entry`]. Hosts that want a single consumer thread wrap a VM in
//! an [`EventLoop`].

mod activation;
mod builtins;
mod call;
mod class;
pub mod codegen;
mod coerce;
mod disasm;
mod domain;
mod error;
pub mod events;
mod interpreter;
mod loader;
mod property;
mod settings;

use std::{
    collections::HashMap,
    sync::{Arc, atomic::AtomicBool},
};

use bytecode::AbcFile;
use heap::{CycleReport, Heap, HeapStats};
use log::{debug, error, info};
use object::{
    Atom, ClassId, Multiname, Namespace, ObjectRef, QName, ScriptObject, StringId, StringTable,
};

use crate::builtins::{Builtins, ClassEntry, NativeDesc};
use crate::codegen::{Backend, CompiledMethod};
use crate::domain::Domain;
use crate::loader::{LoadedUnit, UnitLoader};

pub use crate::error::{ErrorKind, UncaughtError, VmError, error_message};
pub use crate::events::{Event, EventLoop, EventQueue, Fence, LoopError, LoopReport, Outcome};
pub use crate::loader::UnitHandle;
pub use crate::settings::{EventLoopSettings, ShutdownMode, VmSettings};

/// Strings the runtime looks up by name.
pub(crate) struct Names {
    pub length: StringId,
    pub prototype: StringId,
    pub constructor: StringId,
    pub to_string: StringId,
    pub value_of: StringId,
    pub message: StringId,
    pub name: StringId,
    pub error_id: StringId,
}

impl Names {
    fn new(strings: &StringTable) -> Self {
        Self {
            length: strings.intern("length"),
            prototype: strings.intern("prototype"),
            constructor: strings.intern("constructor"),
            to_string: strings.intern("toString"),
            value_of: strings.intern("valueOf"),
            message: strings.intern("message"),
            name: strings.intern("name"),
            error_id: strings.intern("errorID"),
        }
    }
}

pub struct Vm {
    pub(crate) strings: StringTable,
    pub(crate) settings: VmSettings,
    pub(crate) units: Vec<Arc<LoadedUnit>>,
    pub(crate) classes: Vec<ClassEntry>,
    /// Class created by `newclass` for (unit, class index).
    pub(crate) unit_classes: HashMap<(u32, u32), ClassId, ahash::RandomState>,
    pub(crate) natives: Vec<NativeDesc>,
    pub(crate) domain: Domain,
    pub(crate) builtins: Builtins,
    pub(crate) names: Names,
    pub(crate) type_cache: HashMap<QName, ClassId, ahash::RandomState>,
    /// Backend results per (unit, method). `None` means "interpret".
    pub(crate) compiled: HashMap<(u32, u32), Option<Arc<CompiledMethod>>, ahash::RandomState>,
    pub(crate) backend: Box<dyn Backend>,
    pub(crate) depth: usize,
    pub(crate) budget: Option<u64>,
    pub(crate) cancel: Arc<AtomicBool>,
    pub(crate) next_private_ns: u32,
    trace_output: Option<Box<dyn FnMut(&str)>>,
    uncaught: Option<Box<dyn FnMut(&UncaughtError)>>,
    // Declared last: every handle above is released before the heap.
    pub(crate) heap: Heap<ScriptObject>,
}

impl Vm {
    pub fn new(settings: VmSettings) -> Result<Self, VmError> {
        let backend = codegen::default_backend();
        Self::with_backend(settings, backend)
    }

    pub fn with_backend(settings: VmSettings, backend: Box<dyn Backend>) -> Result<Self, VmError> {
        settings
            .validate()
            .map_err(|e| VmError::Internal(e.to_owned()))?;
        let heap = Heap::new(settings.heap.clone()).map_err(|e| VmError::Internal(e.to_owned()))?;
        let strings = StringTable::new();
        let names = Names::new(&strings);
        let (classes, natives, builtins) = builtins::bootstrap(&heap, &strings)?;
        info!(
            "vm ready: {} builtin classes, {} natives, backend {}",
            classes.len(),
            natives.len(),
            backend.name()
        );
        Ok(Self {
            strings,
            settings,
            units: Vec::new(),
            classes,
            unit_classes: HashMap::default(),
            natives,
            domain: Domain::default(),
            builtins,
            names,
            type_cache: HashMap::default(),
            compiled: HashMap::default(),
            backend,
            depth: 0,
            budget: None,
            cancel: Arc::new(AtomicBool::new(false)),
            next_private_ns: 0,
            trace_output: None,
            uncaught: None,
            heap,
        })
    }

    #[inline]
    pub fn settings(&self) -> &VmSettings {
        &self.settings
    }

    #[inline]
    pub fn strings(&self) -> &StringTable {
        &self.strings
    }

    pub fn intern(&self, text: &str) -> StringId {
        self.strings.intern(text)
    }

    /// A multiname for `name` in the public namespace.
    pub fn public_name(&self, name: &str) -> Multiname {
        Multiname::public(self.strings.intern(name))
    }

    // ── Loading ───────────────────────────────────────────────────────

    /// Verify `file` and install its scripts into the domain. On error
    /// nothing from the unit becomes visible.
    pub fn load(&mut self, file: &AbcFile) -> Result<UnitHandle, VmError> {
        let index = self.units.len() as u32;
        let mut next_private_ns = self.next_private_ns;
        let unit = UnitLoader::new(file, index, &self.strings, &mut next_private_ns)
            .max_frame_size(self.settings.max_frame_size)
            .load()?;
        let entries = self.domain.prepare(&unit, &self.strings)?;
        self.next_private_ns = next_private_ns;
        self.domain.install(entries);
        self.units.push(Arc::new(unit));
        debug!("installed unit {index}");
        Ok(UnitHandle(index))
    }

    /// Run the entry script of `unit`, which is its last script. Returns
    /// the value of the script initializer, or `undefined` when the script
    /// was already initialized by an earlier lookup.
    pub fn run_entry(&mut self, unit: UnitHandle) -> Result<Atom, VmError> {
        let script = self
            .domain
            .entry_script(unit.0)
            .ok_or_else(|| VmError::Internal(format!("unit {} has no scripts", unit.0)))?;
        self.host_entry(|vm| vm.run_script(script))
    }

    /// Load `file` and run its entry script.
    pub fn run_file(&mut self, file: &AbcFile) -> Result<Atom, VmError> {
        let unit = self.load(file)?;
        self.run_entry(unit)
    }

    // ── Host calls into script ────────────────────────────────────────

    pub fn call(&mut self, function: &Atom, this: Atom, args: &[Atom]) -> Result<Atom, VmError> {
        self.host_entry(|vm| vm.call_value(function, this, args))
    }

    pub fn construct(&mut self, class: &Atom, args: &[Atom]) -> Result<Atom, VmError> {
        self.host_entry(|vm| vm.construct_value(class, args))
    }

    pub fn get_property(&mut self, receiver: &Atom, name: &Multiname) -> Result<Atom, VmError> {
        self.host_entry(|vm| vm.get_prop(receiver, name))
    }

    pub fn set_property(
        &mut self,
        receiver: &Atom,
        name: &Multiname,
        value: Atom,
    ) -> Result<(), VmError> {
        self.host_entry(|vm| vm.set_prop(receiver, name, value))
    }

    pub fn call_property(
        &mut self,
        receiver: &Atom,
        name: &Multiname,
        args: &[Atom],
    ) -> Result<Atom, VmError> {
        self.host_entry(|vm| vm.call_prop(receiver, name, args, false))
    }

    /// Look up a definition by its dotted name (`"flash.utils.Timer"`,
    /// `"Point"`), running its script initializer when needed.
    pub fn get_definition(&mut self, name: &str) -> Result<Atom, VmError> {
        let (package, local) = match name.rfind('.') {
            Some(at) => (&name[..at], &name[at + 1..]),
            None => ("", name),
        };
        let mn = Multiname::qname(
            Namespace::package(self.strings.intern(package)),
            self.strings.intern(local),
        );
        self.host_entry(|vm| match vm.find_definition(&mn)? {
            Some(value) => Ok(value),
            None => Err(vm.throw(ErrorKind::ReferenceError, 1065, &[name])),
        })
    }

    /// The string conversion of `value`, running `toString` on objects.
    pub fn to_display_string(&mut self, value: &Atom) -> Result<String, VmError> {
        self.host_entry(|vm| {
            let id = vm.to_string_id(value)?;
            Ok(vm.strings.get(id).to_string())
        })
    }

    pub fn new_string(&self, text: &str) -> Atom {
        Atom::String(self.strings.intern(text))
    }

    /// A fresh array holding `items`.
    pub fn new_array(&mut self, items: Vec<Atom>) -> Atom {
        Atom::Object(self.alloc_array(items))
    }

    fn host_entry<R>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<R, VmError>,
    ) -> Result<R, VmError> {
        if self.depth == 0 {
            self.budget = self.settings.instruction_budget;
        }
        f(self)
    }

    // ── Host hooks ────────────────────────────────────────────────────

    /// Flag that stops running script code at the next backward branch or
    /// call. Stays raised until the host lowers it.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Receive the text of every `trace()` call instead of stdout.
    pub fn set_trace_output(&mut self, sink: impl FnMut(&str) + 'static) {
        self.trace_output = Some(Box::new(sink));
    }

    pub fn set_uncaught_handler(&mut self, handler: impl FnMut(&UncaughtError) + 'static) {
        self.uncaught = Some(Box::new(handler));
    }

    pub(crate) fn emit_trace(&mut self, text: &str) {
        info!(target: "avm2::trace", "{text}");
        match &mut self.trace_output {
            Some(sink) => sink(text),
            None => println!("{text}"),
        }
    }

    pub(crate) fn report_uncaught(&mut self, error: &UncaughtError) {
        match &mut self.uncaught {
            Some(handler) => handler(error),
            None => error!("uncaught {error}"),
        }
    }

    // ── Heap ──────────────────────────────────────────────────────────

    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats()
    }

    pub fn collect_cycles(&self) -> CycleReport {
        self.heap.collect_cycles()
    }

    /// Run the heap's collection policy; for quiescent points only.
    pub fn maybe_collect(&self) -> Option<CycleReport> {
        self.heap.maybe_collect()
    }

    /// Mark a long-lived object as exempt from counting.
    pub(crate) fn pin(&self, object: &ObjectRef) {
        self.heap.make_constant(object);
    }
}

impl Drop for Vm {
    fn drop(&mut self) {
        // Break every remaining cycle, constants included, before the
        // tables holding handles are dropped.
        self.heap.sweep();
    }
}
