use heap::HeapSettings;

/// Execution policy of a [`Vm`](crate::Vm).
#[derive(Debug, Clone)]
pub struct VmSettings {
    /// Deepest allowed nesting of script and native calls.
    pub max_recursion: usize,
    /// Instructions one event may execute. `None` means unbounded.
    pub instruction_budget: Option<u64>,
    /// Consult the native backend for eligible methods.
    pub native_code: bool,
    /// Log every dispatched instruction at `trace` level.
    pub trace_execution: bool,
    /// Largest `local_count` or `max_stack` a method body may declare.
    /// Bodies above it fail verification.
    pub max_frame_size: u32,
    pub heap: HeapSettings,
}

impl Default for VmSettings {
    fn default() -> Self {
        Self {
            max_recursion: 256,
            instruction_budget: None,
            native_code: true,
            trace_execution: false,
            max_frame_size: 65_535,
            heap: HeapSettings::default(),
        }
    }
}

impl VmSettings {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.max_recursion == 0 {
            return Err("max_recursion must be > 0");
        }
        if self.instruction_budget == Some(0) {
            return Err("instruction_budget must be > 0 when set");
        }
        if self.max_frame_size == 0 {
            return Err("max_frame_size must be > 0");
        }
        self.heap.validate()
    }
}

/// What happens to queued events when the event loop shuts down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownMode {
    /// Run every event that was accepted before shutdown.
    #[default]
    Drain,
    /// Fence remaining events without running them and cancel the script
    /// that is currently executing.
    Discard,
}

#[derive(Debug, Clone)]
pub struct EventLoopSettings {
    pub thread_name: String,
    /// Stack size of the consumer thread. Deep script recursion runs on it.
    pub stack_size: usize,
    /// Mode used when the loop is dropped without an explicit shutdown.
    pub shutdown: ShutdownMode,
}

impl Default for EventLoopSettings {
    fn default() -> Self {
        Self {
            thread_name: "avm2-events".to_owned(),
            stack_size: 16 * 1024 * 1024,
            shutdown: ShutdownMode::Drain,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(VmSettings::default().validate().is_ok());
    }

    #[test]
    fn zero_limits_are_rejected() {
        let settings = VmSettings {
            max_recursion: 0,
            ..VmSettings::default()
        };
        assert!(settings.validate().is_err());

        let settings = VmSettings {
            instruction_budget: Some(0),
            ..VmSettings::default()
        };
        assert!(settings.validate().is_err());

        let settings = VmSettings {
            max_frame_size: 0,
            ..VmSettings::default()
        };
        assert!(settings.validate().is_err());
    }
}
