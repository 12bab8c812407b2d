//! The event queue: the only way code outside the VM thread gets script
//! code to run.
//!
//! Any number of producers push events into an [`EventQueue`]. A single
//! consumer thread owned by an [`EventLoop`] takes them in submission
//! order and runs each one to completion on its [`Vm`] before looking at
//! the next. Every accepted event is fenced exactly once: its callback
//! receives the [`Outcome`], including events that shutdown throws away.

use std::{
    collections::VecDeque,
    fmt, io,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc,
    },
    thread::{self, JoinHandle, ThreadId},
};

use log::{debug, info, warn};
use object::{Atom, Multiname};
use parking_lot::{Condvar, Mutex};

use crate::{EventLoopSettings, ShutdownMode, UncaughtError, UnitHandle, Vm, VmError};

pub type Task = Box<dyn FnOnce(&mut Vm) -> Result<Atom, VmError> + Send>;

/// Callback receiving the outcome of one event.
pub type Fence = Box<dyn FnOnce(Outcome) + Send>;

/// Work for the VM thread.
pub enum Event {
    /// Run the entry script of a loaded unit.
    RunEntry(UnitHandle),
    Call {
        function: Atom,
        this: Atom,
        args: Vec<Atom>,
    },
    /// `target[name](args...)`.
    Dispatch {
        target: Atom,
        name: Multiname,
        args: Vec<Atom>,
    },
    Construct {
        class: Atom,
        args: Vec<Atom>,
    },
    /// Arbitrary host code with exclusive access to the VM.
    Task(Task),
}

impl Event {
    pub fn task(f: impl FnOnce(&mut Vm) -> Result<Atom, VmError> + Send + 'static) -> Self {
        Event::Task(Box::new(f))
    }

    fn kind(&self) -> &'static str {
        match self {
            Event::RunEntry(_) => "run-entry",
            Event::Call { .. } => "call",
            Event::Dispatch { .. } => "dispatch",
            Event::Construct { .. } => "construct",
            Event::Task(_) => "task",
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// How an event ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    /// An error escaped the event's outermost activation.
    Uncaught(UncaughtError),
    /// Never ran to completion: rejected, dropped at shutdown, or
    /// cancelled while running.
    Discarded,
}

struct Queued {
    event: Event,
    fence: Option<Fence>,
}

impl Queued {
    fn fence(self, outcome: Outcome) {
        if let Some(fence) = self.fence {
            fence(outcome);
        }
    }
}

struct QueueState {
    events: VecDeque<Queued>,
    closed: bool,
    mode: ShutdownMode,
}

struct Shared {
    state: Mutex<QueueState>,
    ready: Condvar,
    consumer: OnceLock<ThreadId>,
    /// Cancellation flag of the consumer's VM, once it exists.
    cancel: OnceLock<Arc<AtomicBool>>,
    rejected: AtomicUsize,
}

/// Producer handle of an event loop. Cheap to clone and `Send`.
#[derive(Clone)]
pub struct EventQueue {
    shared: Arc<Shared>,
}

impl EventQueue {
    fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState {
                    events: VecDeque::new(),
                    closed: false,
                    mode: ShutdownMode::Drain,
                }),
                ready: Condvar::new(),
                consumer: OnceLock::new(),
                cancel: OnceLock::new(),
                rejected: AtomicUsize::new(0),
            }),
        }
    }

    fn push(&self, queued: Queued) -> Result<(), Queued> {
        let mut state = self.shared.state.lock();
        if state.closed {
            drop(state);
            self.shared.rejected.fetch_add(1, Ordering::Relaxed);
            warn!("event loop is shutting down; rejected {:?}", queued.event);
            return Err(queued);
        }
        state.events.push_back(queued);
        drop(state);
        self.shared.ready.notify_one();
        Ok(())
    }

    /// Append `event`. `false` when the loop has begun shutting down.
    pub fn submit(&self, event: Event) -> bool {
        self.push(Queued { event, fence: None }).is_ok()
    }

    /// Append `event` with a fence. A rejected event is fenced with
    /// [`Outcome::Discarded`] right away.
    pub fn submit_with_fence(
        &self,
        event: Event,
        fence: impl FnOnce(Outcome) + Send + 'static,
    ) -> bool {
        let queued = Queued {
            event,
            fence: Some(Box::new(fence)),
        };
        match self.push(queued) {
            Ok(()) => true,
            Err(rejected) => {
                rejected.fence(Outcome::Discarded);
                false
            }
        }
    }

    /// Append `event` and block until it is fenced. Returns `None` on the
    /// consumer thread itself, which would otherwise wait for itself.
    pub fn submit_and_wait(&self, event: Event) -> Option<Outcome> {
        if self.is_consumer_thread() {
            warn!("submit_and_wait called on the event thread; refusing {event:?}");
            return None;
        }
        let done = Arc::new((Mutex::new(None::<Outcome>), Condvar::new()));
        let signal = Arc::clone(&done);
        self.submit_with_fence(event, move |outcome| {
            let (slot, cond) = &*signal;
            *slot.lock() = Some(outcome);
            cond.notify_all();
        });
        let (slot, cond) = &*done;
        let mut slot = slot.lock();
        while slot.is_none() {
            cond.wait(&mut slot);
        }
        slot.take()
    }

    /// Events accepted but not yet taken by the consumer.
    pub fn len(&self) -> usize {
        self.shared.state.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    pub fn is_consumer_thread(&self) -> bool {
        self.shared.consumer.get() == Some(&thread::current().id())
    }

    fn close(&self, mode: ShutdownMode) {
        let remaining = {
            let mut state = self.shared.state.lock();
            state.closed = true;
            state.mode = mode;
            state.events.len()
        };
        if mode == ShutdownMode::Discard {
            if let Some(cancel) = self.shared.cancel.get() {
                cancel.store(true, Ordering::Relaxed);
            }
            if remaining > 0 {
                warn!("{remaining} events missing before exit");
            }
        }
        self.shared.ready.notify_all();
    }

    /// The next event for the consumer, and whether it must be discarded.
    /// `None` once the queue is closed and empty.
    fn next(&self) -> Option<(Queued, bool)> {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(queued) = state.events.pop_front() {
                let discard = state.closed && state.mode == ShutdownMode::Discard;
                return Some((queued, discard));
            }
            if state.closed {
                return None;
            }
            self.shared.ready.wait(&mut state);
        }
    }
}

/// Counts of what the consumer did with the events it saw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopReport {
    pub completed: usize,
    pub uncaught: usize,
    pub discarded: usize,
    /// Submissions refused after shutdown began.
    pub rejected: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    #[error("cannot start the event thread: {0}")]
    Spawn(#[from] io::Error),
    #[error("cannot create the vm: {0}")]
    Vm(#[from] VmError),
    #[error("the event thread panicked")]
    Panicked,
}

impl Vm {
    /// Run one event to completion on this VM.
    pub fn dispatch(&mut self, event: Event) -> Outcome {
        debug!("dispatching {event:?}");
        let result = match event {
            Event::RunEntry(unit) => self.run_entry(unit),
            Event::Call {
                function,
                this,
                args,
            } => self.call(&function, this, &args),
            Event::Dispatch { target, name, args } => self.call_property(&target, &name, &args),
            Event::Construct { class, args } => self.construct(&class, &args),
            Event::Task(task) => task(self),
        };
        match result {
            Ok(_) => Outcome::Completed,
            Err(err) => match self.describe_uncaught(&err) {
                Some(uncaught) => {
                    self.report_uncaught(&uncaught);
                    Outcome::Uncaught(uncaught)
                }
                None => Outcome::Discarded,
            },
        }
    }
}

fn consume(queue: &EventQueue, vm: &mut Vm) -> LoopReport {
    let mut report = LoopReport::default();
    while let Some((queued, discard)) = queue.next() {
        if discard {
            report.discarded += 1;
            queued.fence(Outcome::Discarded);
            continue;
        }
        let Queued { event, fence } = queued;
        let outcome = vm.dispatch(event);
        match &outcome {
            Outcome::Completed => report.completed += 1,
            Outcome::Uncaught(_) => report.uncaught += 1,
            Outcome::Discarded => report.discarded += 1,
        }
        if let Some(fence) = fence {
            fence(outcome);
        }
        if let Some(cycles) = vm.maybe_collect() {
            debug!("collected cycles between events: {cycles:?}");
        }
    }
    report.rejected = queue.shared.rejected.load(Ordering::Relaxed);
    report
}

/// A consumer thread running events on its own VM.
pub struct EventLoop {
    queue: EventQueue,
    handle: Option<JoinHandle<LoopReport>>,
    shutdown: ShutdownMode,
}

impl EventLoop {
    /// Start the consumer thread. The VM is built by `factory` on that
    /// thread and never leaves it.
    pub fn spawn<F>(settings: EventLoopSettings, factory: F) -> Result<Self, LoopError>
    where
        F: FnOnce() -> Result<Vm, VmError> + Send + 'static,
    {
        let queue = EventQueue::new();
        let consumer = queue.clone();
        let (started_tx, started_rx) = mpsc::sync_channel(1);
        let handle = thread::Builder::new()
            .name(settings.thread_name.clone())
            .stack_size(settings.stack_size)
            .spawn(move || {
                let _ = consumer.shared.consumer.set(thread::current().id());
                let mut vm = match factory() {
                    Ok(vm) => vm,
                    Err(err) => {
                        consumer.close(ShutdownMode::Discard);
                        let _ = started_tx.send(Err(err));
                        return LoopReport::default();
                    }
                };
                let _ = consumer.shared.cancel.set(vm.cancel_flag());
                let _ = started_tx.send(Ok(()));
                info!("event loop started");
                let report = consume(&consumer, &mut vm);
                info!("event loop stopped: {report:?}");
                report
            })?;

        match started_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                queue,
                handle: Some(handle),
                shutdown: settings.shutdown,
            }),
            Ok(Err(err)) => {
                let _ = handle.join();
                Err(LoopError::Vm(err))
            }
            Err(_) => {
                let _ = handle.join();
                Err(LoopError::Panicked)
            }
        }
    }

    pub fn queue(&self) -> EventQueue {
        self.queue.clone()
    }

    /// Stop accepting events, finish according to `mode` and join the
    /// consumer.
    pub fn shutdown(mut self, mode: ShutdownMode) -> Result<LoopReport, LoopError> {
        self.stop(mode)
    }

    fn stop(&mut self, mode: ShutdownMode) -> Result<LoopReport, LoopError> {
        self.queue.close(mode);
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| LoopError::Panicked),
            None => Ok(LoopReport::default()),
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let mode = self.shutdown;
            if let Err(err) = self.stop(mode) {
                warn!("event loop shutdown failed: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VmSettings;

    fn spawn() -> EventLoop {
        EventLoop::spawn(EventLoopSettings::default(), || Vm::new(VmSettings::default()))
            .expect("event loop")
    }

    #[test]
    fn events_run_in_submission_order() {
        let events = spawn();
        let queue = events.queue();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..10 {
            let seen = Arc::clone(&seen);
            queue.submit(Event::task(move |_| {
                seen.lock().push(i);
                Ok(Atom::Undefined)
            }));
        }
        let report = events.shutdown(ShutdownMode::Drain).expect("shutdown");
        assert_eq!(report.completed, 10);
        assert_eq!(*seen.lock(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn waiting_on_the_consumer_thread_is_refused() {
        let events = spawn();
        let queue = events.queue();
        let inner = queue.clone();
        let outcome = queue.submit_and_wait(Event::task(move |_| {
            let nested = inner.submit_and_wait(Event::task(|_| Ok(Atom::Undefined)));
            assert_eq!(nested, None);
            Ok(Atom::Undefined)
        }));
        assert_eq!(outcome, Some(Outcome::Completed));
    }

    #[test]
    fn rejected_events_are_fenced_as_discarded() {
        let events = spawn();
        let queue = events.queue();
        events.shutdown(ShutdownMode::Drain).expect("shutdown");
        let fenced = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&fenced);
        let accepted = queue.submit_with_fence(Event::task(|_| Ok(Atom::Undefined)), move |o| {
            *slot.lock() = Some(o);
        });
        assert!(!accepted);
        assert_eq!(*fenced.lock(), Some(Outcome::Discarded));
        assert!(queue.is_closed());
    }

    #[test]
    fn rejected_events_release_their_values_on_the_producer() {
        let events = spawn();
        let queue = events.queue();
        let stash = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&stash);
        let made = queue.submit_and_wait(Event::task(move |vm| {
            let array = vm.new_array(vec![Atom::Int(1)]);
            *slot.lock() = Some(array);
            Ok(Atom::Undefined)
        }));
        assert_eq!(made, Some(Outcome::Completed));
        events.shutdown(ShutdownMode::Drain).expect("shutdown");

        let array = stash.lock().take().expect("stashed array");
        let accepted = queue.submit(Event::Call {
            function: array.clone(),
            this: Atom::Null,
            args: vec![array],
        });
        assert!(!accepted);
    }

    #[test]
    fn uncaught_errors_do_not_stop_the_loop() {
        let events = spawn();
        let queue = events.queue();
        let failed = queue.submit_and_wait(Event::task(|vm| {
            Err(vm.throw(crate::ErrorKind::TypeError, 1009, &[]))
        }));
        match failed {
            Some(Outcome::Uncaught(error)) => {
                assert_eq!(error.class_name, "TypeError");
                assert_eq!(error.error_id, Some(1009));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        let next = queue.submit_and_wait(Event::task(|_| Ok(Atom::Undefined)));
        assert_eq!(next, Some(Outcome::Completed));
        let report = events.shutdown(ShutdownMode::Drain).expect("shutdown");
        assert_eq!(report.uncaught, 1);
        assert_eq!(report.completed, 1);
    }

    #[test]
    fn discard_fences_pending_events_without_running_them() {
        let events = spawn();
        let queue = events.queue();
        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        let blocker = Arc::clone(&gate);
        // Hold the consumer until everything else is queued.
        queue.submit(Event::task(move |_| {
            let (open, cond) = &*blocker;
            let mut open = open.lock();
            while !*open {
                cond.wait(&mut open);
            }
            Ok(Atom::Undefined)
        }));
        let ran = Arc::new(AtomicUsize::new(0));
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..3 {
            let ran = Arc::clone(&ran);
            let outcomes = Arc::clone(&outcomes);
            queue.submit_with_fence(
                Event::task(move |_| {
                    ran.fetch_add(1, Ordering::Relaxed);
                    Ok(Atom::Undefined)
                }),
                move |o| outcomes.lock().push(o),
            );
        }
        queue.close(ShutdownMode::Discard);
        {
            let (open, cond) = &*gate;
            *open.lock() = true;
            cond.notify_all();
        }
        let report = events.shutdown(ShutdownMode::Discard).expect("shutdown");
        assert_eq!(ran.load(Ordering::Relaxed), 0);
        assert_eq!(report.discarded, 3);
        assert_eq!(*outcomes.lock(), vec![Outcome::Discarded; 3]);
    }

    #[test]
    fn queue_depth_is_observable() {
        let queue = EventQueue::new();
        assert!(queue.is_empty());
        queue.submit(Event::task(|_| Ok(Atom::Undefined)));
        queue.submit(Event::task(|_| Ok(Atom::Undefined)));
        assert_eq!(queue.len(), 2);
        assert!(!queue.is_consumer_thread());
    }
}
