use crate::debugger::address::RemoteAddress;
use crate::debugger::remote::{Pid, Tid};
use std::collections::VecDeque;

/// Module description carried by load/attach events.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModuleDescr {
    pub name: String,
    pub base: RemoteAddress,
    pub size: u64,
    pub rebase_to: Option<RemoteAddress>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionDescr {
    pub code: u32,
    pub can_continue: bool,
    /// Address of the faulting instruction.
    pub address: Option<RemoteAddress>,
    pub description: String,
}

/// Payload of a normalized debug event, one active variant at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    ProcessStarted(ModuleDescr),
    ProcessAttached(ModuleDescr),
    ProcessDetached,
    ProcessSuspended,
    ProcessExited { exit_code: u64 },
    ThreadStarted,
    ThreadExited { exit_code: u64 },
    ModuleLoaded(ModuleDescr),
    ModuleUnloaded { name: String },
    Breakpoint {
        /// Address of the hardware watchpoint register on a watchpoint match.
        hardware: Option<RemoteAddress>,
        /// Kernel address of a software breakpoint, if distinct.
        kernel: Option<RemoteAddress>,
    },
    Step,
    Exception(ExceptionDescr),
    Information(String),
}

/// Normalized debug event, constructed once by the translator (or by a direct
/// host call such as detach), consumed exactly once by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugEvent {
    pub pid: Pid,
    pub tid: Option<Tid>,
    pub address: Option<RemoteAddress>,
    pub handled: bool,
    pub kind: EventKind,
}

impl DebugEvent {
    pub fn breakpoint(
        pid: Pid,
        tid: Tid,
        pc: RemoteAddress,
        hardware: Option<RemoteAddress>,
    ) -> Self {
        DebugEvent {
            pid,
            tid: Some(tid),
            address: Some(pc),
            handled: true,
            kind: EventKind::Breakpoint {
                hardware,
                kernel: None,
            },
        }
    }

    pub fn step(pid: Pid, tid: Tid, pc: RemoteAddress) -> Self {
        DebugEvent {
            pid,
            tid: Some(tid),
            address: Some(pc),
            handled: true,
            kind: EventKind::Step,
        }
    }

    pub fn exception(pid: Pid, tid: Tid, descr: ExceptionDescr) -> Self {
        DebugEvent {
            pid,
            tid: Some(tid),
            address: None,
            handled: true,
            kind: EventKind::Exception(descr),
        }
    }

    pub fn process_started(pid: Pid, module: ModuleDescr) -> Self {
        DebugEvent {
            pid,
            tid: None,
            address: None,
            handled: true,
            kind: EventKind::ProcessStarted(module),
        }
    }

    pub fn process_attached(pid: Pid, module: ModuleDescr) -> Self {
        DebugEvent {
            pid,
            tid: None,
            address: None,
            handled: true,
            kind: EventKind::ProcessAttached(module),
        }
    }

    pub fn process_detached(pid: Pid) -> Self {
        DebugEvent {
            pid,
            tid: None,
            address: None,
            handled: true,
            kind: EventKind::ProcessDetached,
        }
    }

    pub fn process_suspended(pid: Pid) -> Self {
        DebugEvent {
            pid,
            tid: None,
            address: None,
            handled: true,
            kind: EventKind::ProcessSuspended,
        }
    }

    pub fn process_exited(pid: Pid, exit_code: u64) -> Self {
        DebugEvent {
            pid,
            tid: None,
            address: None,
            handled: true,
            kind: EventKind::ProcessExited { exit_code },
        }
    }

    pub fn thread_started(pid: Pid, tid: Tid, pc: Option<RemoteAddress>) -> Self {
        DebugEvent {
            pid,
            tid: Some(tid),
            address: pc,
            handled: true,
            kind: EventKind::ThreadStarted,
        }
    }

    pub fn thread_exited(pid: Pid, tid: Tid) -> Self {
        DebugEvent {
            pid,
            tid: Some(tid),
            address: None,
            handled: true,
            kind: EventKind::ThreadExited { exit_code: 0 },
        }
    }

    pub fn module_loaded(pid: Pid, tid: Option<Tid>, module: ModuleDescr) -> Self {
        DebugEvent {
            pid,
            tid,
            address: None,
            handled: true,
            kind: EventKind::ModuleLoaded(module),
        }
    }

    pub fn module_unloaded(pid: Pid, tid: Option<Tid>, name: String) -> Self {
        DebugEvent {
            pid,
            tid,
            address: None,
            handled: true,
            kind: EventKind::ModuleUnloaded { name },
        }
    }
}

/// Where to insert a pending event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePos {
    /// Preempt already queued events. Reserved for priority injection,
    /// unused in the steady state.
    Front,
    Back,
}

/// Very simple storage for pending events.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: VecDeque<DebugEvent>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Save a pending event.
    pub fn enqueue(&mut self, event: DebugEvent, pos: QueuePos) {
        match pos {
            QueuePos::Front => self.events.push_front(event),
            QueuePos::Back => self.events.push_back(event),
        }
    }

    /// Retrieve a pending event, oldest first.
    pub fn retrieve(&mut self) -> Option<DebugEvent> {
        self.events.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_queue_is_fifo() {
        let mut queue = EventQueue::new();
        queue.enqueue(DebugEvent::process_suspended(1), QueuePos::Back);
        queue.enqueue(DebugEvent::process_detached(1), QueuePos::Back);

        assert_eq!(
            queue.retrieve().unwrap().kind,
            EventKind::ProcessSuspended
        );
        assert_eq!(queue.retrieve().unwrap().kind, EventKind::ProcessDetached);
        assert!(queue.retrieve().is_none());
    }

    #[test]
    fn test_front_insertion_preempts() {
        let mut queue = EventQueue::new();
        queue.enqueue(DebugEvent::process_suspended(1), QueuePos::Back);
        queue.enqueue(DebugEvent::process_exited(1, 0), QueuePos::Front);

        assert!(matches!(
            queue.retrieve().unwrap().kind,
            EventKind::ProcessExited { .. }
        ));
        assert_eq!(
            queue.retrieve().unwrap().kind,
            EventKind::ProcessSuspended
        );
    }
}
