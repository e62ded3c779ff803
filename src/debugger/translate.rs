//! Notification-to-event translation.
//!
//! Raw agent notifications arrive on the transport thread and are buffered;
//! this module runs on the polling thread and folds each notification into
//! zero or more normalized [`DebugEvent`]s. All breakpoint bookkeeping lives
//! here too, so the whole translation path is single threaded.

use crate::debugger::address::RemoteAddress;
use crate::debugger::breakpoint::BreakpointRegistry;
use crate::debugger::event::{DebugEvent, EventQueue, ExceptionDescr, ModuleDescr, QueuePos};
use crate::debugger::error::Error;
use crate::debugger::remote::notification::{self, Notification, NotifyKind};
use crate::debugger::remote::{ModuleId, Pid, RemoteClient, Tid};
use crate::debugger::watchpoint::WatchpointSlot;
use crate::{pb_debug, weak_error};
use std::collections::HashMap;

/// What to re-arm once the intermediate step of a resume completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeAction {
    /// A permanent breakpoint was lifted to get the pc off its trap word.
    RestoreBreakpoint(RemoteAddress),
    /// The watchpoint register was parked to step over the watched access.
    RestoreWatch,
}

/// Session bookkeeping shared between the translator and the resume
/// controller.
#[derive(Debug, Default)]
pub struct SessionFlags {
    /// Thread currently executing a host-requested single step.
    pub stepping: Option<Tid>,
    /// In-flight transparent resume; the next step trap completes it.
    pub resume: Option<ResumeAction>,
}

/// Disjoint borrows of the session state one translation pass mutates.
pub struct TranslateCtx<'a> {
    pub pid: Pid,
    pub client: &'a mut dyn RemoteClient,
    pub queue: &'a mut EventQueue,
    pub breakpoints: &'a mut BreakpointRegistry,
    pub flags: &'a mut SessionFlags,
    pub watch: &'a mut WatchpointSlot,
}

/// Exception class carried by a notification kind, if it is one.
fn exception_descr(kind: NotifyKind, pc: Option<RemoteAddress>) -> Option<ExceptionDescr> {
    let (can_continue, description) = match kind {
        NotifyKind::PrivilegeInstr => (false, "privilege instruction"),
        NotifyKind::Alignment => (false, "alignment interrupt"),
        NotifyKind::IllegalInstr => (false, "illegal instruction"),
        NotifyKind::TextHtabMiss => (false, "instruction storage interrupt"),
        NotifyKind::TextSlbMiss => (false, "instruction segment interrupt"),
        NotifyKind::DataHtabMiss => (false, "data storage interrupt"),
        NotifyKind::DataSlbMiss => (false, "data segment interrupt"),
        NotifyKind::FloatEnabled => (true, "floating point enabled exception"),
        _ => return None,
    };
    Some(ExceptionDescr {
        code: kind as u32,
        can_continue,
        address: pc,
        description: description.to_string(),
    })
}

/// Folds raw notifications into normalized events.
#[derive(Debug, Default)]
pub struct Translator {
    /// Scratch copy of the last trap-class notification. The agent delivers
    /// some trap and watch notifications twice; an exact repeat within one
    /// drain pass is dropped. Cleared at the start of every pass and after
    /// each resume.
    last: Option<Notification>,
    /// Known loaded modules, unload notifications only carry the id.
    modules: HashMap<ModuleId, String>,
}

impl Translator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear_scratch(&mut self) {
        self.last = None;
    }

    /// Remember a module name for later unload resolution. Populated from
    /// the module list walk at attach time and from load notifications.
    pub fn record_module(&mut self, id: ModuleId, name: String) {
        self.modules.insert(id, name);
    }

    /// Decode one raw buffer and fold every sub-event into the queue.
    pub fn process_buffer(&mut self, ctx: &mut TranslateCtx<'_>, data: &[u8]) {
        for n in notification::parse(data) {
            self.apply(ctx, n);
        }
    }

    pub fn apply(&mut self, ctx: &mut TranslateCtx<'_>, n: Notification) {
        let pc = RemoteAddress::map_canonical(n.pc);

        match n.kind {
            NotifyKind::Trap => {
                if self.suppress_repeat(n) {
                    return;
                }
                let Some(pc) = pc else {
                    pb_debug!(target: "bridge", "trap outside code space at {:#x}, dropped", n.pc);
                    return;
                };
                let host_step = ctx.flags.stepping == Some(n.tid);

                if let Some(action) = ctx.flags.resume.take() {
                    // intermediate step of a resume: re-arm what was lifted,
                    // then either surface the step the host asked for or
                    // silently keep the process running
                    ctx.breakpoints.clear_step(ctx.client, ctx.pid, n.tid);
                    match action {
                        ResumeAction::RestoreBreakpoint(addr) => {
                            weak_error!(
                                ctx.breakpoints.add_software(ctx.client, ctx.pid, addr),
                                "breakpoint restore:"
                            );
                        }
                        ResumeAction::RestoreWatch => {
                            weak_error!(
                                ctx.watch.restore(ctx.client, ctx.pid),
                                "watchpoint restore:"
                            );
                        }
                    }
                    if host_step {
                        ctx.flags.stepping = None;
                        ctx.queue
                            .enqueue(DebugEvent::step(ctx.pid, n.tid, pc), QueuePos::Back);
                    } else {
                        weak_error!(
                            ctx.client
                                .continue_process(ctx.pid)
                                .map_err(|e| Error::Remote("continue_process", e)),
                            "resume:"
                        );
                    }
                    return;
                }

                if host_step || ctx.breakpoints.step_set().contains(&pc) {
                    ctx.breakpoints.clear_step(ctx.client, ctx.pid, n.tid);
                    ctx.flags.stepping = None;
                    ctx.queue
                        .enqueue(DebugEvent::step(ctx.pid, n.tid, pc), QueuePos::Back);
                } else {
                    ctx.queue.enqueue(
                        DebugEvent::breakpoint(ctx.pid, n.tid, pc, None),
                        QueuePos::Back,
                    );
                }
            }
            NotifyKind::WatchMatch => {
                if self.suppress_repeat(n) {
                    return;
                }
                let pc = pc.unwrap_or_default();
                ctx.queue.enqueue(
                    DebugEvent::breakpoint(ctx.pid, n.tid, pc, ctx.watch.armed_address()),
                    QueuePos::Back,
                );
            }
            NotifyKind::ProcessCreate => {
                // attach choreography reports process start explicitly
                pb_debug!(target: "bridge", "process create notification, tid {:#x}", n.tid);
            }
            NotifyKind::ProcessExit => {
                ctx.queue
                    .enqueue(DebugEvent::process_exited(ctx.pid, n.aux), QueuePos::Back);
            }
            NotifyKind::ThreadCreate => {
                ctx.queue
                    .enqueue(DebugEvent::thread_started(ctx.pid, n.tid, pc), QueuePos::Back);
            }
            NotifyKind::ThreadExit => {
                ctx.queue
                    .enqueue(DebugEvent::thread_exited(ctx.pid, n.tid), QueuePos::Back);
            }
            NotifyKind::ModuleLoad => {
                let id = n.aux as ModuleId;
                let info = weak_error!(
                    ctx.client
                        .module_info(ctx.pid, id)
                        .map_err(|e| crate::debugger::error::Error::Remote("module_info", e)),
                    "module load dropped:"
                );
                if let Some(info) = info {
                    let name = format!("{} - {}", info.elf_name, info.name);
                    self.record_module(id, name.clone());
                    ctx.queue.enqueue(
                        DebugEvent::module_loaded(
                            ctx.pid,
                            Some(n.tid),
                            ModuleDescr {
                                name,
                                base: info.base,
                                size: info.size,
                                rebase_to: None,
                            },
                        ),
                        QueuePos::Back,
                    );
                }
            }
            NotifyKind::ModuleUnload => {
                let id = n.aux as ModuleId;
                // unknown ids still produce an event, just with no name
                let name = self.modules.remove(&id).unwrap_or_default();
                ctx.queue.enqueue(
                    DebugEvent::module_unloaded(ctx.pid, Some(n.tid), name),
                    QueuePos::Back,
                );
            }
            NotifyKind::Stop | NotifyKind::StopInit | NotifyKind::MemoryAccessTrap => {
                pb_debug!(
                    target: "bridge",
                    "informational notification {:?} (tid {:#x}, pc {:#x})",
                    n.kind,
                    n.tid,
                    n.pc
                );
            }
            _ => {
                if let Some(descr) = exception_descr(n.kind, pc) {
                    ctx.queue
                        .enqueue(DebugEvent::exception(ctx.pid, n.tid, descr), QueuePos::Back);
                }
            }
        }
    }

    fn suppress_repeat(&mut self, n: Notification) -> bool {
        if self.last == Some(n) {
            pb_debug!(target: "bridge", "duplicate {:?} notification suppressed", n.kind);
            return true;
        }
        self.last = Some(n);
        false
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::debugger::event::EventKind;
    use crate::debugger::remote::mock::MockAgent;
    use crate::debugger::remote::ModuleInfo;

    const PID: Pid = 0x20;
    const TID: Tid = 0x11;

    struct Session {
        agent: MockAgent,
        queue: EventQueue,
        breakpoints: BreakpointRegistry,
        flags: SessionFlags,
        watch: WatchpointSlot,
        translator: Translator,
    }

    impl Session {
        fn new() -> Self {
            Session {
                agent: MockAgent::new(),
                queue: EventQueue::new(),
                breakpoints: BreakpointRegistry::new(),
                flags: SessionFlags::default(),
                watch: WatchpointSlot::new(),
                translator: Translator::new(),
            }
        }

        fn apply(&mut self, n: Notification) {
            let mut ctx = TranslateCtx {
                pid: PID,
                client: &mut self.agent,
                queue: &mut self.queue,
                breakpoints: &mut self.breakpoints,
                flags: &mut self.flags,
                watch: &mut self.watch,
            };
            self.translator.apply(&mut ctx, n);
        }
    }

    fn trap(pc: u64) -> Notification {
        Notification {
            kind: NotifyKind::Trap,
            tid: TID,
            pc,
            aux: 0,
        }
    }

    #[test]
    fn test_trap_at_user_breakpoint() {
        let mut s = Session::new();
        s.agent.write_word(0x10300.into(), 0x3860_0001);
        s.breakpoints
            .add_software(&mut s.agent, PID, 0x10300.into())
            .unwrap();

        s.apply(trap(0x10300));
        let ev = s.queue.retrieve().unwrap();
        assert_eq!(ev.tid, Some(TID));
        assert_eq!(ev.address, Some(0x10300.into()));
        assert!(matches!(ev.kind, EventKind::Breakpoint { hardware: None, .. }));
    }

    #[test]
    fn test_duplicate_trap_suppressed_until_scratch_clear() {
        let mut s = Session::new();
        s.apply(trap(0x10300));
        s.apply(trap(0x10300));
        assert_eq!(s.queue.len(), 1);

        // a new drain pass clears the scratch, the next delivery is genuine
        s.queue.retrieve();
        s.translator.clear_scratch();
        s.apply(trap(0x10300));
        assert_eq!(s.queue.len(), 1);
    }

    #[test]
    fn test_step_trap_retracts_transient_breakpoints() {
        let mut s = Session::new();
        s.agent.write_word(0x10304.into(), 0x3860_0001);
        s.agent.write_word(0x10320.into(), 0x3860_0002);
        s.breakpoints
            .add_step(&mut s.agent, PID, TID, 0x10304.into())
            .unwrap();
        s.breakpoints
            .add_step(&mut s.agent, PID, TID, 0x10320.into())
            .unwrap();
        s.flags.stepping = Some(TID);

        s.apply(trap(0x10304));

        let ev = s.queue.retrieve().unwrap();
        assert_eq!(ev.kind, EventKind::Step);
        assert_eq!(ev.address, Some(0x10304.into()));
        assert_eq!(s.flags.stepping, None);
        assert!(s.breakpoints.step_set().is_empty());
        // both transient traps are gone from target memory
        assert_eq!(s.agent.trapped_addresses(), vec![]);
    }

    #[test]
    fn test_transparent_resume_over_lifted_breakpoint() {
        let mut s = Session::new();
        s.agent.write_word(0x10300.into(), 0x3860_0001);
        s.agent.write_word(0x10304.into(), 0x3860_0002);
        // breakpoint lifted by the resume controller, step trap at pc+4
        s.breakpoints
            .add_step(&mut s.agent, PID, TID, 0x10304.into())
            .unwrap();
        s.flags.resume = Some(ResumeAction::RestoreBreakpoint(0x10300.into()));

        s.apply(trap(0x10304));

        // no event surfaces, the breakpoint is back and the process runs on
        assert!(s.queue.is_empty());
        assert_eq!(s.flags.resume, None);
        assert_eq!(s.agent.trapped_addresses(), vec![0x10300.into()]);
        assert!(s
            .agent
            .calls
            .iter()
            .any(|c| c == &format!("continue_process {PID}")));
    }

    #[test]
    fn test_resume_with_pending_host_step_surfaces_the_step() {
        let mut s = Session::new();
        s.agent.write_word(0x10300.into(), 0x3860_0001);
        s.breakpoints
            .add_step(&mut s.agent, PID, TID, 0x10304.into())
            .unwrap();
        s.flags.resume = Some(ResumeAction::RestoreBreakpoint(0x10300.into()));
        s.flags.stepping = Some(TID);

        s.apply(trap(0x10304));

        let ev = s.queue.retrieve().unwrap();
        assert_eq!(ev.kind, EventKind::Step);
        assert_eq!(s.flags.stepping, None);
        assert_eq!(s.agent.trapped_addresses(), vec![0x10300.into()]);
    }

    #[test]
    fn test_watch_match_reports_armed_address() {
        let mut s = Session::new();
        s.watch
            .arm(
                &mut s.agent,
                PID,
                0x10310.into(),
                crate::debugger::watchpoint::AccessKind::Write,
            )
            .unwrap();

        s.apply(Notification {
            kind: NotifyKind::WatchMatch,
            tid: TID,
            pc: 0x10300,
            aux: 0,
        });
        let ev = s.queue.retrieve().unwrap();
        assert_eq!(
            ev.kind,
            EventKind::Breakpoint {
                hardware: Some(0x10310.into()),
                kernel: None,
            }
        );
    }

    #[test]
    fn test_exception_classification() {
        struct TestCase {
            kind: NotifyKind,
            descr: &'static str,
            can_continue: bool,
        }
        let test_cases = [
            TestCase {
                kind: NotifyKind::PrivilegeInstr,
                descr: "privilege instruction",
                can_continue: false,
            },
            TestCase {
                kind: NotifyKind::IllegalInstr,
                descr: "illegal instruction",
                can_continue: false,
            },
            TestCase {
                kind: NotifyKind::DataSlbMiss,
                descr: "data segment interrupt",
                can_continue: false,
            },
            TestCase {
                kind: NotifyKind::FloatEnabled,
                descr: "floating point enabled exception",
                can_continue: true,
            },
        ];

        for tc in test_cases {
            let mut s = Session::new();
            s.apply(Notification {
                kind: tc.kind,
                tid: TID,
                pc: 0x10300,
                aux: 0,
            });
            let ev = s.queue.retrieve().unwrap();
            match ev.kind {
                EventKind::Exception(descr) => {
                    assert_eq!(descr.description, tc.descr);
                    assert_eq!(descr.can_continue, tc.can_continue);
                    assert_eq!(descr.address, Some(0x10300.into()));
                }
                other => panic!("expected exception, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_module_load_and_unload() {
        let mut s = Session::new();
        s.agent.add_module(ModuleInfo {
            id: 3,
            elf_name: "liblv2.sprx".to_string(),
            name: "lv2 runtime".to_string(),
            base: 0x30000.into(),
            size: 0x8000,
        });

        s.apply(Notification {
            kind: NotifyKind::ModuleLoad,
            tid: TID,
            pc: 0,
            aux: 3,
        });
        let ev = s.queue.retrieve().unwrap();
        match ev.kind {
            EventKind::ModuleLoaded(descr) => {
                assert_eq!(descr.name, "liblv2.sprx - lv2 runtime");
                assert_eq!(descr.base, 0x30000.into());
            }
            other => panic!("expected module load, got {other:?}"),
        }

        s.apply(Notification {
            kind: NotifyKind::ModuleUnload,
            tid: TID,
            pc: 0,
            aux: 3,
        });
        assert_eq!(
            s.queue.retrieve().unwrap().kind,
            EventKind::ModuleUnloaded {
                name: "liblv2.sprx - lv2 runtime".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_module_unload_is_not_fatal() {
        let mut s = Session::new();
        s.apply(Notification {
            kind: NotifyKind::ModuleUnload,
            tid: TID,
            pc: 0,
            aux: 99,
        });
        assert_eq!(
            s.queue.retrieve().unwrap().kind,
            EventKind::ModuleUnloaded {
                name: String::new()
            }
        );
    }

    #[test]
    fn test_informational_notifications_produce_no_events() {
        let mut s = Session::new();
        for kind in [
            NotifyKind::Stop,
            NotifyKind::StopInit,
            NotifyKind::MemoryAccessTrap,
            NotifyKind::ProcessCreate,
        ] {
            s.apply(Notification {
                kind,
                tid: TID,
                pc: 0x10300,
                aux: 0,
            });
        }
        assert!(s.queue.is_empty());
    }

    #[test]
    fn test_process_exit_carries_code() {
        let mut s = Session::new();
        s.apply(Notification {
            kind: NotifyKind::ProcessExit,
            tid: TID,
            pc: 0,
            aux: 42,
        });
        assert_eq!(
            s.queue.retrieve().unwrap().kind,
            EventKind::ProcessExited { exit_code: 42 }
        );
    }
}
