//! Host-facing debug session over a remote PowerPC target.
//!
//! The [`Debugger`] owns one attached process at a time. Asynchronous agent
//! notifications are pushed as raw buffers into a [`NotificationSink`] by the
//! transport; translation, breakpoint bookkeeping and resume logic all run on
//! the host's polling thread inside [`Debugger::get_debug_event`].

pub mod address;
pub mod breakpoint;
pub mod error;
pub mod event;
pub mod register;
pub mod remote;
pub mod step;
pub mod translate;
pub mod watchpoint;

use crate::debugger::address::{RemoteAddress, USER_IMAGE_BASE};
use crate::debugger::breakpoint::BreakpointRegistry;
use crate::debugger::error::{BptError, Error};
use crate::debugger::event::{DebugEvent, EventKind, EventQueue, ModuleDescr, QueuePos};
use crate::debugger::register::{
    decode_slot, encode_slot, Register, RegisterValue,
};
use crate::debugger::remote::{
    LoadFlags, MemoryRegion, Pid, ProcessInfo, RemoteClient, ThreadInfo, Tid,
};
use crate::debugger::step::StepMode;
use crate::debugger::translate::{ResumeAction, SessionFlags, TranslateCtx, Translator};
use crate::debugger::watchpoint::{AccessKind, WatchpointSlot};
use crate::{muted_error, pb_info, weak_error};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Thread-safe inbox for raw notification buffers.
///
/// The transport callback is the producer and must do nothing else with the
/// session; everything stateful happens on the consumer side.
#[derive(Debug, Clone, Default)]
pub struct NotificationSink(Arc<Mutex<VecDeque<Vec<u8>>>>);

impl NotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, raw: Vec<u8>) {
        self.lock().push_back(raw);
    }

    fn drain(&self) -> Vec<Vec<u8>> {
        self.lock().drain(..).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Vec<u8>>> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Breakpoint kinds the host may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointKind {
    Software,
    /// Hardware execution breakpoint. The target has no instruction address
    /// breakpoint register; feasibility checks reject the kind, but a request
    /// that arrives anyway is granted as a trap word.
    HardwareExec,
    Write,
    ReadWrite,
}

/// One entry of a host breakpoint update batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakpointRequest {
    pub kind: BreakpointKind,
    pub address: RemoteAddress,
    /// Original instruction bytes, filled in when a software breakpoint is
    /// granted.
    pub orig_bytes: Option<[u8; 4]>,
}

impl BreakpointRequest {
    pub fn new(kind: BreakpointKind, address: RemoteAddress) -> Self {
        BreakpointRequest {
            kind,
            address,
            orig_bytes: None,
        }
    }
}

/// Debug session facade, generic over the agent transport.
pub struct Debugger<C: RemoteClient> {
    client: C,
    pid: Option<Pid>,
    sink: NotificationSink,
    queue: EventQueue,
    translator: Translator,
    breakpoints: BreakpointRegistry,
    watch: WatchpointSlot,
    flags: SessionFlags,
}

impl<C: RemoteClient> Debugger<C> {
    /// Connect to the agent and build an idle session.
    pub fn new(mut client: C) -> Result<Self, Error> {
        client.connect().map_err(|_| Error::Disconnected)?;
        Ok(Debugger {
            client,
            pid: None,
            sink: NotificationSink::new(),
            queue: EventQueue::new(),
            translator: Translator::new(),
            breakpoints: BreakpointRegistry::new(),
            watch: WatchpointSlot::new(),
            flags: SessionFlags::default(),
        })
    }

    /// Handle for the transport to deliver raw notification buffers into.
    pub fn notification_sink(&self) -> NotificationSink {
        self.sink.clone()
    }

    /// Direct access to the underlying agent client.
    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    pub fn shutdown(mut self) {
        muted_error!(
            self.client
                .disconnect()
                .map_err(|_| Error::Disconnected),
            "shutdown:"
        );
    }

    pub fn list_processes(&mut self) -> Result<Vec<ProcessInfo>, Error> {
        self.client
            .list_processes()
            .map_err(|e| Error::Remote("list_processes", e))
    }

    pub fn list_threads(&mut self) -> Result<Vec<ThreadInfo>, Error> {
        let pid = self.pid()?;
        self.client
            .list_threads(pid)
            .map_err(|e| Error::Remote("list_threads", e))
    }

    /// Reset the target and load an executable under debugger control.
    ///
    /// No event is produced; the caller attaches to the returned pid to start
    /// receiving them.
    pub fn start_process(
        &mut self,
        path: &str,
        args: &str,
        workdir: &str,
        flags: LoadFlags,
    ) -> Result<Pid, Error> {
        if self.pid.is_some() {
            return Err(Error::AlreadyAttached);
        }
        let pid = self
            .client
            .load_process(path, args, workdir, flags)
            .map_err(|e| Error::Remote("load_process", e))?;
        pb_info!(target: "bridge", "loaded `{path}` as process {pid}");
        Ok(pid)
    }

    /// Attach to a running process and replay its current state as a
    /// choreographed event sequence: process start, one event per live
    /// thread, one per loaded module, then the attach confirmation.
    pub fn attach(&mut self, pid: Pid) -> Result<(), Error> {
        if self.pid.is_some() {
            return Err(Error::AlreadyAttached);
        }
        self.client
            .attach_process(pid)
            .map_err(|e| Error::Remote("attach_process", e))?;
        weak_error!(
            self.client
                .stop_process(pid)
                .map_err(|e| Error::Remote("stop_process", e)),
            "attach:"
        );

        // trap words surviving from a previous session must not fire into
        // this one
        if let Ok(stale) = self.client.list_traps(pid, None) {
            for addr in stale {
                muted_error!(
                    self.client
                        .clear_trap(pid, None, addr)
                        .map_err(|e| Error::Remote("clear_trap", e)),
                    "stale trap:"
                );
            }
        }

        let image = weak_error!(
            self.client
                .list_processes()
                .map_err(|e| Error::Remote("list_processes", e))
        )
        .unwrap_or_default()
        .into_iter()
        .find(|p| p.pid == pid)
        .map(|p| p.path)
        .unwrap_or_default();
        let modules = weak_error!(
            self.client
                .list_modules(pid)
                .map_err(|e| Error::Remote("list_modules", e))
        )
        .unwrap_or_default();
        let threads = weak_error!(
            self.client
                .list_threads(pid)
                .map_err(|e| Error::Remote("list_threads", e))
        )
        .unwrap_or_default();

        let base = RemoteAddress::from(USER_IMAGE_BASE as u32);
        let main = ModuleDescr {
            name: image,
            base,
            size: modules.first().map(|m| m.size).unwrap_or_default(),
            rebase_to: Some(base),
        };

        self.queue
            .enqueue(DebugEvent::process_started(pid, main.clone()), QueuePos::Back);
        for thread in &threads {
            let pc = self.read_pc(pid, thread.tid);
            self.queue
                .enqueue(DebugEvent::thread_started(pid, thread.tid, pc), QueuePos::Back);
        }
        for module in &modules {
            let name = format!("{} - {}", module.elf_name, module.name);
            self.translator.record_module(module.id, name.clone());
            self.queue.enqueue(
                DebugEvent::module_loaded(
                    pid,
                    None,
                    ModuleDescr {
                        name,
                        base: module.base,
                        size: module.size,
                        rebase_to: None,
                    },
                ),
                QueuePos::Back,
            );
        }
        self.queue
            .enqueue(DebugEvent::process_attached(pid, main), QueuePos::Back);

        self.pid = Some(pid);
        pb_info!(target: "bridge", "attached to process {pid}");
        Ok(())
    }

    /// Detach, restoring the target to an unpatched state.
    pub fn detach(&mut self) -> Result<(), Error> {
        let pid = self.pid()?;
        for addr in self.breakpoints.permanent_addresses() {
            weak_error!(
                self.breakpoints
                    .remove_software(&mut self.client, pid, addr),
                "detach:"
            );
        }
        if self.watch.armed_address().is_some() {
            weak_error!(self.watch.disarm(&mut self.client, pid), "detach:");
        }
        weak_error!(
            self.client
                .continue_process(pid)
                .map_err(|e| Error::Remote("continue_process", e)),
            "detach:"
        );
        weak_error!(
            self.client
                .detach_process(pid)
                .map_err(|e| Error::Remote("detach_process", e)),
            "detach:"
        );
        self.queue
            .enqueue(DebugEvent::process_detached(pid), QueuePos::Back);
        self.reset_session();
        Ok(())
    }

    /// Suspend the whole process on host request.
    pub fn request_pause(&mut self) -> Result<(), Error> {
        let pid = self.pid()?;
        self.client
            .stop_process(pid)
            .map_err(|e| Error::Remote("stop_process", e))?;
        self.queue
            .enqueue(DebugEvent::process_suspended(pid), QueuePos::Back);
        Ok(())
    }

    /// Kill the debuggee. The exit event arrives as a notification.
    pub fn exit_process(&mut self) -> Result<(), Error> {
        let pid = self.pid()?;
        self.client
            .terminate_process(pid)
            .map_err(|e| Error::Remote("terminate_process", e))?;
        Ok(())
    }

    /// Poll for the next debug event, translating buffered notifications.
    ///
    /// The duplicate-suppression scratch is cleared at the start of every
    /// drain pass; repeats are only folded within one pass.
    pub fn get_debug_event(&mut self, timeout: Duration) -> Result<Option<DebugEvent>, Error> {
        let deadline = Instant::now() + timeout;
        let mut kicked = false;
        loop {
            if let Some(pid) = self.pid {
                self.translator.clear_scratch();
                for raw in self.sink.drain() {
                    let mut ctx = TranslateCtx {
                        pid,
                        client: &mut self.client,
                        queue: &mut self.queue,
                        breakpoints: &mut self.breakpoints,
                        flags: &mut self.flags,
                        watch: &mut self.watch,
                    };
                    self.translator.process_buffer(&mut ctx, &raw);
                }
            }
            if let Some(event) = self.queue.retrieve() {
                return Ok(Some(event));
            }
            if !kicked {
                self.client.kick();
                kicked = true;
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Resume the target after the host handled `event`.
    ///
    /// Only stop-class events resume the process. A stop at one of our own
    /// breakpoints is resumed by lifting the trap, stepping past it with
    /// transient traps and re-arming; the watchpoint register gets the same
    /// park-step-restore treatment. Nothing happens while more events are
    /// pending, the host must consume them first.
    pub fn continue_after(&mut self, event: &DebugEvent) -> Result<(), Error> {
        let pid = self.pid()?;
        if !self.queue.is_empty() {
            return Ok(());
        }
        self.translator.clear_scratch();

        match &event.kind {
            EventKind::Breakpoint { hardware, .. } => {
                if hardware.is_some() {
                    self.watch.suspend(&mut self.client, pid)?;
                    if let Some(tid) = event.tid {
                        if self.flags.stepping != Some(tid) {
                            step::arm_step_traps(
                                &mut self.client,
                                &mut self.breakpoints,
                                pid,
                                tid,
                                StepMode::Into,
                            )?;
                        }
                        self.flags.resume = Some(ResumeAction::RestoreWatch);
                    }
                } else if let Some(addr) =
                    event.address.filter(|a| self.breakpoints.is_permanent(*a))
                {
                    self.breakpoints
                        .remove_software(&mut self.client, pid, addr)?;
                    if let Some(tid) = event.tid {
                        if self.flags.stepping != Some(tid) {
                            step::arm_step_traps(
                                &mut self.client,
                                &mut self.breakpoints,
                                pid,
                                tid,
                                StepMode::Into,
                            )?;
                        }
                    }
                    self.flags.resume = Some(ResumeAction::RestoreBreakpoint(addr));
                }
                self.client
                    .continue_process(pid)
                    .map_err(|e| Error::Remote("continue_process", e))?;
            }
            EventKind::Step
            | EventKind::ProcessAttached(_)
            | EventKind::ProcessSuspended => {
                self.client
                    .continue_process(pid)
                    .map_err(|e| Error::Remote("continue_process", e))?;
            }
            _ => {}
        }
        Ok(())
    }

    pub fn thread_suspend(&mut self, tid: Tid) -> Result<(), Error> {
        let pid = self.pid()?;
        self.client
            .stop_thread(pid, tid)
            .map_err(|e| Error::Remote("stop_thread", e))
    }

    pub fn thread_continue(&mut self, tid: Tid) -> Result<(), Error> {
        let pid = self.pid()?;
        self.client
            .continue_thread(pid, tid)
            .map_err(|e| Error::Remote("continue_thread", e))
    }

    /// Arm a single step for `tid`. The step actually begins on the next
    /// [`continue_after`](Self::continue_after).
    pub fn thread_set_step(&mut self, tid: Tid, mode: StepMode) -> Result<(), Error> {
        let pid = self.pid()?;
        step::arm_step_traps(&mut self.client, &mut self.breakpoints, pid, tid, mode)?;
        self.flags.stepping = Some(tid);
        Ok(())
    }

    /// Read every register selected by the class mask, in table order.
    pub fn read_registers(
        &mut self,
        tid: Tid,
        class_mask: u32,
    ) -> Result<Vec<(Register, RegisterValue)>, Error> {
        let pid = self.pid()?;
        let regs = Register::by_class_mask(class_mask);
        let slots = self
            .client
            .read_registers(pid, tid, &regs)
            .map_err(|e| Error::Remote("read_registers", e))?;
        Ok(regs
            .into_iter()
            .zip(slots.iter())
            .map(|(reg, slot)| (reg, decode_slot(reg, slot)))
            .collect())
    }

    pub fn write_register(
        &mut self,
        tid: Tid,
        reg: Register,
        value: RegisterValue,
    ) -> Result<(), Error> {
        let pid = self.pid()?;
        self.client
            .write_register(pid, tid, reg, encode_slot(reg, value))
            .map_err(|e| Error::Remote("write_register", e))
    }

    pub fn get_memory_map(&mut self) -> Result<Vec<MemoryRegion>, Error> {
        let pid = self.pid()?;
        self.client
            .memory_map(pid)
            .map_err(|e| Error::Remote("memory_map", e))
    }

    /// Read target memory with trap words masked back to the shadowed
    /// original instructions.
    pub fn read_memory(&mut self, addr: RemoteAddress, len: usize) -> Result<Vec<u8>, Error> {
        let pid = self.pid()?;
        let mut data = self
            .client
            .read_memory(pid, addr, len)
            .map_err(|e| Error::Remote("read_memory", e))?;
        self.breakpoints.mask_read(addr, &mut data);
        Ok(data)
    }

    /// Write target memory, keeping any armed trap words in place.
    pub fn write_memory(&mut self, addr: RemoteAddress, data: &[u8]) -> Result<(), Error> {
        let pid = self.pid()?;
        let mut outgoing = data.to_vec();
        self.breakpoints.absorb_write(addr, &mut outgoing);
        self.client
            .write_memory(pid, addr, &outgoing)
            .map_err(|e| Error::Remote("write_memory", e))
    }

    /// Advisory feasibility check for a breakpoint request.
    pub fn check_breakpoint_feasible(
        &self,
        kind: BreakpointKind,
        addr: RemoteAddress,
    ) -> Result<(), BptError> {
        match kind {
            BreakpointKind::Software => Ok(()),
            BreakpointKind::HardwareExec => Err(BptError::BadType),
            BreakpointKind::Write => self.watch.check(addr, Some(AccessKind::Write)),
            BreakpointKind::ReadWrite => self.watch.check(addr, Some(AccessKind::ReadWrite)),
        }
    }

    /// Apply a batch of breakpoint changes, removals first. Individual
    /// failures are logged and skipped; the returned pair counts granted
    /// additions and removals.
    pub fn update_breakpoints(
        &mut self,
        add: &mut [BreakpointRequest],
        del: &[BreakpointRequest],
    ) -> Result<(usize, usize), Error> {
        let pid = self.pid()?;

        let mut removed = 0;
        for req in del {
            let ok = match req.kind {
                BreakpointKind::Software | BreakpointKind::HardwareExec => weak_error!(
                    self.breakpoints
                        .remove_software(&mut self.client, pid, req.address),
                    "breakpoint removal:"
                )
                .is_some(),
                BreakpointKind::Write | BreakpointKind::ReadWrite => {
                    weak_error!(self.watch.disarm(&mut self.client, pid), "watch removal:")
                        .is_some()
                }
            };
            if ok {
                removed += 1;
            }
        }

        let mut added = 0;
        for req in add {
            match req.kind {
                BreakpointKind::Software | BreakpointKind::HardwareExec => {
                    if let Some(orig) = weak_error!(
                        self.breakpoints
                            .add_software(&mut self.client, pid, req.address),
                        "breakpoint add:"
                    ) {
                        req.orig_bytes = Some(orig);
                        added += 1;
                    }
                }
                BreakpointKind::Write | BreakpointKind::ReadWrite => {
                    let kind = if req.kind == BreakpointKind::Write {
                        AccessKind::Write
                    } else {
                        AccessKind::ReadWrite
                    };
                    if self.watch.check(req.address, Some(kind)).is_ok() {
                        if weak_error!(
                            self.watch.arm(&mut self.client, pid, req.address, kind),
                            "watch add:"
                        )
                        .is_some()
                        {
                            added += 1;
                        }
                    }
                }
            }
        }
        Ok((added, removed))
    }

    fn pid(&self) -> Result<Pid, Error> {
        self.pid.ok_or(Error::NoProcess)
    }

    fn read_pc(&mut self, pid: Pid, tid: Tid) -> Option<RemoteAddress> {
        let slots = weak_error!(
            self.client
                .read_registers(pid, tid, &[Register::Pc])
                .map_err(|e| Error::Remote("read_registers", e))
        )?;
        let slot = slots.first()?;
        RemoteAddress::map_canonical(decode_slot(Register::Pc, slot).as_u64()?)
    }

    fn reset_session(&mut self) {
        self.pid = None;
        self.translator = Translator::new();
        self.breakpoints = BreakpointRegistry::new();
        self.watch = WatchpointSlot::new();
        self.flags = SessionFlags::default();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::debugger::remote::mock::MockAgent;
    use crate::debugger::remote::ThreadState;

    const PID: Pid = 0x20;
    const TID: Tid = 0x11;

    fn attached_debugger() -> Debugger<MockAgent> {
        let mut agent = MockAgent::new();
        agent.add_process(PID, "/app_home/main.self");
        agent.add_thread(TID, ThreadState::Stop, "main");
        agent.set_register_u64(TID, Register::Pc, 0x10300);
        let mut debugger = Debugger::new(agent).unwrap();
        debugger.attach(PID).unwrap();
        debugger
    }

    fn drain(debugger: &mut Debugger<MockAgent>) -> Vec<DebugEvent> {
        let mut out = vec![];
        while let Some(ev) = debugger.get_debug_event(Duration::ZERO).unwrap() {
            out.push(ev);
        }
        out
    }

    #[test]
    fn test_attach_event_choreography() {
        let mut debugger = attached_debugger();
        let events = drain(&mut debugger);
        assert!(matches!(events[0].kind, EventKind::ProcessStarted(_)));
        assert!(matches!(events[1].kind, EventKind::ThreadStarted));
        assert_eq!(events[1].address, Some(0x10300.into()));
        assert!(matches!(
            events.last().unwrap().kind,
            EventKind::ProcessAttached(_)
        ));
    }

    #[test]
    fn test_process_started_does_not_resume_the_target() {
        let mut debugger = attached_debugger();
        let events = drain(&mut debugger);
        let started = events
            .iter()
            .find(|e| matches!(e.kind, EventKind::ProcessStarted(_)))
            .unwrap();

        let before = debugger.client_mut().calls.len();
        debugger.continue_after(started).unwrap();
        assert!(!debugger.client_mut().calls[before..]
            .iter()
            .any(|c| c.starts_with("continue_process")));
    }

    #[test]
    fn test_start_process_forwards_load_flags() {
        let mut debugger = Debugger::new(MockAgent::new()).unwrap();
        debugger
            .start_process("/app_home/main.self", "", "/app_home", LoadFlags(0))
            .unwrap();
        assert!(debugger
            .client_mut()
            .calls
            .iter()
            .any(|c| c == "load_process /app_home/main.self flags 0x0"));
    }

    #[test]
    fn test_double_attach_is_rejected() {
        let mut debugger = attached_debugger();
        assert!(matches!(
            debugger.attach(PID),
            Err(Error::AlreadyAttached)
        ));
    }

    #[test]
    fn test_detach_restores_breakpoints_and_reports() {
        let mut debugger = attached_debugger();
        drain(&mut debugger);
        debugger.write_memory(0x10300.into(), &0x3860_0001u32.to_be_bytes()).unwrap();
        let mut add = [BreakpointRequest::new(
            BreakpointKind::Software,
            0x10300.into(),
        )];
        debugger.update_breakpoints(&mut add, &[]).unwrap();

        debugger.detach().unwrap();
        let events = drain(&mut debugger);
        assert!(matches!(
            events.last().unwrap().kind,
            EventKind::ProcessDetached
        ));
        assert!(matches!(debugger.list_threads(), Err(Error::NoProcess)));
    }

    #[test]
    fn test_update_breakpoints_reports_counts_and_orig_bytes() {
        let mut debugger = attached_debugger();
        debugger.write_memory(0x10300.into(), &0x3860_0001u32.to_be_bytes()).unwrap();

        let mut add = [
            BreakpointRequest::new(BreakpointKind::Software, 0x10300.into()),
            BreakpointRequest::new(BreakpointKind::Write, 0x10308.into()),
        ];
        let (added, removed) = debugger.update_breakpoints(&mut add, &[]).unwrap();
        assert_eq!((added, removed), (2, 0));
        assert_eq!(add[0].orig_bytes, Some(0x3860_0001u32.to_be_bytes()));

        let del = add;
        let (added, removed) = debugger.update_breakpoints(&mut [], &del).unwrap();
        assert_eq!((added, removed), (0, 2));
    }

    #[test]
    fn test_feasibility_taxonomy() {
        let debugger = attached_debugger();
        assert!(debugger
            .check_breakpoint_feasible(BreakpointKind::Software, 0x10300.into())
            .is_ok());
        assert_eq!(
            debugger.check_breakpoint_feasible(BreakpointKind::HardwareExec, 0x10300.into()),
            Err(BptError::BadType)
        );
        assert_eq!(
            debugger.check_breakpoint_feasible(BreakpointKind::Write, 0x10302.into()),
            Err(BptError::BadAlign)
        );
    }

    #[test]
    fn test_masked_memory_reads() {
        let mut debugger = attached_debugger();
        debugger.write_memory(0x10300.into(), &0x3860_0001u32.to_be_bytes()).unwrap();
        let mut add = [BreakpointRequest::new(
            BreakpointKind::Software,
            0x10300.into(),
        )];
        debugger.update_breakpoints(&mut add, &[]).unwrap();

        let data = debugger.read_memory(0x10300.into(), 4).unwrap();
        assert_eq!(data, 0x3860_0001u32.to_be_bytes());
    }
}
