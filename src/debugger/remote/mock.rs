//! In-memory [`RemoteClient`] for tests and offline development.
//!
//! Models the agent-side behavior the bridge relies on: trap installation
//! saves the original instruction word and restores it on removal, register
//! slots hold big-endian values, memory is sparse and zero-initialized.

use crate::debugger::address::RemoteAddress;
use crate::debugger::breakpoint::TRAP_OPCODE;
use crate::debugger::register::Register;
use crate::debugger::remote::{
    AgentError, AgentResult, LoadFlags, MemoryRegion, ModuleId, ModuleInfo, Pid, ProcessInfo,
    ProcessState, RemoteClient, ThreadInfo, ThreadState, Tid, REG_SLOT_LEN,
};
use std::collections::HashMap;

const ERR_NOT_FOUND: i32 = -2;

#[derive(Debug, Default)]
pub struct MockAgent {
    memory: HashMap<u32, u8>,
    regs: HashMap<(Tid, Register), [u8; REG_SLOT_LEN]>,
    traps: HashMap<RemoteAddress, u32>,
    processes: Vec<ProcessInfo>,
    threads: Vec<ThreadInfo>,
    modules: Vec<ModuleInfo>,
    regions: Vec<MemoryRegion>,
    /// Last value programmed into the data-address watchpoint register.
    pub data_watch: Option<u64>,
    /// Whole-process run state, flipped by stop/continue calls.
    pub state: ProcessState,
    /// Mutating agent calls in arrival order, for test assertions.
    pub calls: Vec<String>,
    pub connected: bool,
}

impl MockAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_process(&mut self, pid: Pid, path: &str) {
        self.processes.push(ProcessInfo {
            pid,
            path: path.to_string(),
        });
    }

    pub fn add_thread(&mut self, tid: Tid, state: ThreadState, name: &str) {
        self.threads.push(ThreadInfo {
            tid,
            state,
            name: name.to_string(),
        });
    }

    pub fn set_thread_state(&mut self, tid: Tid, state: ThreadState) {
        if let Some(t) = self.threads.iter_mut().find(|t| t.tid == tid) {
            t.state = state;
        }
    }

    pub fn add_module(&mut self, module: ModuleInfo) {
        self.modules.push(module);
    }

    pub fn add_region(&mut self, start: u64, end: u64) {
        self.regions.push(MemoryRegion { start, end });
    }

    pub fn write_word(&mut self, addr: RemoteAddress, word: u32) {
        for (i, b) in word.to_be_bytes().into_iter().enumerate() {
            self.memory.insert(addr.as_u32() + i as u32, b);
        }
    }

    pub fn read_word(&self, addr: RemoteAddress) -> u32 {
        let mut bytes = [0u8; 4];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = *self.memory.get(&(addr.as_u32() + i as u32)).unwrap_or(&0);
        }
        u32::from_be_bytes(bytes)
    }

    pub fn set_register(&mut self, tid: Tid, reg: Register, slot: [u8; REG_SLOT_LEN]) {
        self.regs.insert((tid, reg), slot);
    }

    /// Seed a register with a plain big-endian u64 in the slot's first half.
    pub fn set_register_u64(&mut self, tid: Tid, reg: Register, value: u64) {
        let mut slot = [0u8; REG_SLOT_LEN];
        slot[..8].copy_from_slice(&value.to_be_bytes());
        self.set_register(tid, reg, slot);
    }

    pub fn trapped_addresses(&self) -> Vec<RemoteAddress> {
        let mut addrs: Vec<_> = self.traps.keys().copied().collect();
        addrs.sort_by_key(|a| a.as_u32());
        addrs
    }
}

impl RemoteClient for MockAgent {
    fn connect(&mut self) -> AgentResult<()> {
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> AgentResult<()> {
        self.connected = false;
        Ok(())
    }

    fn kick(&mut self) {
        self.calls.push("kick".to_string());
    }

    fn list_processes(&mut self) -> AgentResult<Vec<ProcessInfo>> {
        Ok(self.processes.clone())
    }

    fn load_process(
        &mut self,
        path: &str,
        _args: &str,
        _workdir: &str,
        flags: LoadFlags,
    ) -> AgentResult<Pid> {
        let pid = self.processes.last().map(|p| p.pid + 1).unwrap_or(1);
        self.add_process(pid, path);
        self.calls
            .push(format!("load_process {path} flags {:#x}", flags.0));
        Ok(pid)
    }

    fn attach_process(&mut self, pid: Pid) -> AgentResult<()> {
        self.calls.push(format!("attach_process {pid}"));
        Ok(())
    }

    fn detach_process(&mut self, pid: Pid) -> AgentResult<()> {
        self.calls.push(format!("detach_process {pid}"));
        Ok(())
    }

    fn stop_process(&mut self, pid: Pid) -> AgentResult<()> {
        self.calls.push(format!("stop_process {pid}"));
        self.state = ProcessState::Stopped;
        Ok(())
    }

    fn continue_process(&mut self, pid: Pid) -> AgentResult<()> {
        self.calls.push(format!("continue_process {pid}"));
        self.state = ProcessState::Running;
        Ok(())
    }

    fn terminate_process(&mut self, pid: Pid) -> AgentResult<()> {
        self.calls.push(format!("terminate_process {pid}"));
        Ok(())
    }

    fn process_status(&mut self, _pid: Pid) -> AgentResult<ProcessState> {
        Ok(self.state)
    }

    fn list_threads(&mut self, _pid: Pid) -> AgentResult<Vec<ThreadInfo>> {
        Ok(self.threads.clone())
    }

    fn thread_info(&mut self, _pid: Pid, tid: Tid) -> AgentResult<ThreadInfo> {
        self.threads
            .iter()
            .find(|t| t.tid == tid)
            .cloned()
            .ok_or(AgentError::code(ERR_NOT_FOUND))
    }

    fn stop_thread(&mut self, _pid: Pid, tid: Tid) -> AgentResult<()> {
        self.calls.push(format!("stop_thread {tid:#x}"));
        self.set_thread_state(tid, ThreadState::Stop);
        Ok(())
    }

    fn continue_thread(&mut self, _pid: Pid, tid: Tid) -> AgentResult<()> {
        self.calls.push(format!("continue_thread {tid:#x}"));
        self.set_thread_state(tid, ThreadState::Runnable);
        Ok(())
    }

    fn list_modules(&mut self, _pid: Pid) -> AgentResult<Vec<ModuleInfo>> {
        Ok(self.modules.clone())
    }

    fn module_info(&mut self, _pid: Pid, id: ModuleId) -> AgentResult<ModuleInfo> {
        self.modules
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or(AgentError::code(ERR_NOT_FOUND))
    }

    fn read_memory(&mut self, _pid: Pid, addr: RemoteAddress, len: usize) -> AgentResult<Vec<u8>> {
        let base = addr.as_u32();
        Ok((0..len)
            .map(|i| *self.memory.get(&(base + i as u32)).unwrap_or(&0))
            .collect())
    }

    fn write_memory(&mut self, _pid: Pid, addr: RemoteAddress, data: &[u8]) -> AgentResult<()> {
        let base = addr.as_u32();
        for (i, b) in data.iter().enumerate() {
            self.memory.insert(base + i as u32, *b);
        }
        Ok(())
    }

    fn read_registers(
        &mut self,
        _pid: Pid,
        tid: Tid,
        regs: &[Register],
    ) -> AgentResult<Vec<[u8; REG_SLOT_LEN]>> {
        Ok(regs
            .iter()
            .map(|reg| {
                self.regs
                    .get(&(tid, *reg))
                    .copied()
                    .unwrap_or([0u8; REG_SLOT_LEN])
            })
            .collect())
    }

    fn write_register(
        &mut self,
        _pid: Pid,
        tid: Tid,
        reg: Register,
        slot: [u8; REG_SLOT_LEN],
    ) -> AgentResult<()> {
        self.regs.insert((tid, reg), slot);
        Ok(())
    }

    fn set_trap(&mut self, _pid: Pid, _tid: Option<Tid>, addr: RemoteAddress) -> AgentResult<()> {
        let orig = self.read_word(addr);
        self.traps.entry(addr).or_insert(orig);
        self.write_word(addr, TRAP_OPCODE);
        self.calls.push(format!("set_trap {addr}"));
        Ok(())
    }

    fn clear_trap(&mut self, _pid: Pid, _tid: Option<Tid>, addr: RemoteAddress) -> AgentResult<()> {
        let orig = self
            .traps
            .remove(&addr)
            .ok_or(AgentError::code(ERR_NOT_FOUND))?;
        self.write_word(addr, orig);
        self.calls.push(format!("clear_trap {addr}"));
        Ok(())
    }

    fn list_traps(&mut self, _pid: Pid, _tid: Option<Tid>) -> AgentResult<Vec<RemoteAddress>> {
        Ok(self.trapped_addresses())
    }

    fn set_data_watch(&mut self, _pid: Pid, value: u64) -> AgentResult<()> {
        self.data_watch = Some(value);
        self.calls.push(format!("set_data_watch {value:#x}"));
        Ok(())
    }

    fn memory_map(&mut self, _pid: Pid) -> AgentResult<Vec<MemoryRegion>> {
        Ok(self.regions.clone())
    }
}
