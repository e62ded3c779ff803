pub mod mock;
pub mod notification;

use crate::debugger::address::RemoteAddress;
use crate::debugger::register::Register;
use std::fmt::{Display, Formatter};
use strum_macros::{Display as StrumDisplay, EnumString};

pub type Pid = u32;
pub type Tid = u64;
pub type ModuleId = u32;

/// Length of one raw register slot as delivered by the agent.
pub const REG_SLOT_LEN: usize = 16;

/// Error code returned by a remote agent call.
#[derive(Debug, Clone, thiserror::Error)]
pub struct AgentError {
    pub code: i32,
    pub context: Option<String>,
}

impl AgentError {
    pub fn code(code: i32) -> Self {
        AgentError {
            code,
            context: None,
        }
    }
}

impl Display for AgentError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.context {
            Some(ctx) => write!(f, "agent error {} ({ctx})", self.code),
            None => write!(f, "agent error {}", self.code),
        }
    }
}

pub type AgentResult<T> = Result<T, AgentError>;

/// Scheduler state of a target thread as reported by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ThreadState {
    Idle,
    Runnable,
    OnProc,
    Sleep,
    Suspended,
    SleepSuspended,
    Stop,
    Zombie,
    Deleted,
}

/// Run state of the debuggee process as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, StrumDisplay, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessState {
    Running,
    #[default]
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: Pid,
    /// Full path of the executable on the target filesystem.
    pub path: String,
}

impl ProcessInfo {
    /// Executable name without the directory part.
    pub fn image_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub tid: Tid,
    pub state: ThreadState,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    pub id: ModuleId,
    pub elf_name: String,
    pub name: String,
    pub base: RemoteAddress,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub start: u64,
    pub end: u64,
}

/// Flags for process load requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadFlags(pub u32);

impl LoadFlags {
    pub const ENABLE_DEBUGGING: LoadFlags = LoadFlags(1);
}

/// Capability surface of the remote debug agent.
///
/// This is an abstract view over the vendor SDK, not a wire format mandate:
/// one method per low-level primitive the bridge consumes. Implementations
/// are expected to be synchronous; asynchronous notifications are delivered
/// separately as raw buffers (see [`notification`]).
pub trait RemoteClient {
    fn connect(&mut self) -> AgentResult<()>;
    fn disconnect(&mut self) -> AgentResult<()>;

    /// Prompt the agent to flush pending notification deliveries.
    fn kick(&mut self);

    fn list_processes(&mut self) -> AgentResult<Vec<ProcessInfo>>;
    /// Reset the target and load an executable, returns the new process id.
    fn load_process(
        &mut self,
        path: &str,
        args: &str,
        workdir: &str,
        flags: LoadFlags,
    ) -> AgentResult<Pid>;
    fn attach_process(&mut self, pid: Pid) -> AgentResult<()>;
    fn detach_process(&mut self, pid: Pid) -> AgentResult<()>;
    fn stop_process(&mut self, pid: Pid) -> AgentResult<()>;
    fn continue_process(&mut self, pid: Pid) -> AgentResult<()>;
    fn terminate_process(&mut self, pid: Pid) -> AgentResult<()>;
    fn process_status(&mut self, pid: Pid) -> AgentResult<ProcessState>;

    fn list_threads(&mut self, pid: Pid) -> AgentResult<Vec<ThreadInfo>>;
    fn thread_info(&mut self, pid: Pid, tid: Tid) -> AgentResult<ThreadInfo>;
    fn stop_thread(&mut self, pid: Pid, tid: Tid) -> AgentResult<()>;
    fn continue_thread(&mut self, pid: Pid, tid: Tid) -> AgentResult<()>;

    fn list_modules(&mut self, pid: Pid) -> AgentResult<Vec<ModuleInfo>>;
    fn module_info(&mut self, pid: Pid, id: ModuleId) -> AgentResult<ModuleInfo>;

    fn read_memory(&mut self, pid: Pid, addr: RemoteAddress, len: usize) -> AgentResult<Vec<u8>>;
    fn write_memory(&mut self, pid: Pid, addr: RemoteAddress, data: &[u8]) -> AgentResult<()>;

    /// Read raw register slots, one [`REG_SLOT_LEN`]-byte big-endian slot per
    /// requested register.
    fn read_registers(
        &mut self,
        pid: Pid,
        tid: Tid,
        regs: &[Register],
    ) -> AgentResult<Vec<[u8; REG_SLOT_LEN]>>;
    fn write_register(
        &mut self,
        pid: Pid,
        tid: Tid,
        reg: Register,
        slot: [u8; REG_SLOT_LEN],
    ) -> AgentResult<()>;

    /// Patch the trap opcode at `addr`. `tid` scopes the trap to one thread
    /// where the agent supports it, `None` applies process wide.
    fn set_trap(&mut self, pid: Pid, tid: Option<Tid>, addr: RemoteAddress) -> AgentResult<()>;
    /// Restore the original instruction at `addr`.
    fn clear_trap(&mut self, pid: Pid, tid: Option<Tid>, addr: RemoteAddress) -> AgentResult<()>;
    fn list_traps(&mut self, pid: Pid, tid: Option<Tid>) -> AgentResult<Vec<RemoteAddress>>;

    /// Program the single data-address watchpoint register with a raw
    /// address-or-mask value (see [`crate::debugger::watchpoint`]).
    fn set_data_watch(&mut self, pid: Pid, value: u64) -> AgentResult<()>;

    fn memory_map(&mut self, pid: Pid) -> AgentResult<Vec<MemoryRegion>>;
}
