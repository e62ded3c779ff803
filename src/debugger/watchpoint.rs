use crate::debugger::address::RemoteAddress;
use crate::debugger::error::{BptError, Error};
use crate::debugger::remote::{Pid, ProcessState, RemoteClient};

/// Value programmed into the data-address watchpoint register to disable
/// matching without clearing the address bits.
pub const WATCH_DISABLE: u64 = 4;

/// Access kind encoded into the low bits of the watchpoint register value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum AccessKind {
    Write = 6,
    ReadWrite = 7,
}

/// The target exposes exactly one data-address watchpoint register. This slot
/// tracks its occupancy and rebuilds the raw register value on demand, so the
/// register can be parked and re-armed around single steps without losing the
/// armed address.
#[derive(Debug, Default)]
pub struct WatchpointSlot {
    armed: Option<(RemoteAddress, AccessKind)>,
}

impl WatchpointSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn armed_address(&self) -> Option<RemoteAddress> {
        self.armed.map(|(addr, _)| addr)
    }

    /// Feasibility check mirrored by [`arm`](Self::arm). The register watches
    /// an 8-byte granule, so the address must be 8-byte aligned; while the
    /// register is occupied no further watchpoint can be granted.
    pub fn check(&self, addr: RemoteAddress, kind: Option<AccessKind>) -> Result<(), BptError> {
        if kind.is_none() {
            return Err(BptError::BadType);
        }
        if addr.as_u64() & 7 != 0 {
            return Err(BptError::BadAlign);
        }
        if self.armed.is_some() {
            return Err(BptError::TooMany);
        }
        Ok(())
    }

    /// Program the register with a new watch. A running target is stopped
    /// around the write and resumed afterwards.
    pub fn arm(
        &mut self,
        client: &mut dyn RemoteClient,
        pid: Pid,
        addr: RemoteAddress,
        kind: AccessKind,
    ) -> Result<(), Error> {
        self.program(client, pid, raw_value(addr, kind))?;
        self.armed = Some((addr, kind));
        Ok(())
    }

    pub fn disarm(&mut self, client: &mut dyn RemoteClient, pid: Pid) -> Result<(), Error> {
        self.program(client, pid, WATCH_DISABLE)?;
        self.armed = None;
        Ok(())
    }

    fn program(&self, client: &mut dyn RemoteClient, pid: Pid, value: u64) -> Result<(), Error> {
        let running = client
            .process_status(pid)
            .map_err(|e| Error::Remote("process_status", e))?
            == ProcessState::Running;
        if running {
            client
                .stop_process(pid)
                .map_err(|e| Error::Remote("stop_process", e))?;
        }
        client
            .set_data_watch(pid, value)
            .map_err(|e| Error::Remote("set_data_watch", e))?;
        if running {
            client
                .continue_process(pid)
                .map_err(|e| Error::Remote("continue_process", e))?;
        }
        Ok(())
    }

    /// Park the register so an intermediate single step over the watched
    /// granule does not re-trigger. The armed slot is kept.
    pub fn suspend(&mut self, client: &mut dyn RemoteClient, pid: Pid) -> Result<(), Error> {
        if self.armed.is_some() {
            client
                .set_data_watch(pid, WATCH_DISABLE)
                .map_err(|e| Error::Remote("set_data_watch", e))?;
        }
        Ok(())
    }

    /// Re-program the register from the armed slot after a suspend.
    pub fn restore(&mut self, client: &mut dyn RemoteClient, pid: Pid) -> Result<(), Error> {
        if let Some((addr, kind)) = self.armed {
            client
                .set_data_watch(pid, raw_value(addr, kind))
                .map_err(|e| Error::Remote("set_data_watch", e))?;
        }
        Ok(())
    }
}

fn raw_value(addr: RemoteAddress, kind: AccessKind) -> u64 {
    (addr.as_u64() & !7) | kind as u64
}
