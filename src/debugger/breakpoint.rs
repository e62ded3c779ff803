use crate::debugger::address::RemoteAddress;
use crate::debugger::error::Error;
use crate::debugger::remote::{Pid, RemoteClient, Tid};
use crate::weak_error;
use std::collections::{HashMap, HashSet};

/// `tw 31, r0, r0` - the trap word patched over an instruction to implement
/// a software breakpoint.
pub const TRAP_OPCODE: u32 = 0x7FE0_0008;

/// Owner of every trap word this engine has written into target memory.
///
/// Two overlapping sets share one shadow map: permanent breakpoints requested
/// by the host and transient step breakpoints armed by the step engine. The
/// shadow map holds the original instruction word beneath each patched
/// address so reads can be masked and removals can restore code exactly.
/// An address patched while it already contained the trap word gets no shadow
/// entry - those bytes belong to the target program itself.
#[derive(Debug, Default)]
pub struct BreakpointRegistry {
    shadow: HashMap<RemoteAddress, u32>,
    permanent: HashSet<RemoteAddress>,
    step: HashSet<RemoteAddress>,
}

impl BreakpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_permanent(&self, addr: RemoteAddress) -> bool {
        self.permanent.contains(&addr)
    }

    /// Addresses currently armed for the in-flight step operation.
    pub fn step_set(&self) -> &HashSet<RemoteAddress> {
        &self.step
    }

    pub fn permanent_addresses(&self) -> Vec<RemoteAddress> {
        self.permanent.iter().copied().collect()
    }

    /// Install a permanent software breakpoint, returns the original
    /// instruction bytes for host record-keeping.
    ///
    /// Idempotent against re-adding an already trapped address: the shadow
    /// entry is only recorded when the current word is not the trap opcode,
    /// so a second add never overwrites a valid shadow with trap bytes.
    pub fn add_software(
        &mut self,
        client: &mut dyn RemoteClient,
        pid: Pid,
        addr: RemoteAddress,
    ) -> Result<[u8; 4], Error> {
        let orig = self.read_word(client, pid, addr)?;
        if orig != TRAP_OPCODE {
            self.shadow.insert(addr, orig);
        }
        client
            .set_trap(pid, None, addr)
            .map_err(|e| Error::Remote("set_trap", e))?;
        self.permanent.insert(addr);
        Ok(orig.to_be_bytes())
    }

    /// Remove a permanent breakpoint and restore the original instruction.
    ///
    /// The shadow word is written back explicitly: the host may have patched
    /// the instruction beneath the trap since it was set, and the agent only
    /// knows the word it saw at set time.
    pub fn remove_software(
        &mut self,
        client: &mut dyn RemoteClient,
        pid: Pid,
        addr: RemoteAddress,
    ) -> Result<(), Error> {
        if !self.permanent.contains(&addr) {
            return Err(Error::BreakpointNotFound(addr));
        }
        client
            .clear_trap(pid, None, addr)
            .map_err(|e| Error::Remote("clear_trap", e))?;
        self.permanent.remove(&addr);
        if !self.step.contains(&addr) {
            if let Some(orig) = self.shadow.remove(&addr) {
                client
                    .write_memory(pid, addr, &orig.to_be_bytes())
                    .map_err(|e| Error::Remote("write_memory", e))?;
            }
        }
        Ok(())
    }

    /// Arm a transient step breakpoint at `addr`, scoped to `tid`.
    pub fn add_step(
        &mut self,
        client: &mut dyn RemoteClient,
        pid: Pid,
        tid: Tid,
        addr: RemoteAddress,
    ) -> Result<(), Error> {
        let orig = self.read_word(client, pid, addr)?;
        if orig != TRAP_OPCODE {
            self.shadow.insert(addr, orig);
        }
        client
            .set_trap(pid, Some(tid), addr)
            .map_err(|e| Error::Remote("set_trap", e))?;
        self.step.insert(addr);
        Ok(())
    }

    /// Retract every armed step breakpoint that is not also permanent and
    /// clear the transient set. Called when the step's trap arrives.
    pub fn clear_step(&mut self, client: &mut dyn RemoteClient, pid: Pid, tid: Tid) {
        let addrs: Vec<_> = self.step.iter().copied().collect();
        self.retract_steps(client, pid, tid, &addrs);
        self.step.clear();
    }

    /// Retract a specific subset of step breakpoints, skipping addresses
    /// that carry a coincident permanent breakpoint.
    pub fn retract_steps(
        &mut self,
        client: &mut dyn RemoteClient,
        pid: Pid,
        tid: Tid,
        addrs: &[RemoteAddress],
    ) {
        for &addr in addrs {
            if self.permanent.contains(&addr) {
                continue;
            }
            self.shadow.remove(&addr);
            self.step.remove(&addr);
            weak_error!(
                client
                    .clear_trap(pid, Some(tid), addr)
                    .map_err(|e| Error::Remote("clear_trap", e)),
                "step breakpoint retraction:"
            );
        }
    }

    /// Replace trap words in freshly read memory with the shadowed original
    /// instructions. Only words this engine patched are rewritten; a trap
    /// word genuinely present in the program is left untouched.
    pub fn mask_read(&self, base: RemoteAddress, data: &mut [u8]) {
        let trap = TRAP_OPCODE.to_be_bytes();
        for i in (0..data.len().saturating_sub(3)).step_by(4) {
            if data[i..i + 4] == trap {
                if let Some(orig) = self.shadow.get(&base.offset(i as i64)) {
                    data[i..i + 4].copy_from_slice(&orig.to_be_bytes());
                }
            }
        }
    }

    /// Prepare an outgoing memory write so it does not disturb armed traps.
    ///
    /// For every patched address inside the written range the new word is
    /// absorbed into the shadow and the outgoing bytes are rewritten to the
    /// trap opcode, keeping the trap armed across the write.
    pub fn absorb_write(&mut self, base: RemoteAddress, data: &mut [u8]) {
        let addrs: Vec<_> = self.shadow.keys().copied().collect();
        for addr in addrs {
            let Some(off) = addr.as_u32().checked_sub(base.as_u32()) else {
                continue;
            };
            let off = off as usize;
            if off + 4 > data.len() {
                continue;
            }
            let word = u32::from_be_bytes(data[off..off + 4].try_into().unwrap_or([0; 4]));
            if word != TRAP_OPCODE {
                self.shadow.insert(addr, word);
            }
            data[off..off + 4].copy_from_slice(&TRAP_OPCODE.to_be_bytes());
        }
    }

    fn read_word(
        &self,
        client: &mut dyn RemoteClient,
        pid: Pid,
        addr: RemoteAddress,
    ) -> Result<u32, Error> {
        let bytes = client
            .read_memory(pid, addr, 4)
            .map_err(|e| Error::Remote("read_memory", e))?;
        let word: [u8; 4] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| Error::Remote("read_memory", crate::debugger::remote::AgentError::code(-1)))?;
        Ok(u32::from_be_bytes(word))
    }
}
