//! Single stepping by transient breakpoints.
//!
//! The target has no native single-step facility, so a step is emulated by
//! decoding the branch shape of the current instruction and arming transient
//! trap words on every address control flow can reach next.

use crate::debugger::address::RemoteAddress;
use crate::debugger::breakpoint::BreakpointRegistry;
use crate::debugger::error::Error;
use crate::debugger::register::{decode_slot, Register};
use crate::debugger::remote::{Pid, RemoteClient, ThreadState, Tid};
use crate::pb_warn;
use bit_field::BitField;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
    Into,
    /// Do not descend into subroutine calls: a branch that sets the link
    /// register only gets its fall-through armed.
    Over,
}

/// Successor addresses of one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepTargets {
    pub next: RemoteAddress,
    pub branch: Option<RemoteAddress>,
}

const OPCODE_B: u32 = 18;
const OPCODE_BC: u32 = 16;
const OPCODE_XL: u32 = 19;
const XO_BCLR: u32 = 16;
const XO_BCCTR: u32 = 528;

/// Compute the successor set of the instruction word `insn` at `pc`.
///
/// `lr` and `ctr` supply the register-indirect branch targets; values that do
/// not map into the code address space simply yield no branch arm.
pub fn branch_targets(
    insn: u32,
    pc: RemoteAddress,
    mode: StepMode,
    lr: u64,
    ctr: u64,
) -> StepTargets {
    let opcode = insn.get_bits(26..32);
    let link = insn.get_bit(0);
    let absolute = insn.get_bit(1);

    match opcode {
        OPCODE_B => {
            // 24-bit displacement field already shifted left by two,
            // sign bit lands at bit 25
            let li = (((insn & 0x03FF_FFFC) as i32) << 6 >> 6) as i64;
            let target = if absolute {
                RemoteAddress::from(li as u32)
            } else {
                pc.offset(li)
            };
            if link {
                StepTargets {
                    next: pc.next_instruction(),
                    branch: (mode == StepMode::Into).then_some(target),
                }
            } else {
                // unconditional, the fall-through slot never executes
                StepTargets {
                    next: target,
                    branch: None,
                }
            }
        }
        OPCODE_BC => {
            let bd = ((insn & 0xFFFC) as u16 as i16) as i64;
            let target = if absolute {
                RemoteAddress::from(bd as u32)
            } else {
                pc.offset(bd)
            };
            StepTargets {
                next: pc.next_instruction(),
                branch: (!(link && mode == StepMode::Over)).then_some(target),
            }
        }
        OPCODE_XL => {
            let source = match insn.get_bits(1..11) {
                XO_BCLR => Some(lr),
                XO_BCCTR => Some(ctr),
                _ => None,
            };
            let branch = match source {
                Some(_) if link && mode == StepMode::Over => None,
                Some(raw) => RemoteAddress::map_canonical(raw),
                None => None,
            };
            StepTargets {
                next: pc.next_instruction(),
                branch,
            }
        }
        _ => StepTargets {
            next: pc.next_instruction(),
            branch: None,
        },
    }
}

/// Arm transient step breakpoints for one step of thread `tid`.
///
/// Reads pc/lr/ctr, decodes the current instruction (through the shadow map,
/// the word in memory may be one of our own traps) and traps every successor.
pub fn arm_step_traps(
    client: &mut dyn RemoteClient,
    registry: &mut BreakpointRegistry,
    pid: Pid,
    tid: Tid,
    mode: StepMode,
) -> Result<(), Error> {
    let thread = client
        .thread_info(pid, tid)
        .map_err(|_| Error::ThreadNotFound(tid))?;
    if matches!(thread.state, ThreadState::Sleep | ThreadState::SleepSuspended) {
        pb_warn!(target: "bridge", "stepping sleeping thread {tid:#x}, it may not run");
    }

    let regs = [Register::Pc, Register::Lr, Register::Ctr];
    let slots = client
        .read_registers(pid, tid, &regs)
        .map_err(|e| Error::Remote("read_registers", e))?;
    let mut values = [0u64; 3];
    for (i, (reg, slot)) in regs.iter().zip(slots.iter()).enumerate() {
        values[i] = decode_slot(*reg, slot).as_u64().unwrap_or(0);
    }
    let pc = RemoteAddress::map_canonical(values[0]).ok_or(Error::NoProgramCounter(tid))?;

    let mut word: [u8; 4] = client
        .read_memory(pid, pc, 4)
        .map_err(|e| Error::Remote("read_memory", e))?
        .as_slice()
        .try_into()
        .map_err(|_| Error::Remote("read_memory", crate::debugger::remote::AgentError::code(-1)))?;
    registry.mask_read(pc, &mut word);
    let insn = u32::from_be_bytes(word);

    let targets = branch_targets(insn, pc, mode, values[1], values[2]);
    registry.add_step(client, pid, tid, targets.next)?;
    if let Some(branch) = targets.branch {
        if branch != targets.next {
            registry.add_step(client, pid, tid, branch)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_branch_decoding() {
        struct TestCase {
            insn: u32,
            mode: StepMode,
            next: u32,
            branch: Option<u32>,
        }
        let pc = RemoteAddress::from(0x10300);
        let lr = 0x10500u64;
        let ctr = 0x10600u64;

        let test_cases = [
            // addi r3, r0, 1 - not a branch
            TestCase {
                insn: 0x3860_0001,
                mode: StepMode::Into,
                next: 0x10304,
                branch: None,
            },
            // b +0x20 - unconditional, fall-through is the target itself
            TestCase {
                insn: 0x4800_0020,
                mode: StepMode::Into,
                next: 0x10320,
                branch: None,
            },
            // b -0x10
            TestCase {
                insn: 0x4BFF_FFF0,
                mode: StepMode::Into,
                next: 0x102F0,
                branch: None,
            },
            // bl +0x20 stepped into
            TestCase {
                insn: 0x4800_0021,
                mode: StepMode::Into,
                next: 0x10304,
                branch: Some(0x10320),
            },
            // bl +0x20 stepped over, callee not armed
            TestCase {
                insn: 0x4800_0021,
                mode: StepMode::Over,
                next: 0x10304,
                branch: None,
            },
            // bne +0x10 - both arms
            TestCase {
                insn: 0x4082_0010,
                mode: StepMode::Into,
                next: 0x10304,
                branch: Some(0x10310),
            },
            // conditional branches keep both arms even when stepping over
            TestCase {
                insn: 0x4082_0010,
                mode: StepMode::Over,
                next: 0x10304,
                branch: Some(0x10310),
            },
            // blr - target from the link register
            TestCase {
                insn: 0x4E80_0020,
                mode: StepMode::Into,
                next: 0x10304,
                branch: Some(0x10500),
            },
            // bctr - target from the count register
            TestCase {
                insn: 0x4E80_0420,
                mode: StepMode::Into,
                next: 0x10304,
                branch: Some(0x10600),
            },
            // bctrl stepped over
            TestCase {
                insn: 0x4E80_0421,
                mode: StepMode::Over,
                next: 0x10304,
                branch: None,
            },
        ];

        for tc in test_cases {
            let targets = branch_targets(tc.insn, pc, tc.mode, lr, ctr);
            assert_eq!(
                targets,
                StepTargets {
                    next: tc.next.into(),
                    branch: tc.branch.map(RemoteAddress::from),
                },
                "insn {:#010X}",
                tc.insn
            );
        }
    }

    #[test]
    fn test_register_indirect_target_outside_code_space() {
        let pc = RemoteAddress::from(0x10300);
        // link register still zero, only the fall-through is armed
        let targets = branch_targets(0x4E80_0020, pc, StepMode::Into, 0, 0);
        assert_eq!(targets.branch, None);
        assert_eq!(targets.next, RemoteAddress::from(0x10304));
    }

    #[test]
    fn test_absolute_branch() {
        let pc = RemoteAddress::from(0x10300);
        // ba 0x11000
        let insn = 0x4800_0000 | 0x11000 | 2;
        let targets = branch_targets(insn, pc, StepMode::Into, 0, 0);
        assert_eq!(targets.next, RemoteAddress::from(0x11000));
        assert_eq!(targets.branch, None);
    }
}
