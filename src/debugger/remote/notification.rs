//! Raw notification buffer decoding.
//!
//! The agent delivers asynchronous notifications as an opaque buffer holding
//! one or more length-prefixed sub-events. All integers are big-endian, the
//! target's native order. Malformed sub-events are skipped, the walk never
//! reads past the running remaining counter.

use crate::debugger::remote::Tid;
use bytes::Buf;
use log::warn;

/// Outer header kind for target-specific debug sub-events. Other kinds exist
/// on the wire but carry nothing this bridge consumes.
pub const EVENT_TARGET_SPECIFIC: u32 = 0;

const OUTER_HDR_LEN: usize = 8;
const SUB_EVENT_LEN: usize = 32;

/// Discriminant of one target-specific debug sub-event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum NotifyKind {
    ProcessCreate = 0,
    ProcessExit = 1,
    /// Trap instruction hit (software breakpoint or step breakpoint).
    Trap = 2,
    PrivilegeInstr = 3,
    Alignment = 4,
    IllegalInstr = 5,
    TextHtabMiss = 6,
    TextSlbMiss = 7,
    DataHtabMiss = 8,
    DataSlbMiss = 9,
    FloatEnabled = 10,
    /// Data-address watchpoint register match.
    WatchMatch = 11,
    /// Thread stopped on explicit agent request, informational only.
    Stop = 12,
    /// Primary thread stopped at entry point, informational only.
    StopInit = 13,
    /// Memory access trap interrupt, informational only.
    MemoryAccessTrap = 14,
    ThreadCreate = 15,
    ThreadExit = 16,
    ModuleLoad = 17,
    ModuleUnload = 18,
}

impl NotifyKind {
    fn from_code(code: u32) -> Option<NotifyKind> {
        use NotifyKind::*;
        Some(match code {
            0 => ProcessCreate,
            1 => ProcessExit,
            2 => Trap,
            3 => PrivilegeInstr,
            4 => Alignment,
            5 => IllegalInstr,
            6 => TextHtabMiss,
            7 => TextSlbMiss,
            8 => DataHtabMiss,
            9 => DataSlbMiss,
            10 => FloatEnabled,
            11 => WatchMatch,
            12 => Stop,
            13 => StopInit,
            14 => MemoryAccessTrap,
            15 => ThreadCreate,
            16 => ThreadExit,
            17 => ModuleLoad,
            18 => ModuleUnload,
            _ => return None,
        })
    }
}

/// One decoded sub-event. Field meaning depends on the kind: `aux` carries
/// the exit code for process exit, the module id for module load/unload, and
/// auxiliary fault data (DSISR) for exceptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotifyKind,
    pub tid: Tid,
    pub pc: u64,
    pub aux: u64,
}

/// Walk a raw buffer and decode every recognizable sub-event.
pub fn parse(data: &[u8]) -> Vec<Notification> {
    let mut out = Vec::new();
    let mut remaining = data.len();
    let mut buf = data;

    while remaining >= OUTER_HDR_LEN {
        let outer_kind = buf.get_u32();
        let size = buf.get_u32() as usize;

        if size < OUTER_HDR_LEN || size > remaining {
            warn!(target: "notify", "sub-event size {size} exceeds remaining {remaining}, buffer dropped");
            return out;
        }

        let payload_len = size - OUTER_HDR_LEN;
        if outer_kind == EVENT_TARGET_SPECIFIC && payload_len >= SUB_EVENT_LEN {
            let mut payload = &buf[..SUB_EVENT_LEN];
            let code = payload.get_u32();
            let _reserved = payload.get_u32();
            let tid = payload.get_u64();
            let pc = payload.get_u64();
            let aux = payload.get_u64();

            match NotifyKind::from_code(code) {
                Some(kind) => out.push(Notification { kind, tid, pc, aux }),
                None => warn!(target: "notify", "unknown sub-event code {code}, skipped"),
            }
        } else if outer_kind == EVENT_TARGET_SPECIFIC {
            warn!(target: "notify", "short target-specific sub-event ({payload_len} bytes), skipped");
        }

        buf.advance(payload_len);
        remaining -= size;
    }

    out
}

/// Encode one sub-event into the wire layout [`parse`] understands.
/// Intended for agent implementations and tests.
pub fn encode(n: Notification) -> Vec<u8> {
    let mut out = Vec::with_capacity(OUTER_HDR_LEN + SUB_EVENT_LEN);
    out.extend_from_slice(&EVENT_TARGET_SPECIFIC.to_be_bytes());
    out.extend_from_slice(&((OUTER_HDR_LEN + SUB_EVENT_LEN) as u32).to_be_bytes());
    out.extend_from_slice(&(n.kind as u32).to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(&n.tid.to_be_bytes());
    out.extend_from_slice(&n.pc.to_be_bytes());
    out.extend_from_slice(&n.aux.to_be_bytes());
    out
}
