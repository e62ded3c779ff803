use crate::debugger::error::Error;
use crate::debugger::remote::REG_SLOT_LEN;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Register class masks, host queries use a bitwise combination.
pub const CLASS_GENERAL: u32 = 1;
pub const CLASS_FLOAT: u32 = 2;
pub const CLASS_VECTOR: u32 = 4;

/// One entry of the fixed PowerPC register table.
///
/// Table order is part of the host contract: general purpose registers first,
/// then pc/cr/lr/ctr, floating point, and 128-bit vector registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    Gpr(u8),
    Pc,
    Cr,
    Lr,
    Ctr,
    Fpr(u8),
    Vr(u8),
}

/// Total number of table entries.
pub const REGISTER_COUNT: usize = 100;

impl Register {
    /// Position in the fixed table, the host addresses registers by it.
    pub fn index(self) -> usize {
        match self {
            Register::Gpr(n) => n as usize,
            Register::Pc => 32,
            Register::Cr => 33,
            Register::Lr => 34,
            Register::Ctr => 35,
            Register::Fpr(n) => 36 + n as usize,
            Register::Vr(n) => 68 + n as usize,
        }
    }

    pub fn from_index(idx: usize) -> Result<Register, Error> {
        match idx {
            0..=31 => Ok(Register::Gpr(idx as u8)),
            32 => Ok(Register::Pc),
            33 => Ok(Register::Cr),
            34 => Ok(Register::Lr),
            35 => Ok(Register::Ctr),
            36..=67 => Ok(Register::Fpr((idx - 36) as u8)),
            68..=99 => Ok(Register::Vr((idx - 68) as u8)),
            _ => Err(Error::RegisterIndex(idx)),
        }
    }

    pub fn class(self) -> u32 {
        match self {
            Register::Gpr(_) | Register::Pc | Register::Cr | Register::Lr | Register::Ctr => {
                CLASS_GENERAL
            }
            Register::Fpr(_) => CLASS_FLOAT,
            Register::Vr(_) => CLASS_VECTOR,
        }
    }

    /// Iterate the whole table in host order.
    pub fn table() -> impl Iterator<Item = Register> {
        (0..REGISTER_COUNT).map(|i| Register::from_index(i).expect("index in range"))
    }

    /// Table slice for a class mask, preserving host order.
    pub fn by_class_mask(mask: u32) -> Vec<Register> {
        Register::table().filter(|r| r.class() & mask != 0).collect()
    }
}

impl Display for Register {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Register::Gpr(n) => write!(f, "r{n}"),
            Register::Pc => f.write_str("pc"),
            Register::Cr => f.write_str("cr"),
            Register::Lr => f.write_str("lr"),
            Register::Ctr => f.write_str("ctr"),
            Register::Fpr(n) => write!(f, "f{n}"),
            Register::Vr(n) => write!(f, "vr{n}"),
        }
    }
}

impl FromStr for Register {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let not_found = || Error::RegisterNameNotFound(s.to_string());
        let reg_num = |prefix: &str, max: u8| -> Result<u8, Error> {
            let n: u8 = s[prefix.len()..].parse().map_err(|_| not_found())?;
            if n > max {
                return Err(not_found());
            }
            Ok(n)
        };

        match s {
            "pc" => Ok(Register::Pc),
            "cr" => Ok(Register::Cr),
            "lr" => Ok(Register::Lr),
            "ctr" => Ok(Register::Ctr),
            _ if s.starts_with("vr") => Ok(Register::Vr(reg_num("vr", 31)?)),
            _ if s.starts_with('r') => Ok(Register::Gpr(reg_num("r", 31)?)),
            _ if s.starts_with('f') => Ok(Register::Fpr(reg_num("f", 31)?)),
            _ => Err(not_found()),
        }
    }
}

/// Host-order register value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterValue {
    U64(u64),
    Bytes16([u8; 16]),
}

impl RegisterValue {
    pub fn as_u64(self) -> Option<u64> {
        match self {
            RegisterValue::U64(v) => Some(v),
            RegisterValue::Bytes16(_) => None,
        }
    }
}

/// Decode one raw agent slot into a host-order value.
///
/// Slots are big-endian relative to the host. The condition register arrives
/// with its meaningful word in the wrong half and must be rotated.
pub fn decode_slot(reg: Register, slot: &[u8; REG_SLOT_LEN]) -> RegisterValue {
    match reg.class() {
        CLASS_VECTOR => {
            let mut out = [0u8; 16];
            for lane in 0..4 {
                let word = u32::from_be_bytes(
                    slot[lane * 4..lane * 4 + 4].try_into().expect("lane is 4 bytes"),
                );
                out[lane * 4..lane * 4 + 4].copy_from_slice(&word.to_ne_bytes());
            }
            RegisterValue::Bytes16(out)
        }
        _ => {
            let mut value =
                u64::from_be_bytes(slot[..8].try_into().expect("slot holds at least 8 bytes"));
            if reg == Register::Cr {
                value = value.rotate_left(32);
            }
            RegisterValue::U64(value)
        }
    }
}

/// Encode a host-order value back into a raw agent slot.
pub fn encode_slot(reg: Register, value: RegisterValue) -> [u8; REG_SLOT_LEN] {
    let mut slot = [0u8; REG_SLOT_LEN];
    match value {
        RegisterValue::U64(mut v) => {
            if reg == Register::Cr {
                v = v.rotate_right(32);
            }
            slot[..8].copy_from_slice(&v.to_be_bytes());
        }
        RegisterValue::Bytes16(bytes) => {
            for lane in 0..4 {
                let word = u32::from_ne_bytes(
                    bytes[lane * 4..lane * 4 + 4].try_into().expect("lane is 4 bytes"),
                );
                slot[lane * 4..lane * 4 + 4].copy_from_slice(&word.to_be_bytes());
            }
        }
    }
    slot
}
