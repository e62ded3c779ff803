use std::fmt::{Display, Formatter};

/// Lowest address of the user image on the target.
/// Anything below belongs to the loader or the kernel.
pub const USER_IMAGE_BASE: u64 = 0x10200;

/// Address in the remote target's effective address space.
#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct RemoteAddress(u32);

impl RemoteAddress {
    /// Next instruction slot, instructions are always 4 bytes wide.
    pub fn next_instruction(self) -> RemoteAddress {
        RemoteAddress(self.0.wrapping_add(4))
    }

    pub fn offset(self, offset: i64) -> RemoteAddress {
        RemoteAddress((self.0 as i64).wrapping_add(offset) as u32)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    pub fn as_u64(self) -> u64 {
        u64::from(self.0)
    }

    /// Map a raw register-sized value to a canonical address.
    ///
    /// Used for jump-prediction style resolution: values outside the 32-bit
    /// effective address space or below the user image are not code addresses.
    pub fn map_canonical(raw: u64) -> Option<RemoteAddress> {
        if raw < 0x1_0000_0000 && raw > USER_IMAGE_BASE {
            Some(RemoteAddress(raw as u32))
        } else {
            None
        }
    }
}

impl From<u32> for RemoteAddress {
    fn from(addr: u32) -> Self {
        RemoteAddress(addr)
    }
}

impl From<RemoteAddress> for u32 {
    fn from(addr: RemoteAddress) -> Self {
        addr.0
    }
}

impl From<RemoteAddress> for u64 {
    fn from(addr: RemoteAddress) -> Self {
        addr.as_u64()
    }
}

impl Display for RemoteAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&format!("{:#010X}", self.0))
    }
}
