//! Virtual registers.

use bitflags::bitflags;
use std::fmt;

/// Index of a virtual register in its function's [`VRegPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VRegId(pub u32);

impl fmt::Display for VRegId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct VRegFlags: u8 {
        /// Holds a known constant; never allocated a physical register.
        const CONST = 1 << 0;
        const SPILLED = 1 << 1;
        const FLONUM = 1 << 2;
        const UNSIGNED = 1 << 3;
    }
}

/// One virtual register: a size class, flags, and after allocation either
/// a physical index or a spill slot.
#[derive(Debug, Clone)]
pub struct VReg {
    /// Size class in bytes: 1, 2, 4 or 8.
    pub size: u8,
    pub flags: VRegFlags,
    /// Constant payload, valid when `CONST` is set.
    pub konst: i64,
    /// Physical register index within its class, after allocation.
    pub phys: Option<u8>,
    /// Spill slot index, after allocation, when `SPILLED` is set.
    pub spill_slot: Option<usize>,
}

impl VReg {
    pub fn is_const(&self) -> bool {
        self.flags.contains(VRegFlags::CONST)
    }

    pub fn is_flonum(&self) -> bool {
        self.flags.contains(VRegFlags::FLONUM)
    }

    pub fn is_unsigned(&self) -> bool {
        self.flags.contains(VRegFlags::UNSIGNED)
    }

    pub fn is_spilled(&self) -> bool {
        self.flags.contains(VRegFlags::SPILLED)
    }
}

/// Per-function pool of virtual registers.
#[derive(Debug, Clone, Default)]
pub struct VRegPool {
    vregs: Vec<VReg>,
}

impl VRegPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, size: u8, flags: VRegFlags) -> VRegId {
        self.vregs.push(VReg { size, flags, konst: 0, phys: None, spill_slot: None });
        VRegId(self.vregs.len() as u32 - 1)
    }

    pub fn add_const(&mut self, value: i64, size: u8, unsigned: bool) -> VRegId {
        let mut flags = VRegFlags::CONST;
        if unsigned {
            flags |= VRegFlags::UNSIGNED;
        }
        let id = self.add(size, flags);
        self.vregs[id.0 as usize].konst = value;
        id
    }

    pub fn get(&self, id: VRegId) -> &VReg {
        &self.vregs[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: VRegId) -> &mut VReg {
        &mut self.vregs[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.vregs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vregs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (VRegId, &VReg)> {
        self.vregs.iter().enumerate().map(|(i, v)| (VRegId(i as u32), v))
    }
}
