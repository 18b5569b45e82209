//! Variables, value types and the machine description.

use std::fmt;

/// A virtual register: an index into [`CompilationUnit::vars`].
///
/// [`CompilationUnit::vars`]: crate::CompilationUnit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VReg(pub u32);

impl VReg {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for VReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A machine (physical) register number. Meaning is defined by [`MachDesc`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MachReg(pub u8);

impl MachReg {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for MachReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// A stack frame slot index (local or spill area), in single-slot units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(pub u32);

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[slot {}]", self.0)
    }
}

/// Source-level value type of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VmType {
    Int,
    Long,
    Float,
    Double,
    Reference,
}

impl VmType {
    /// Register class this type allocates from.
    pub fn reg_class(self) -> RegClass {
        match self {
            VmType::Int | VmType::Long | VmType::Reference => RegClass::Gp,
            VmType::Float | VmType::Double => RegClass::Fp,
        }
    }

    /// Stack slots occupied by a spilled value of this type.
    pub fn slot_count(self) -> u32 {
        match self {
            VmType::Int | VmType::Float | VmType::Reference => 1,
            VmType::Long | VmType::Double => 2,
        }
    }
}

/// Register class: general purpose or floating point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegClass {
    Gp,
    Fp,
}

/// Per-variable metadata in the compilation unit's variable table.
#[derive(Debug, Clone)]
pub struct VarInfo {
    pub vm_type: VmType,
    /// Machine register this variable is pinned to, if any. A pinned
    /// variable's interval carries a register assignment before allocation
    /// starts and the allocator never overwrites it.
    pub fixed: Option<MachReg>,
}

impl VarInfo {
    pub fn is_fixed(&self) -> bool {
        self.fixed.is_some()
    }
}

/// Machine description: the register file the allocator works against.
///
/// Register numbers are dense and unique across both classes so that a
/// `MachReg` alone identifies a register; class membership is a query here.
#[derive(Debug, Clone)]
pub struct MachDesc {
    /// Allocatable general-purpose registers, in allocation preference order.
    pub gp: Vec<MachReg>,
    /// Allocatable floating-point registers, in allocation preference order.
    pub fp: Vec<MachReg>,
    /// Caller-saved subset of the registers above.
    pub caller_saved: Vec<MachReg>,
    /// Register holding int/reference return values.
    pub ret_gp: MachReg,
    /// Register holding the high half of long return values.
    pub ret_gp_high: MachReg,
    /// Register holding float/double return values.
    pub ret_fp: MachReg,
}

impl MachDesc {
    /// Allocatable registers of a class.
    pub fn allocatable(&self, class: RegClass) -> &[MachReg] {
        match class {
            RegClass::Gp => &self.gp,
            RegClass::Fp => &self.fp,
        }
    }

    pub fn reg_class(&self, reg: MachReg) -> RegClass {
        if self.fp.contains(&reg) {
            RegClass::Fp
        } else {
            RegClass::Gp
        }
    }

    pub fn is_caller_saved(&self, reg: MachReg) -> bool {
        self.caller_saved.contains(&reg)
    }

    /// Whether `reg` carries (part of) the return value of a call whose
    /// result has type `ty`. `None` means a void call.
    pub fn is_return_reg(&self, reg: MachReg, ty: Option<VmType>) -> bool {
        match ty {
            None => false,
            Some(VmType::Int) | Some(VmType::Reference) => reg == self.ret_gp,
            Some(VmType::Long) => reg == self.ret_gp || reg == self.ret_gp_high,
            Some(VmType::Float) | Some(VmType::Double) => reg == self.ret_fp,
        }
    }
}
