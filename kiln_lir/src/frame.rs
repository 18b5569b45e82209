//! Stack frame layout: local slots, the spill slot pool, clobber slots.

use std::collections::HashMap;

use crate::error::CompileError;
use crate::types::{MachReg, RegClass, SlotId, VmType};

/// Upper bound on spill slots per method. Running out is a fatal
/// compilation error for the method.
pub const MAX_SPILL_SLOTS: u32 = 256;

/// The stack frame of one method.
///
/// Slot numbering is dense: locals first, then spill slots (which include
/// clobber slots) in allocation order. Long/double spills occupy two slots.
#[derive(Debug, Clone)]
pub struct StackFrame {
    nr_locals: u32,
    nr_spill_slots: u32,
    clobber_slots: HashMap<MachReg, SlotId>,
}

impl StackFrame {
    pub fn new(nr_locals: u32) -> StackFrame {
        StackFrame {
            nr_locals,
            nr_spill_slots: 0,
            clobber_slots: HashMap::new(),
        }
    }

    pub fn local_slot(&self, index: u32) -> SlotId {
        debug_assert!(index < self.nr_locals);
        SlotId(index)
    }

    /// Allocate a fresh spill slot for a value of type `ty`.
    pub fn get_spill_slot(&mut self, ty: VmType) -> Result<SlotId, CompileError> {
        self.alloc_spill(ty.slot_count())
    }

    /// The clobber slot for a caller-saved register, allocating it on first
    /// use. One slot per register per method.
    pub fn clobber_slot(
        &mut self,
        reg: MachReg,
        class: RegClass,
    ) -> Result<SlotId, CompileError> {
        if let Some(&slot) = self.clobber_slots.get(&reg) {
            return Ok(slot);
        }
        let width = match class {
            RegClass::Gp => 1,
            RegClass::Fp => 2,
        };
        let slot = self.alloc_spill(width)?;
        self.clobber_slots.insert(reg, slot);
        Ok(slot)
    }

    fn alloc_spill(&mut self, width: u32) -> Result<SlotId, CompileError> {
        if self.nr_spill_slots + width > MAX_SPILL_SLOTS {
            return Err(CompileError::OutOfSpillSlots);
        }
        let slot = SlotId(self.nr_locals + self.nr_spill_slots);
        self.nr_spill_slots += width;
        Ok(slot)
    }

    pub fn nr_locals(&self) -> u32 {
        self.nr_locals
    }

    /// Total slots in the frame (locals plus the spill area).
    pub fn nr_slots(&self) -> u32 {
        self.nr_locals + self.nr_spill_slots
    }
}
