// ze-gdbserver - remote debug stub for Intel GPU compute devices
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! The `intelgt` architecture : no `gdbstub_arch` target
//! describes it, since its register file is generated per device from
//! the attached regset descriptors rather than being a fixed layout.
//! [`IntelGtRegisters`] is a flat byte blob serialized in `regno` order;
//! the actual feature/register breakdown is served dynamically through
//! [`crate::GpuTarget`]'s `TargetDescriptionXmlOverride` implementation
//! instead of [`Arch::target_description_xml`].

use gdbstub::arch::{Arch, RegId, Registers};

/// Uninhabited marker type selecting the `intelgt` arch parameters.
pub enum IntelGt {}

impl Arch for IntelGt {
    type Usize = u64;
    type Registers = IntelGtRegisters;
    type RegId = IntelGtRegId;
    type BreakpointKind = usize;

    fn target_description_xml() -> Option<&'static str> {
        // Served per-connection via `TargetDescriptionXmlOverride` once a
        // device's regset layout is known.
        None
    }
}

/// `g`/`G` packet payload: every register in `regno` order, back to back
/// with no padding ("regno" numbering).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IntelGtRegisters {
    pub raw: Vec<u8>,
    pub pc: u64,
}

impl Registers for IntelGtRegisters {
    type ProgramCounter = u64;

    fn pc(&self) -> u64 {
        self.pc
    }

    fn gdb_serialize(&self, mut write_byte: impl FnMut(Option<u8>)) {
        for b in &self.raw {
            write_byte(Some(*b));
        }
    }

    fn gdb_deserialize(&mut self, bytes: &[u8]) -> Result<(), ()> {
        self.raw = bytes.to_vec();
        Ok(())
    }
}

/// A `regno` as used by `fetch_registers`/`store_registers`
/// , wrapped so it implements [`RegId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntelGtRegId(pub u32);

impl RegId for IntelGtRegId {
    fn from_raw_id(id: usize) -> Option<(Self, Option<std::num::NonZeroUsize>)> {
        // Element size varies by regset (4 bytes for GRF/CE/CR/SR, 8 for
        // SBA); `None` tells gdbstub to size the read from whatever
        // `read_register` actually returns rather than a fixed hint.
        Some((IntelGtRegId(id as u32), None))
    }
}
