// ze-gdbserver - remote debug stub for Intel GPU compute devices
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! The Intel GT backend: step/continue/breakpoint-suppress
//! encoding into Control Register 0, stop-reason classification from CR0,
//! and register-set target-description selection.
//!
//! The two-layer design — a generic multi-device core plus one
//! device-family backend — is expressed as a trait; a single
//! implementation, [`IntelGtBackend`], is all this repository needs.

use crate::driver::{DebugDriver, DeviceProperties, RegsetDescriptor, RegsetKind, SessionHandle, ThreadId};
use crate::error::TargetError;
use crate::thread::{ResumeState, Signal, StopReason};

/// CR0 subregister index within the `Cr` regset: control word.
const CR0_0: u32 = 0;
/// CR0 subregister index: status/exception bits.
const CR0_1: u32 = 1;
/// CR0 subregister index: PC offset from `isabase`.
const CR0_2: u32 = 2;

const CR0_1_BIT_BREAKPOINT_STATUS: u32 = 31;
const CR0_1_BIT_EXTERNAL_HALT: u32 = 30;
const CR0_1_BIT_ILLEGAL_OPCODE: u32 = 28;
const CR0_1_BIT_FORCE_EXCEPTION: u32 = 26;
const CR0_0_BIT_BREAKPOINT_SUPPRESS: u32 = 15;

const SBA_INDEX_ISABASE: u32 = 4;

/// Regset type codes. The exact numeric values only need to be stable
/// within this crate and the driver it talks to; they are not part of
/// any wire format.
pub mod regset_type {
    pub const GRF: u32 = 0;
    pub const ADDR: u32 = 1;
    pub const FLAG: u32 = 2;
    pub const CE: u32 = 3;
    pub const SR: u32 = 4;
    pub const CR: u32 = 5;
    pub const TDR: u32 = 6;
    pub const ACC: u32 = 7;
    pub const MME: u32 = 8;
    pub const SP: u32 = 9;
    pub const SBA: u32 = 10;
    pub const DBG: u32 = 11;
    pub const FC: u32 = 12;
}

/// One contiguous run of logical register numbers backed by a single
/// regset, found by binary-searching the thread's regset_info vector.
#[derive(Debug, Clone)]
pub struct RegsetRange {
    pub regno_start: u32,
    pub regno_end: u32,
    pub kind: RegsetKind,
    pub type_code: u32,
    pub elem_size: u32,
    pub writable: bool,
}

/// Per-device regset layout, shared immutably between threads that have
/// the same layout.
#[derive(Debug, Default)]
pub struct RegsetInfo {
    pub ranges: Vec<RegsetRange>,
}

impl RegsetInfo {
    /// Binary search for the range containing `regno`, returning
    /// `(type_code, index_within_regset, elem_size)`.
    pub fn lookup(&self, regno: u32) -> Option<(u32, u32, u32)> {
        let idx = self
            .ranges
            .binary_search_by(|r| {
                if regno < r.regno_start {
                    std::cmp::Ordering::Greater
                } else if regno >= r.regno_end {
                    std::cmp::Ordering::Less
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .ok()?;
        let r = &self.ranges[idx];
        Some((r.type_code, regno - r.regno_start, r.elem_size))
    }

    pub fn total_registers(&self) -> u32 {
        self.ranges.last().map(|r| r.regno_end).unwrap_or(0)
    }

    /// Whether `regno` falls in a writable regset. `None` if `regno` is
    /// not backed by any regset.
    pub fn writable(&self, regno: u32) -> Option<bool> {
        self.ranges
            .iter()
            .find(|r| regno >= r.regno_start && regno < r.regno_end)
            .map(|r| r.writable)
    }
}

#[derive(Debug, Clone)]
pub struct FeatureBlock {
    pub name: &'static str,
    pub register_count: u32,
    /// Unsigned-integer element bit width, rounded up to the next power
    /// of two in `{8,16,...,8192}`.
    pub element_bits: u32,
}

#[derive(Debug, Clone)]
pub struct DeviceAttrs {
    pub vendor_id: u32,
    pub target_id: u32,
    pub subdevice_id: Option<u32>,
    pub pci_slot: String,
    pub total_cores: u32,
    pub total_threads: u32,
    pub device_name: String,
}

/// The in-memory target description emitted to the debugger.
#[derive(Debug, Clone)]
pub struct TargetDescription {
    pub arch: &'static str,
    pub osabi: &'static str,
    pub device_attrs: DeviceAttrs,
    pub features: Vec<FeatureBlock>,
}

/// Round a bit width up to the next power of two in
/// `{8,16,32,64,128,256,512,1024,2048,4096,8192}`.
pub fn round_up_element_bits(bit_size: u32) -> u32 {
    const SIZES: [u32; 11] = [8, 16, 32, 64, 128, 256, 512, 1024, 2048, 4096, 8192];
    SIZES
        .into_iter()
        .find(|&s| s >= bit_size)
        .unwrap_or(8192)
}

/// The minimum regset set a device must expose to be considered
/// supported.
pub fn has_minimum_regsets(regsets: &[RegsetDescriptor]) -> bool {
    let kinds: std::collections::HashSet<RegsetKind> = regsets.iter().map(|r| r.kind).collect();
    let has_core = [RegsetKind::Grf, RegsetKind::Ce, RegsetKind::Cr, RegsetKind::Sr]
        .iter()
        .all(|k| kinds.contains(k));
    let sba_ok = regsets
        .iter()
        .any(|r| r.kind == RegsetKind::Sba && r.count > SBA_INDEX_ISABASE);
    has_core && sba_ok
}

/// The device-family backend interface.
pub trait GpuBackend {
    fn is_device_supported(&self, props: &DeviceProperties, regsets: &[RegsetDescriptor]) -> bool;

    fn create_tdesc(
        &self,
        props: &DeviceProperties,
        regsets: &[RegsetDescriptor],
    ) -> (TargetDescription, RegsetInfo);

    /// Classify and clear the stop reason recorded in CR0, returning the
    /// `(StopReason, Signal)` pair.
    fn get_stop_reason(
        &self,
        driver: &dyn DebugDriver,
        session: SessionHandle,
        thread: ThreadId,
        last_resume_state: ResumeState,
    ) -> Option<(StopReason, Signal)>;

    /// Write the CR0 bits that encode step/continue and
    /// breakpoint-suppress. `is_step` selects single-step vs. continue.
    fn prepare_thread_resume(
        &self,
        driver: &dyn DebugDriver,
        session: SessionHandle,
        thread: ThreadId,
        is_step: bool,
    ) -> bool;

    fn is_at_breakpoint(&self, driver: &dyn DebugDriver, session: SessionHandle, thread: ThreadId) -> bool;

    fn is_at_eot(&self, driver: &dyn DebugDriver, session: SessionHandle, thread: ThreadId) -> bool;

    fn read_pc(
        &self,
        driver: &dyn DebugDriver,
        session: SessionHandle,
        thread: ThreadId,
    ) -> Result<u64, TargetError>;

    fn write_pc(
        &self,
        driver: &dyn DebugDriver,
        session: SessionHandle,
        thread: ThreadId,
        pc: u64,
    ) -> Result<(), TargetError>;
}

#[derive(Debug, Default)]
pub struct IntelGtBackend;

impl IntelGtBackend {
    fn read_cr0_sub(&self, driver: &dyn DebugDriver, session: SessionHandle, thread: ThreadId, sub: u32) -> Option<u32> {
        let bytes = driver.read_registers(session, thread, regset_type::CR, sub, 1)?;
        Some(u32::from_le_bytes(bytes.try_into().ok()?))
    }

    fn write_cr0_sub(&self, driver: &dyn DebugDriver, session: SessionHandle, thread: ThreadId, sub: u32, val: u32) -> bool {
        driver.write_registers(session, thread, regset_type::CR, sub, &val.to_le_bytes())
    }

    fn isabase(&self, driver: &dyn DebugDriver, session: SessionHandle, thread: ThreadId) -> Option<u64> {
        let bytes = driver.read_registers(session, thread, regset_type::SBA, SBA_INDEX_ISABASE, 1)?;
        Some(u64::from_le_bytes(bytes.try_into().ok()?))
    }

    /// Read up to 16 bytes at `pc`, falling back to 8.
    fn read_instruction(&self, driver: &dyn DebugDriver, session: SessionHandle, thread: ThreadId, pc: u64) -> Option<Vec<u8>> {
        if let Ok(bytes) = driver.read_memory(session, thread, pc, 16, 0) {
            return Some(bytes);
        }
        driver.read_memory(session, thread, pc, 8, 0).ok()
    }
}

fn decode_opcode(bytes: &[u8]) -> u8 {
    bytes.first().copied().unwrap_or(0) & 0x3F
}

const OPC_SEND: u8 = 0x31;
const OPC_SENDC: u8 = 0x32;

fn eot_flag(bytes: &[u8]) -> bool {
    bytes.len() >= 5 && (bytes[4] >> 2) & 1 == 1
}

/// Breakpoint-present bit. The real encoding is vendor-proprietary and
/// out of scope: SW-breakpoint insertion is an external collaborator's
/// job. This crate only needs to detect presence, so bit 0 of
/// the first instruction byte is used as the marker the breakpoint
/// inserter sets.
fn has_breakpoint_bit(bytes: &[u8]) -> bool {
    bytes.first().is_some_and(|b| b & 1 == 1)
}

impl GpuBackend for IntelGtBackend {
    fn is_device_supported(&self, _props: &DeviceProperties, regsets: &[RegsetDescriptor]) -> bool {
        has_minimum_regsets(regsets)
    }

    fn create_tdesc(
        &self,
        props: &DeviceProperties,
        regsets: &[RegsetDescriptor],
    ) -> (TargetDescription, RegsetInfo) {
        let mut ranges = Vec::with_capacity(regsets.len());
        let mut features = Vec::with_capacity(regsets.len());
        let mut next_regno = 0u32;
        for r in regsets {
            let start = next_regno;
            next_regno += r.count;
            ranges.push(RegsetRange {
                regno_start: start,
                regno_end: next_regno,
                kind: r.kind,
                type_code: r.type_code,
                elem_size: r.byte_size,
                writable: r.writable,
            });
            features.push(FeatureBlock {
                name: r.kind.feature_name(),
                register_count: r.count,
                element_bits: round_up_element_bits(r.bit_size),
            });
        }
        let attrs = DeviceAttrs {
            vendor_id: props.vendor_id,
            target_id: props.device_id,
            subdevice_id: props.subdevice_id,
            pci_slot: props.pci_slot.clone(),
            total_cores: props.slices * props.subslices_per_slice * props.eus_per_subslice,
            total_threads: props.slices
                * props.subslices_per_slice
                * props.eus_per_subslice
                * props.threads_per_eu,
            device_name: props.name.clone(),
        };
        let tdesc = TargetDescription {
            arch: "intelgt",
            osabi: "GNU/Linux",
            device_attrs: attrs,
            features,
        };
        (tdesc, RegsetInfo { ranges })
    }

    fn get_stop_reason(
        &self,
        driver: &dyn DebugDriver,
        session: SessionHandle,
        thread: ThreadId,
        last_resume_state: ResumeState,
    ) -> Option<(StopReason, Signal)> {
        let cr0_1 = self.read_cr0_sub(driver, session, thread, CR0_1)?;

        let bp = (cr0_1 >> CR0_1_BIT_BREAKPOINT_STATUS) & 1 != 0;
        let halt = (cr0_1 >> CR0_1_BIT_EXTERNAL_HALT) & 1 != 0;
        let illegal = (cr0_1 >> CR0_1_BIT_ILLEGAL_OPCODE) & 1 != 0;
        let force_exc = (cr0_1 >> CR0_1_BIT_FORCE_EXCEPTION) & 1 != 0;

        let cleared = cr0_1
            & !(1 << CR0_1_BIT_BREAKPOINT_STATUS)
            & !(1 << CR0_1_BIT_EXTERNAL_HALT)
            & !(1 << CR0_1_BIT_ILLEGAL_OPCODE)
            & !(1 << CR0_1_BIT_FORCE_EXCEPTION);
        self.write_cr0_sub(driver, session, thread, CR0_1, cleared);

        let result = if bp {
            let reason = if last_resume_state == ResumeState::Step {
                StopReason::SingleStep
            } else {
                StopReason::SwBreakpoint
            };
            (reason, Signal::TRAP)
        } else if illegal {
            (StopReason::None, Signal::ILL)
        } else if force_exc || halt {
            (StopReason::None, Signal::INT)
        } else {
            (StopReason::None, Signal::NONE)
        };
        Some(result)
    }

    fn prepare_thread_resume(
        &self,
        driver: &dyn DebugDriver,
        session: SessionHandle,
        thread: ThreadId,
        is_step: bool,
    ) -> bool {
        if is_step && self.is_at_eot(driver, session, thread) {
            // Stepping a thread parked at EOT never completes: dispatch
            // ends and no step-done event will ever arrive.
            return false;
        }

        let Some(cr0_1) = self.read_cr0_sub(driver, session, thread, CR0_1) else {
            return false;
        };
        let cleared = cr0_1
            & !(1 << CR0_1_BIT_EXTERNAL_HALT)
            & !(1 << CR0_1_BIT_ILLEGAL_OPCODE)
            & !(1 << CR0_1_BIT_FORCE_EXCEPTION);
        let new_cr0_1 = if is_step {
            cleared | (1 << CR0_1_BIT_BREAKPOINT_STATUS)
        } else {
            cleared & !(1 << CR0_1_BIT_BREAKPOINT_STATUS)
        };
        if !self.write_cr0_sub(driver, session, thread, CR0_1, new_cr0_1) {
            return false;
        }

        let suppress = self.is_at_breakpoint(driver, session, thread);
        if let Some(cr0_0) = self.read_cr0_sub(driver, session, thread, CR0_0) {
            let new_cr0_0 = if suppress {
                cr0_0 | (1 << CR0_0_BIT_BREAKPOINT_SUPPRESS)
            } else {
                cr0_0 & !(1 << CR0_0_BIT_BREAKPOINT_SUPPRESS)
            };
            self.write_cr0_sub(driver, session, thread, CR0_0, new_cr0_0);
        }
        true
    }

    fn is_at_breakpoint(&self, driver: &dyn DebugDriver, session: SessionHandle, thread: ThreadId) -> bool {
        let Ok(pc) = self.read_pc(driver, session, thread) else {
            return false;
        };
        match self.read_instruction(driver, session, thread, pc) {
            Some(bytes) => has_breakpoint_bit(&bytes),
            None => false,
        }
    }

    fn is_at_eot(&self, driver: &dyn DebugDriver, session: SessionHandle, thread: ThreadId) -> bool {
        let Ok(pc) = self.read_pc(driver, session, thread) else {
            return false;
        };
        let Some(bytes) = self.read_instruction(driver, session, thread, pc) else {
            return false;
        };
        let opcode = decode_opcode(&bytes);
        (opcode == OPC_SEND || opcode == OPC_SENDC) && eot_flag(&bytes)
    }

    fn read_pc(&self, driver: &dyn DebugDriver, session: SessionHandle, thread: ThreadId) -> Result<u64, TargetError> {
        let isabase = self
            .isabase(driver, session, thread)
            .ok_or_else(|| TargetError::NoSuchThread(format!("{thread:?}")))?;
        let offset = self
            .read_cr0_sub(driver, session, thread, CR0_2)
            .ok_or_else(|| TargetError::NoSuchThread(format!("{thread:?}")))?;
        Ok(isabase + offset as u64)
    }

    fn write_pc(
        &self,
        driver: &dyn DebugDriver,
        session: SessionHandle,
        thread: ThreadId,
        pc: u64,
    ) -> Result<(), TargetError> {
        let isabase = self
            .isabase(driver, session, thread)
            .ok_or_else(|| TargetError::NoSuchThread(format!("{thread:?}")))?;
        if pc < isabase {
            return Err(TargetError::PcOutOfRange(pc, isabase));
        }
        let offset = pc - isabase;
        if offset > u32::MAX as u64 {
            return Err(TargetError::PcOutOfRange(pc, isabase));
        }
        self.write_cr0_sub(driver, session, thread, CR0_2, offset as u32);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_element_bits_up() {
        assert_eq!(round_up_element_bits(1), 8);
        assert_eq!(round_up_element_bits(8), 8);
        assert_eq!(round_up_element_bits(9), 16);
        assert_eq!(round_up_element_bits(33), 64);
        assert_eq!(round_up_element_bits(9000), 8192);
    }

    #[test]
    fn eot_detected_on_send_with_flag() {
        let mut bytes = vec![0u8; 8];
        bytes[0] = OPC_SEND;
        bytes[4] = 0b0000_0100; // bit 2 of byte 4 == bit 34 overall
        assert!(eot_flag(&bytes));
        assert_eq!(decode_opcode(&bytes), OPC_SEND);
    }

    #[test]
    fn non_send_opcode_is_not_eot_even_with_bit_set() {
        let mut bytes = vec![0u8; 8];
        bytes[0] = 0x10;
        bytes[4] = 0b0000_0100;
        assert_eq!(decode_opcode(&bytes), 0x10);
    }

    use crate::driver::fake::FakeDriver;
    use crate::driver::{DeviceProperties, RegsetDescriptor, RegsetKind, SessionHandle, ThreadId};

    fn props() -> DeviceProperties {
        DeviceProperties {
            name: "Test GPU".into(),
            vendor_id: 0x8086,
            device_id: 1,
            pci_slot: "0000:00:02.0".into(),
            slices: 1,
            subslices_per_slice: 1,
            eus_per_subslice: 1,
            threads_per_eu: 1,
            is_subdevice: false,
            subdevice_id: None,
        }
    }

    fn regsets() -> Vec<RegsetDescriptor> {
        vec![
            RegsetDescriptor { kind: RegsetKind::Cr, type_code: regset_type::CR, byte_size: 4, bit_size: 32, count: 3, writable: true },
            // Writable in this test fixture only, so the test can poke
            // `isabase` directly; the real device's SBA regset is read-only.
            RegsetDescriptor { kind: RegsetKind::Sba, type_code: regset_type::SBA, byte_size: 8, bit_size: 64, count: 10, writable: true },
        ]
    }

    /// `is_at_breakpoint` falls back from a 16-byte instruction read to an
    /// 8-byte one when only the shorter read succeeds.
    #[test]
    fn breakpoint_check_falls_back_to_8_byte_read() {
        let driver = FakeDriver::new();
        let handle = driver.add_device(props(), regsets());
        let session = SessionHandle(handle.0);
        let tid = ThreadId { slice: 0, subslice: 0, eu: 0, thread: 0 };

        driver.write_registers(session, tid, regset_type::SBA, SBA_INDEX_ISABASE, &0u64.to_le_bytes());
        driver.write_registers(session, tid, regset_type::CR, CR0_2, &0u32.to_le_bytes());
        driver.write_memory(session, tid, 0, &[0x01, 0, 0, 0, 0, 0, 0, 0], 0).unwrap();
        driver.mark_unreadable(handle, 8, 16);

        let backend = IntelGtBackend;
        assert!(backend.is_at_breakpoint(&driver, session, tid));
    }

    /// Neither a 16- nor an 8-byte read succeeding means the thread is
    /// treated as not-at-breakpoint.
    #[test]
    fn breakpoint_check_unreadable_at_any_size_is_not_at_breakpoint() {
        let driver = FakeDriver::new();
        let handle = driver.add_device(props(), regsets());
        let session = SessionHandle(handle.0);
        let tid = ThreadId { slice: 0, subslice: 0, eu: 0, thread: 0 };

        driver.write_registers(session, tid, regset_type::SBA, SBA_INDEX_ISABASE, &0u64.to_le_bytes());
        driver.write_registers(session, tid, regset_type::CR, CR0_2, &0u32.to_le_bytes());
        driver.mark_unreadable(handle, 0, 16);

        let backend = IntelGtBackend;
        assert!(!backend.is_at_breakpoint(&driver, session, tid));
    }
}
