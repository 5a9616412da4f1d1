// ze-gdbserver - remote debug stub for Intel GPU compute devices
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! The vendor debug library boundary: an opaque dependency.
//!
//! The real implementation links against a proprietary driver (Level Zero's
//! debug extension); there is no crates.io crate for it, so it is modelled
//! as a trait. A real binding lives behind the `vendor-ffi` feature in
//! [`crate::sys`]; [`fake::FakeDriver`] is a test double used throughout
//! this crate's own test suite and by `zegdb-stub`'s integration tests.

use crate::error::AttachOutcome;
use std::fmt::Debug;

/// `(slice, subslice, eu, thread)` — the internal identity of one
/// hardware EU thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId {
    pub slice: u32,
    pub subslice: u32,
    pub eu: u32,
    pub thread: u32,
}

impl ThreadId {
    /// The all-`UINT32_MAX` tuple denoting "every thread on this device"
    /// for resume/interrupt operations (GLOSSARY, "Wildcard thread id").
    pub const WILDCARD: ThreadId = ThreadId {
        slice: u32::MAX,
        subslice: u32::MAX,
        eu: u32::MAX,
        thread: u32::MAX,
    };

    pub fn is_wildcard(self) -> bool {
        self == Self::WILDCARD
    }
}

/// Opaque driver-side handle to a physical device or sub-device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub u64);

/// Opaque driver-side handle to a debug session on an attached device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(pub u64);

/// Token returned alongside an event that requires acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AckToken(pub u64);

/// Device topology and identity.
#[derive(Debug, Clone)]
pub struct DeviceProperties {
    pub name: String,
    pub vendor_id: u32,
    pub device_id: u32,
    pub pci_slot: String,
    pub slices: u32,
    pub subslices_per_slice: u32,
    pub eus_per_subslice: u32,
    pub threads_per_eu: u32,
    pub is_subdevice: bool,
    pub subdevice_id: Option<u32>,
}

/// The twelve-ish register-set kinds the backend recognizes. Only
/// GRF/CE/CR/SR/SBA gate whether a device is "supported"; the rest are
/// modelled uniformly anyway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegsetKind {
    Grf,
    Addr,
    Flag,
    Ce,
    Sr,
    Cr,
    Tdr,
    Acc,
    Mme,
    Sp,
    Sba,
    Dbg,
    Fc,
}

impl RegsetKind {
    /// `org.gnu.gdb.intelgt.{...}` target-description feature name.
    pub fn feature_name(self) -> &'static str {
        match self {
            RegsetKind::Grf => "org.gnu.gdb.intelgt.grf",
            RegsetKind::Addr => "org.gnu.gdb.intelgt.addr",
            RegsetKind::Flag => "org.gnu.gdb.intelgt.flag",
            RegsetKind::Ce => "org.gnu.gdb.intelgt.ce",
            RegsetKind::Sr => "org.gnu.gdb.intelgt.sr",
            RegsetKind::Cr => "org.gnu.gdb.intelgt.cr",
            RegsetKind::Tdr => "org.gnu.gdb.intelgt.tdr",
            RegsetKind::Acc => "org.gnu.gdb.intelgt.acc",
            RegsetKind::Mme => "org.gnu.gdb.intelgt.mme",
            RegsetKind::Sp => "org.gnu.gdb.intelgt.sp",
            RegsetKind::Sba => "org.gnu.gdb.intelgt.sba",
            RegsetKind::Dbg => "org.gnu.gdb.intelgt.dbg",
            RegsetKind::Fc => "org.gnu.gdb.intelgt.fc",
        }
    }
}

/// One register-set descriptor, as reported by the driver.
#[derive(Debug, Clone)]
pub struct RegsetDescriptor {
    pub kind: RegsetKind,
    /// Driver-internal type code, used to address the regset in
    /// read/write calls.
    pub type_code: u32,
    pub byte_size: u32,
    pub bit_size: u32,
    pub count: u32,
    pub writable: bool,
}

/// A driver-delivered event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Detached { reason: i32 },
    ProcessEntry,
    ProcessExit,
    ModuleLoad {
        begin: u64,
        end: u64,
        load: u64,
        format: u32,
        need_ack: bool,
    },
    ModuleUnload {
        begin: u64,
        end: u64,
        need_ack: bool,
    },
    ThreadStopped(ThreadId),
    ThreadUnavailable(ThreadId),
    PageFault {
        address: u64,
        mask: u64,
        reason: u32,
    },
}

impl Event {
    pub fn needs_ack(&self) -> bool {
        match self {
            Event::ModuleLoad { need_ack, .. } | Event::ModuleUnload { need_ack, .. } => *need_ack,
            Event::ProcessEntry | Event::ProcessExit => true,
            _ => false,
        }
    }
}

/// The vendor debug library surface the core needs.
///
/// Every method here corresponds to an attach, event-queue,
/// thread-control, register-set, or memory primitive the device exposes.
pub trait DebugDriver: Debug {
    fn enumerate_devices(&self) -> Vec<DeviceHandle>;
    fn subdevices(&self, device: DeviceHandle) -> Vec<DeviceHandle>;
    fn device_properties(&self, device: DeviceHandle) -> DeviceProperties;
    fn regset_descriptors(&self, device: DeviceHandle) -> Vec<RegsetDescriptor>;

    fn attach(&self, device: DeviceHandle) -> (AttachOutcome, Option<SessionHandle>);
    fn detach(&self, session: SessionHandle);

    /// Non-blocking read of the next queued event. `None` means
    /// "not-ready" (no event currently available).
    fn read_event(&self, session: SessionHandle) -> Option<(Event, Option<AckToken>)>;
    fn acknowledge(&self, session: SessionHandle, token: AckToken);

    /// Request an interrupt. `thread == ThreadId::WILDCARD` interrupts
    /// every thread on the device.
    fn interrupt(&self, session: SessionHandle, thread: ThreadId);
    fn resume_thread(&self, session: SessionHandle, thread: ThreadId);

    fn read_registers(
        &self,
        session: SessionHandle,
        thread: ThreadId,
        regset_type: u32,
        index: u32,
        count: u32,
    ) -> Option<Vec<u8>>;
    fn write_registers(
        &self,
        session: SessionHandle,
        thread: ThreadId,
        regset_type: u32,
        index: u32,
        data: &[u8],
    ) -> bool;

    fn read_memory(
        &self,
        session: SessionHandle,
        thread: ThreadId,
        addr: u64,
        len: usize,
        addr_space: u32,
    ) -> Result<Vec<u8>, ()>;
    fn write_memory(
        &self,
        session: SessionHandle,
        thread: ThreadId,
        addr: u64,
        data: &[u8],
        addr_space: u32,
    ) -> Result<(), ()>;
}

pub mod fake;
#[cfg(feature = "vendor-ffi")]
pub mod vendor;
