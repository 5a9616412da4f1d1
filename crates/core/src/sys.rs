// ze-gdbserver - remote debug stub for Intel GPU compute devices
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Real binding to the vendor debug library, an opaque dependency,
//! compiled only behind the `vendor-ffi` feature. Nothing
//! in this module is exercised by the test suite; [`crate::driver::fake`]
//! stands in for it everywhere else, the way `RecordingPeripheral` stands
//! in for real hardware elsewhere in this codebase's test doubles.
//!
//! The vendor library is Level Zero's debug extension
//! (`zet_debug_*`/`zetDebug*`): opaque `ze_driver_handle_t` /
//! `ze_device_handle_t` / `zet_debug_session_handle_t` pointers, a
//! polling event-queue call, and register/memory read-write calls keyed
//! by a `zet_debug_regset_properties_t` type code. There is no
//! crates.io binding for it, so the signatures are declared directly
//! against the vendor headers rather than generated.

#![cfg(feature = "vendor-ffi")]

use std::os::raw::{c_int, c_void};

pub type ZeResult = c_int;
pub const ZE_RESULT_SUCCESS: ZeResult = 0;
pub const ZE_RESULT_NOT_READY: ZeResult = 0x7800_0001u32 as i32;
pub const ZE_RESULT_ERROR_UNSUPPORTED_FEATURE: ZeResult = 0x7800_0002u32 as i32;
pub const ZE_RESULT_ERROR_NOT_AVAILABLE: ZeResult = 0x7800_0003u32 as i32;

#[repr(C)]
pub struct ZeDriverHandleT(c_void);
#[repr(C)]
pub struct ZeDeviceHandleT(c_void);
#[repr(C)]
pub struct ZetDebugSessionHandleT(c_void);

pub type ZeDriverHandle = *mut ZeDriverHandleT;
pub type ZeDeviceHandle = *mut ZeDeviceHandleT;
pub type ZetDebugSessionHandle = *mut ZetDebugSessionHandleT;

#[repr(C)]
#[derive(Default)]
pub struct ZetDeviceDebugProperties {
    pub flags: u32,
}

#[repr(C)]
pub struct ZetDebugConfig {
    pub pid: u32,
}

#[repr(C)]
#[derive(Default)]
pub struct ZetDebugRegsetProperties {
    pub ty: u32,
    pub version: u32,
    pub generic_flags: u32,
    pub byte_size: u32,
    pub bit_size: u32,
    pub count: u32,
}

#[repr(C)]
pub struct ZetDebugEvent {
    pub ty: u32,
    pub flags: u32,
    pub info: ZetDebugEventInfo,
}

#[repr(C)]
pub union ZetDebugEventInfo {
    pub detached: ZetDebugEventInfoDetached,
    pub thread: ZetDebugEventInfoThread,
    pub module: ZetDebugEventInfoModule,
    pub page_fault: ZetDebugEventInfoPageFault,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct ZetDebugEventInfoDetached {
    pub reason: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct ZetDebugEventInfoThread {
    pub thread: ZetDebugThreadId,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct ZetDebugEventInfoModule {
    pub load: u64,
    pub module_begin: u64,
    pub module_end: u64,
    pub format: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct ZetDebugEventInfoPageFault {
    pub address: u64,
    pub mask: u64,
    pub reason: u32,
}

#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ZetDebugThreadId {
    pub slice: u32,
    pub subslice: u32,
    pub eu: u32,
    pub thread: u32,
}

#[link(name = "ze_loader")]
extern "C" {
    pub fn zeDriverGet(count: *mut u32, drivers: *mut ZeDriverHandle) -> ZeResult;
    pub fn zeDeviceGet(driver: ZeDriverHandle, count: *mut u32, devices: *mut ZeDeviceHandle) -> ZeResult;
    pub fn zeDeviceGetSubDevices(device: ZeDeviceHandle, count: *mut u32, devices: *mut ZeDeviceHandle) -> ZeResult;

    pub fn zetDebugAttach(
        device: ZeDeviceHandle,
        config: *const ZetDebugConfig,
        session: *mut ZetDebugSessionHandle,
    ) -> ZeResult;
    pub fn zetDebugDetach(session: ZetDebugSessionHandle) -> ZeResult;

    pub fn zetDebugGetRegisterSetProperties(
        device: ZeDeviceHandle,
        count: *mut u32,
        properties: *mut ZetDebugRegsetProperties,
    ) -> ZeResult;

    pub fn zetDebugReadEvent(session: ZetDebugSessionHandle, timeout_ns: u64, event: *mut ZetDebugEvent) -> ZeResult;
    pub fn zetDebugAcknowledgeEvent(session: ZetDebugSessionHandle, event: *const ZetDebugEvent) -> ZeResult;

    pub fn zetDebugInterrupt(session: ZetDebugSessionHandle, thread: ZetDebugThreadId) -> ZeResult;
    pub fn zetDebugResume(session: ZetDebugSessionHandle, thread: ZetDebugThreadId) -> ZeResult;

    pub fn zetDebugReadRegisters(
        session: ZetDebugSessionHandle,
        thread: ZetDebugThreadId,
        ty: u32,
        start: u32,
        count: u32,
        values: *mut c_void,
    ) -> ZeResult;
    pub fn zetDebugWriteRegisters(
        session: ZetDebugSessionHandle,
        thread: ZetDebugThreadId,
        ty: u32,
        start: u32,
        count: u32,
        values: *const c_void,
    ) -> ZeResult;

    pub fn zetDebugReadMemory(
        session: ZetDebugSessionHandle,
        thread: ZetDebugThreadId,
        addr_space: u32,
        address: u64,
        size: usize,
        buffer: *mut c_void,
    ) -> ZeResult;
    pub fn zetDebugWriteMemory(
        session: ZetDebugSessionHandle,
        thread: ZetDebugThreadId,
        addr_space: u32,
        address: u64,
        size: usize,
        buffer: *const c_void,
    ) -> ZeResult;
}
