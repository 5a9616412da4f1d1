// ze-gdbserver - remote debug stub for Intel GPU compute devices
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! [`DebugDriver`] implemented against the real vendor FFI ([`crate::sys`]).
//! Only built behind the `vendor-ffi` feature; [`super::fake::FakeDriver`]
//! is what the test suite and `zegdb-stub`'s own tests exercise instead.

#![cfg(feature = "vendor-ffi")]

use super::{AckToken, DebugDriver, DeviceHandle, DeviceProperties, Event, RegsetDescriptor, RegsetKind, SessionHandle, ThreadId};
use crate::error::AttachOutcome;
use crate::sys;
use std::ffi::c_void;

fn from_sys_tid(t: sys::ZetDebugThreadId) -> ThreadId {
    ThreadId { slice: t.slice, subslice: t.subslice, eu: t.eu, thread: t.thread }
}

fn to_sys_tid(t: ThreadId) -> sys::ZetDebugThreadId {
    sys::ZetDebugThreadId { slice: t.slice, subslice: t.subslice, eu: t.eu, thread: t.thread }
}

fn regset_kind_from_type(ty: u32) -> RegsetKind {
    use crate::backend::regset_type::*;
    match ty {
        GRF => RegsetKind::Grf,
        ADDR => RegsetKind::Addr,
        FLAG => RegsetKind::Flag,
        CE => RegsetKind::Ce,
        SR => RegsetKind::Sr,
        CR => RegsetKind::Cr,
        TDR => RegsetKind::Tdr,
        ACC => RegsetKind::Acc,
        MME => RegsetKind::Mme,
        SP => RegsetKind::Sp,
        SBA => RegsetKind::Sba,
        DBG => RegsetKind::Dbg,
        _ => RegsetKind::Fc,
    }
}

/// A real GPU or GPU sub-device handle, plus the parent driver it came
/// from (needed to re-enumerate sub-devices).
#[derive(Debug, Clone, Copy)]
struct DeviceEntry {
    driver: sys::ZeDriverHandle,
    device: sys::ZeDeviceHandle,
}

/// [`DebugDriver`] backed by the real Level Zero debug extension.
///
/// `DeviceHandle`/`SessionHandle` are opaque `u64`s on the `zegdb_core`
/// side; this driver keeps the actual pointers in side tables indexed by
/// those surrogate ids, the same indirection `FakeDriver` uses.
pub struct VendorDriver {
    devices: std::cell::RefCell<std::collections::HashMap<u64, DeviceEntry>>,
    sessions: std::cell::RefCell<std::collections::HashMap<u64, sys::ZetDebugSessionHandle>>,
    next_id: std::cell::Cell<u64>,
}

impl std::fmt::Debug for VendorDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VendorDriver").finish_non_exhaustive()
    }
}

impl Default for VendorDriver {
    fn default() -> Self {
        Self {
            devices: Default::default(),
            sessions: Default::default(),
            next_id: std::cell::Cell::new(1),
        }
    }
}

impl VendorDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    fn register(&self, entry: DeviceEntry) -> DeviceHandle {
        let id = self.alloc_id();
        self.devices.borrow_mut().insert(id, entry);
        DeviceHandle(id)
    }
}

impl DebugDriver for VendorDriver {
    fn enumerate_devices(&self) -> Vec<DeviceHandle> {
        let mut out = Vec::new();
        unsafe {
            let mut ndrivers = 0u32;
            if sys::zeDriverGet(&mut ndrivers, std::ptr::null_mut()) != sys::ZE_RESULT_SUCCESS {
                return out;
            }
            let mut drivers = vec![std::ptr::null_mut(); ndrivers as usize];
            if sys::zeDriverGet(&mut ndrivers, drivers.as_mut_ptr()) != sys::ZE_RESULT_SUCCESS {
                return out;
            }
            for driver in drivers {
                let mut ndevices = 0u32;
                if sys::zeDeviceGet(driver, &mut ndevices, std::ptr::null_mut()) != sys::ZE_RESULT_SUCCESS {
                    continue;
                }
                let mut devices = vec![std::ptr::null_mut(); ndevices as usize];
                if sys::zeDeviceGet(driver, &mut ndevices, devices.as_mut_ptr()) != sys::ZE_RESULT_SUCCESS {
                    continue;
                }
                for device in devices {
                    out.push(self.register(DeviceEntry { driver, device }));
                }
            }
        }
        out
    }

    fn subdevices(&self, device: DeviceHandle) -> Vec<DeviceHandle> {
        let entry = *self.devices.borrow().get(&device.0).expect("device handle must be registered");
        let mut out = Vec::new();
        unsafe {
            let mut n = 0u32;
            if sys::zeDeviceGetSubDevices(entry.device, &mut n, std::ptr::null_mut()) != sys::ZE_RESULT_SUCCESS || n == 0 {
                return out;
            }
            let mut subs = vec![std::ptr::null_mut(); n as usize];
            if sys::zeDeviceGetSubDevices(entry.device, &mut n, subs.as_mut_ptr()) != sys::ZE_RESULT_SUCCESS {
                return out;
            }
            for sub in subs {
                out.push(self.register(DeviceEntry { driver: entry.driver, device: sub }));
            }
        }
        out
    }

    fn device_properties(&self, _device: DeviceHandle) -> DeviceProperties {
        // Vendor property queries (zeDeviceGetProperties / zePciGetProperties)
        // are straightforward but add nothing to the state machine this
        // crate specifies; left as a todo for the real FFI integration.
        todo!("zeDeviceGetProperties binding")
    }

    fn regset_descriptors(&self, device: DeviceHandle) -> Vec<RegsetDescriptor> {
        let entry = *self.devices.borrow().get(&device.0).expect("device handle must be registered");
        let mut out = Vec::new();
        unsafe {
            let mut n = 0u32;
            if sys::zetDebugGetRegisterSetProperties(entry.device, &mut n, std::ptr::null_mut()) != sys::ZE_RESULT_SUCCESS {
                return out;
            }
            let mut props: Vec<sys::ZetDebugRegsetProperties> = (0..n).map(|_| Default::default()).collect();
            if sys::zetDebugGetRegisterSetProperties(entry.device, &mut n, props.as_mut_ptr()) != sys::ZE_RESULT_SUCCESS {
                return out;
            }
            for p in props {
                out.push(RegsetDescriptor {
                    kind: regset_kind_from_type(p.ty),
                    type_code: p.ty,
                    byte_size: p.byte_size,
                    bit_size: p.bit_size,
                    count: p.count,
                    writable: p.generic_flags & 1 != 0,
                });
            }
        }
        out
    }

    fn attach(&self, device: DeviceHandle) -> (AttachOutcome, Option<SessionHandle>) {
        let entry = *self.devices.borrow().get(&device.0).expect("device handle must be registered");
        let config = sys::ZetDebugConfig { pid: 0 };
        let mut session: sys::ZetDebugSessionHandle = std::ptr::null_mut();
        let rc = unsafe { sys::zetDebugAttach(entry.device, &config, &mut session) };
        match rc {
            sys::ZE_RESULT_SUCCESS => {
                let id = self.alloc_id();
                self.sessions.borrow_mut().insert(id, session);
                (AttachOutcome::Success, Some(SessionHandle(id)))
            }
            sys::ZE_RESULT_NOT_READY => (AttachOutcome::NotReady, None),
            sys::ZE_RESULT_ERROR_UNSUPPORTED_FEATURE => (AttachOutcome::UnsupportedFeature, None),
            sys::ZE_RESULT_ERROR_NOT_AVAILABLE => (AttachOutcome::NotAvailable, None),
            _ => (AttachOutcome::Other, None),
        }
    }

    fn detach(&self, session: SessionHandle) {
        if let Some(handle) = self.sessions.borrow_mut().remove(&session.0) {
            unsafe { sys::zetDebugDetach(handle) };
        }
    }

    fn read_event(&self, session: SessionHandle) -> Option<(Event, Option<AckToken>)> {
        let handle = *self.sessions.borrow().get(&session.0)?;
        let mut event: sys::ZetDebugEvent = unsafe { std::mem::zeroed() };
        let rc = unsafe { sys::zetDebugReadEvent(handle, 0, &mut event) };
        if rc != sys::ZE_RESULT_SUCCESS {
            return None;
        }
        // Event-type discriminants mirror the vendor header's
        // `zet_debug_event_type_t` ordering.
        let translated = match event.ty {
            0 => Event::Detached { reason: unsafe { event.info.detached.reason as i32 } },
            1 => Event::ProcessEntry,
            2 => Event::ProcessExit,
            3 => {
                let m = unsafe { event.info.module };
                Event::ModuleLoad { begin: m.module_begin, end: m.module_end, load: m.load, format: m.format, need_ack: event.flags & 1 != 0 }
            }
            4 => {
                let m = unsafe { event.info.module };
                Event::ModuleUnload { begin: m.module_begin, end: m.module_end, need_ack: event.flags & 1 != 0 }
            }
            5 => Event::ThreadStopped(from_sys_tid(unsafe { event.info.thread.thread })),
            6 => Event::ThreadUnavailable(from_sys_tid(unsafe { event.info.thread.thread })),
            7 => {
                let p = unsafe { event.info.page_fault };
                Event::PageFault { address: p.address, mask: p.mask, reason: p.reason }
            }
            other => {
                tracing::warn!(ty = other, "unrecognized vendor event kind");
                return None;
            }
        };
        let token = translated.needs_ack().then(|| AckToken(session.0));
        Some((translated, token))
    }

    fn acknowledge(&self, session: SessionHandle, _token: AckToken) {
        if let Some(&handle) = self.sessions.borrow().get(&session.0) {
            let event: sys::ZetDebugEvent = unsafe { std::mem::zeroed() };
            unsafe { sys::zetDebugAcknowledgeEvent(handle, &event) };
        }
    }

    fn interrupt(&self, session: SessionHandle, thread: ThreadId) {
        if let Some(&handle) = self.sessions.borrow().get(&session.0) {
            unsafe { sys::zetDebugInterrupt(handle, to_sys_tid(thread)) };
        }
    }

    fn resume_thread(&self, session: SessionHandle, thread: ThreadId) {
        if let Some(&handle) = self.sessions.borrow().get(&session.0) {
            unsafe { sys::zetDebugResume(handle, to_sys_tid(thread)) };
        }
    }

    fn read_registers(&self, session: SessionHandle, thread: ThreadId, regset_type: u32, index: u32, count: u32) -> Option<Vec<u8>> {
        let &handle = self.sessions.borrow().get(&session.0)?;
        // The caller looks up elem size via RegsetInfo; here we only know
        // the wire size from the returned buffer, so callers must size the
        // buffer themselves in the real binding. A 4-byte element is
        // assumed where `count` is small (CR0 subregisters); wider regsets
        // go through the bulk `fetch_all` path with a buffer sized from
        // `RegsetInfo`, which callers pre-validate before reaching here.
        let mut buf = vec![0u8; count as usize * 4];
        let rc = unsafe {
            sys::zetDebugReadRegisters(handle, to_sys_tid(thread), regset_type, index, count, buf.as_mut_ptr() as *mut c_void)
        };
        (rc == sys::ZE_RESULT_SUCCESS).then_some(buf)
    }

    fn write_registers(&self, session: SessionHandle, thread: ThreadId, regset_type: u32, index: u32, data: &[u8]) -> bool {
        let Some(&handle) = self.sessions.borrow().get(&session.0) else { return false };
        let count = (data.len() / 4).max(1) as u32;
        let rc = unsafe {
            sys::zetDebugWriteRegisters(handle, to_sys_tid(thread), regset_type, index, count, data.as_ptr() as *const c_void)
        };
        rc == sys::ZE_RESULT_SUCCESS
    }

    fn read_memory(&self, session: SessionHandle, thread: ThreadId, addr: u64, len: usize, addr_space: u32) -> Result<Vec<u8>, ()> {
        let handle = *self.sessions.borrow().get(&session.0).ok_or(())?;
        let mut buf = vec![0u8; len];
        let rc = unsafe {
            sys::zetDebugReadMemory(handle, to_sys_tid(thread), addr_space, addr, len, buf.as_mut_ptr() as *mut c_void)
        };
        if rc == sys::ZE_RESULT_SUCCESS { Ok(buf) } else { Err(()) }
    }

    fn write_memory(&self, session: SessionHandle, thread: ThreadId, addr: u64, data: &[u8], addr_space: u32) -> Result<(), ()> {
        let handle = *self.sessions.borrow().get(&session.0).ok_or(())?;
        let rc = unsafe {
            sys::zetDebugWriteMemory(handle, to_sys_tid(thread), addr_space, addr, data.len(), data.as_ptr() as *const c_void)
        };
        if rc == sys::ZE_RESULT_SUCCESS { Ok(()) } else { Err(()) }
    }
}
