// ze-gdbserver - remote debug stub for Intel GPU compute devices
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! The target-ops surface consumed by the (out-of-scope) RSP dispatcher
//! : register access, the memory bridge's address-space
//! selection, `request_interrupt`, and the two id-formatting helpers.
//! Attach/detach, resume, and wait each have their own module
//! ([`crate::device`], [`crate::resume`], [`crate::wait`]); this module is
//! the remaining handful of surface methods that don't belong to any one
//! of those state machines.

use crate::device::DeviceManager;
use crate::driver::ThreadId;
use crate::error::TargetError;
use crate::thread::ExecState;

impl DeviceManager {
    /// `request_interrupt()` : wildcard-interrupt the named
    /// device; no wait required before returning.
    pub fn request_interrupt(&mut self, ordinal: u32) {
        let driver = &*self.driver;
        if let Some(device) = self.devices.iter_mut().find(|d| d.ordinal == ordinal) {
            device.request_wildcard_interrupt(driver);
        }
    }

    /// Memory-access context selection : a stopped thread
    /// grants access to its own `(thread, device)` tuple at any address
    /// space; anything else is only allowed at the default address space
    /// 0, through the device's wildcard thread id.
    fn memory_context(
        &self,
        ordinal: u32,
        seq_id: Option<u32>,
        addr_space: u32,
    ) -> Result<(crate::driver::SessionHandle, ThreadId), TargetError> {
        let device = self
            .device(ordinal)
            .ok_or_else(|| TargetError::NoSuchThread(format!("device {ordinal}")))?;
        let session = device
            .session
            .ok_or_else(|| TargetError::NoSuchThread(format!("device {ordinal}")))?;

        if let Some(seq) = seq_id {
            if let Some(thread) = device.thread(seq) {
                if matches!(thread.exec_state, ExecState::Stopped | ExecState::Held | ExecState::Paused) {
                    return Ok((session, thread.tid));
                }
            }
        }
        if addr_space != 0 {
            return Err(TargetError::MemoryAccessNeedsThread(addr_space));
        }
        Ok((session, ThreadId::WILDCARD))
    }

    /// `read_memory(thread?, addr, len, addr_space=0)`.
    pub fn read_memory(
        &self,
        ordinal: u32,
        seq_id: Option<u32>,
        addr: u64,
        len: usize,
        addr_space: u32,
    ) -> Result<Vec<u8>, TargetError> {
        let (session, tid) = self.memory_context(ordinal, seq_id, addr_space)?;
        self.driver
            .read_memory(session, tid, addr, len, addr_space)
            .map_err(|_| TargetError::NoSuchThread(format!("{tid:?}")))
    }

    /// `write_memory(thread?, addr, data, addr_space=0)`.
    pub fn write_memory(
        &self,
        ordinal: u32,
        seq_id: Option<u32>,
        addr: u64,
        data: &[u8],
        addr_space: u32,
    ) -> Result<(), TargetError> {
        let (session, tid) = self.memory_context(ordinal, seq_id, addr_space)?;
        self.driver
            .write_memory(session, tid, addr, data, addr_space)
            .map_err(|_| TargetError::NoSuchThread(format!("{tid:?}")))
    }

    /// `fetch_registers(regcache, regno=-1)` . `None`
    /// triggers the fetch-all path; `Some(regno)` reads (and lazily
    /// fetches) exactly one register.
    pub fn fetch_registers(&mut self, ordinal: u32, seq_id: u32, regno: Option<u32>) -> Vec<(u32, Option<Vec<u8>>)> {
        let driver = &*self.driver;
        let Some(device) = self.devices.iter_mut().find(|d| d.ordinal == ordinal) else {
            return Vec::new();
        };
        let Some(session) = device.session else { return Vec::new() };
        let regset_info = std::rc::Rc::clone(device.regset_info());
        let Some(thread) = device.thread_mut(seq_id) else {
            return Vec::new();
        };
        let tid = thread.tid;

        match regno {
            Some(r) => vec![(r, thread.regcache.read(r, &regset_info, driver, session, tid))],
            None => {
                thread.regcache.fetch_all(&regset_info, driver, session, tid);
                (0..regset_info.total_registers())
                    .map(|r| (r, thread.regcache.read(r, &regset_info, driver, session, tid)))
                    .collect()
            }
        }
    }

    /// `store_registers(regcache)` : each write is
    /// checked against the regset's writable flag before being promoted
    /// into the cache's dirty state.
    pub fn store_registers(&mut self, ordinal: u32, seq_id: u32, writes: &[(u32, Vec<u8>)]) -> Result<(), TargetError> {
        let Some(device) = self.devices.iter_mut().find(|d| d.ordinal == ordinal) else {
            return Err(TargetError::NoSuchThread(format!("device {ordinal}")));
        };
        let regset_info = std::rc::Rc::clone(device.regset_info());
        let Some(thread) = device.thread_mut(seq_id) else {
            return Err(TargetError::NoSuchThread(format!("thread {seq_id}")));
        };
        for (regno, bytes) in writes {
            match regset_info.writable(*regno) {
                Some(true) => thread.regcache.write(*regno, bytes.clone()),
                Some(false) => return Err(TargetError::RegsetNotWritable(format!("regno {regno}"))),
                None => return Err(TargetError::NoSuchThread(format!("regno {regno}"))),
            }
        }
        Ok(())
    }

    /// `thread_id_str(thread)` : `"ZE s.ss.eu.t"`.
    pub fn thread_id_str(&self, ordinal: u32, seq_id: u32) -> Option<String> {
        let device = self.device(ordinal)?;
        let thread = device.thread(seq_id)?;
        Some(format!(
            "ZE {}.{}.{}.{}",
            thread.tid.slice, thread.tid.subslice, thread.tid.eu, thread.tid.thread
        ))
    }

    /// `id_str(process)` : delegates to [`crate::device::Device::id_str`].
    pub fn id_str(&self, ordinal: u32) -> Option<String> {
        self.device(ordinal).map(|d| d.id_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::IntelGtBackend;
    use crate::config::AttachConfig;
    use crate::driver::fake::FakeDriver;
    use crate::driver::{DeviceProperties, RegsetDescriptor, RegsetKind};

    fn props() -> DeviceProperties {
        DeviceProperties {
            name: "Test GPU".into(),
            vendor_id: 0x8086,
            device_id: 0x1234,
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
            RegsetDescriptor { kind: RegsetKind::Grf, type_code: 0, byte_size: 4, bit_size: 32, count: 2, writable: true },
            RegsetDescriptor { kind: RegsetKind::Ce, type_code: 3, byte_size: 4, bit_size: 32, count: 1, writable: true },
            RegsetDescriptor { kind: RegsetKind::Cr, type_code: 5, byte_size: 4, bit_size: 32, count: 3, writable: true },
            RegsetDescriptor { kind: RegsetKind::Sr, type_code: 4, byte_size: 4, bit_size: 32, count: 1, writable: true },
            RegsetDescriptor { kind: RegsetKind::Sba, type_code: 10, byte_size: 8, bit_size: 64, count: 10, writable: false },
        ]
    }

    #[test]
    fn memory_access_without_thread_requires_default_space() {
        let driver = FakeDriver::new();
        driver.add_device(props(), regsets());
        let mut mgr = DeviceManager::new(Box::new(driver), Box::new(IntelGtBackend), AttachConfig::default());
        mgr.attach().unwrap();
        mgr.post_attach_quiesce();

        assert!(mgr.read_memory(1, None, 0, 4, 0).is_ok());
        assert!(matches!(
            mgr.read_memory(1, None, 0, 4, 1),
            Err(TargetError::MemoryAccessNeedsThread(1))
        ));
    }

    #[test]
    fn thread_id_str_matches_wire_format() {
        let driver = FakeDriver::new();
        driver.add_device(props(), regsets());
        let mut mgr = DeviceManager::new(Box::new(driver), Box::new(IntelGtBackend), AttachConfig::default());
        mgr.attach().unwrap();
        mgr.post_attach_quiesce();
        assert_eq!(mgr.thread_id_str(1, 1).unwrap(), "ZE 0.0.0.0");
    }

    #[test]
    fn store_to_unwritable_regset_fails() {
        let driver = FakeDriver::new();
        driver.add_device(props(), regsets());
        let mut mgr = DeviceManager::new(Box::new(driver), Box::new(IntelGtBackend), AttachConfig::default());
        mgr.attach().unwrap();
        mgr.post_attach_quiesce();

        // register 7 falls in the SBA regset (regnos 7..17), which is not writable.
        let result = mgr.store_registers(1, 1, &[(7, vec![0; 8])]);
        assert!(matches!(result, Err(TargetError::RegsetNotWritable(_))));
    }
}
