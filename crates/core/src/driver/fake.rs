// ze-gdbserver - remote debug stub for Intel GPU compute devices
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! An in-memory stand-in for the vendor debug library, used by this
//! crate's own tests and by `zegdb-stub`'s integration tests. It is not a
//! simulator of GPU execution — tests drive state transitions directly by
//! queuing events and poking register bytes, the way `RecordingPeripheral`
//! stands in for real hardware elsewhere in this codebase's test doubles.

use super::{
    AckToken, DebugDriver, DeviceHandle, DeviceProperties, Event, RegsetDescriptor, SessionHandle,
    ThreadId,
};
use crate::error::AttachOutcome;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug)]
struct FakeDevice {
    props: DeviceProperties,
    regsets: Vec<RegsetDescriptor>,
    subdevices: Vec<DeviceHandle>,
    attach_outcome: AttachOutcome,
    attached: bool,
    events: VecDeque<(Event, Option<AckToken>)>,
    acked: Vec<AckToken>,
    registers: HashMap<(ThreadId, u32), Vec<u8>>,
    memory: HashMap<u64, u8>,
    unreadable: HashSet<u64>,
    next_ack: u64,
}

/// A fully in-memory [`DebugDriver`] for tests.
#[derive(Debug, Default)]
pub struct FakeDriver {
    devices: RefCell<HashMap<DeviceHandle, FakeDevice>>,
    next_handle: RefCell<u64>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc_handle(&self) -> u64 {
        let mut n = self.next_handle.borrow_mut();
        *n += 1;
        *n
    }

    /// Register a top-level device (with no sub-devices) and return its
    /// handle.
    pub fn add_device(
        &self,
        props: DeviceProperties,
        regsets: Vec<RegsetDescriptor>,
    ) -> DeviceHandle {
        let handle = DeviceHandle(self.alloc_handle());
        self.devices.borrow_mut().insert(
            handle,
            FakeDevice {
                props,
                regsets,
                subdevices: Vec::new(),
                attach_outcome: AttachOutcome::Success,
                attached: false,
                events: VecDeque::new(),
                acked: Vec::new(),
                registers: HashMap::new(),
                memory: HashMap::new(),
                unreadable: HashSet::new(),
                next_ack: 1,
            },
        );
        handle
    }

    /// Attach a sub-device to a previously registered parent.
    pub fn add_subdevice(
        &self,
        parent: DeviceHandle,
        props: DeviceProperties,
        regsets: Vec<RegsetDescriptor>,
    ) -> DeviceHandle {
        let handle = self.add_device(props, regsets);
        self.devices
            .borrow_mut()
            .get_mut(&parent)
            .expect("parent device must exist")
            .subdevices
            .push(handle);
        handle
    }

    pub fn force_attach_outcome(&self, device: DeviceHandle, outcome: AttachOutcome) {
        self.devices
            .borrow_mut()
            .get_mut(&device)
            .expect("device must exist")
            .attach_outcome = outcome;
    }

    pub fn push_event(&self, device: DeviceHandle, event: Event) {
        let mut devices = self.devices.borrow_mut();
        let dev = devices.get_mut(&device).expect("device must exist");
        let token = if event.needs_ack() {
            let token = AckToken(dev.next_ack);
            dev.next_ack += 1;
            Some(token)
        } else {
            None
        };
        dev.events.push_back((event, token));
    }

    pub fn acked_tokens(&self, device: DeviceHandle) -> Vec<AckToken> {
        self.devices.borrow().get(&device).unwrap().acked.clone()
    }

    pub fn set_register_bytes(&self, device: DeviceHandle, thread: ThreadId, ty: u32, bytes: Vec<u8>) {
        self.devices
            .borrow_mut()
            .get_mut(&device)
            .expect("device must exist")
            .registers
            .insert((thread, ty), bytes);
    }

    pub fn register_bytes(&self, device: DeviceHandle, thread: ThreadId, ty: u32) -> Option<Vec<u8>> {
        self.devices
            .borrow()
            .get(&device)
            .and_then(|d| d.registers.get(&(thread, ty)).cloned())
    }

    /// Mark `[start, end)` as unreadable, so `read_memory` fails for any
    /// address in that range (used to exercise the backend's
    /// 16-bytes-then-8-bytes instruction-read fallback).
    pub fn mark_unreadable(&self, device: DeviceHandle, start: u64, end: u64) {
        if let Some(dev) = self.devices.borrow_mut().get_mut(&device) {
            dev.unreadable.extend(start..end);
        }
    }

    fn device_for_session(&self, session: SessionHandle) -> DeviceHandle {
        DeviceHandle(session.0)
    }
}

impl DebugDriver for FakeDriver {
    fn enumerate_devices(&self) -> Vec<DeviceHandle> {
        let devices = self.devices.borrow();
        let mut top_level: Vec<DeviceHandle> = devices.keys().copied().collect();
        let sub: HashSet<DeviceHandle> = devices.values().flat_map(|d| d.subdevices.iter().copied()).collect();
        top_level.retain(|h| !sub.contains(h));
        top_level.sort_by_key(|h| h.0);
        top_level
    }

    fn subdevices(&self, device: DeviceHandle) -> Vec<DeviceHandle> {
        self.devices
            .borrow()
            .get(&device)
            .map(|d| d.subdevices.clone())
            .unwrap_or_default()
    }

    fn device_properties(&self, device: DeviceHandle) -> DeviceProperties {
        self.devices.borrow().get(&device).unwrap().props.clone()
    }

    fn regset_descriptors(&self, device: DeviceHandle) -> Vec<RegsetDescriptor> {
        self.devices.borrow().get(&device).unwrap().regsets.clone()
    }

    fn attach(&self, device: DeviceHandle) -> (AttachOutcome, Option<SessionHandle>) {
        let mut devices = self.devices.borrow_mut();
        let dev = match devices.get_mut(&device) {
            Some(d) => d,
            None => return (AttachOutcome::Other, None),
        };
        match dev.attach_outcome {
            AttachOutcome::Success => {
                dev.attached = true;
                (AttachOutcome::Success, Some(SessionHandle(device.0)))
            }
            other => (other, None),
        }
    }

    fn detach(&self, session: SessionHandle) {
        let device = self.device_for_session(session);
        if let Some(dev) = self.devices.borrow_mut().get_mut(&device) {
            dev.attached = false;
        }
    }

    fn read_event(&self, session: SessionHandle) -> Option<(Event, Option<AckToken>)> {
        let device = self.device_for_session(session);
        self.devices
            .borrow_mut()
            .get_mut(&device)
            .and_then(|d| d.events.pop_front())
    }

    fn acknowledge(&self, session: SessionHandle, token: AckToken) {
        let device = self.device_for_session(session);
        if let Some(dev) = self.devices.borrow_mut().get_mut(&device) {
            dev.acked.push(token);
        }
    }

    fn interrupt(&self, _session: SessionHandle, _thread: ThreadId) {}

    fn resume_thread(&self, _session: SessionHandle, _thread: ThreadId) {}

    fn read_registers(
        &self,
        session: SessionHandle,
        thread: ThreadId,
        regset_type: u32,
        index: u32,
        count: u32,
    ) -> Option<Vec<u8>> {
        let device = self.device_for_session(session);
        let devices = self.devices.borrow();
        let dev = devices.get(&device)?;
        let desc = dev.regsets.iter().find(|r| r.type_code == regset_type)?;
        let elem = desc.byte_size as usize;
        let buf = dev
            .registers
            .get(&(thread, regset_type))
            .cloned()
            .unwrap_or_else(|| vec![0u8; elem * desc.count as usize]);
        let start = index as usize * elem;
        let end = start + count as usize * elem;
        if end > buf.len() {
            return None;
        }
        Some(buf[start..end].to_vec())
    }

    fn write_registers(
        &self,
        session: SessionHandle,
        thread: ThreadId,
        regset_type: u32,
        index: u32,
        data: &[u8],
    ) -> bool {
        let device = self.device_for_session(session);
        let mut devices = self.devices.borrow_mut();
        let Some(dev) = devices.get_mut(&device) else {
            return false;
        };
        let Some(desc) = dev.regsets.iter().find(|r| r.type_code == regset_type) else {
            return false;
        };
        if !desc.writable {
            return false;
        }
        let elem = desc.byte_size as usize;
        let total = elem * desc.count as usize;
        let buf = dev
            .registers
            .entry((thread, regset_type))
            .or_insert_with(|| vec![0u8; total]);
        let start = index as usize * elem;
        if start + data.len() > buf.len() {
            return false;
        }
        buf[start..start + data.len()].copy_from_slice(data);
        true
    }

    fn read_memory(
        &self,
        session: SessionHandle,
        _thread: ThreadId,
        addr: u64,
        len: usize,
        _addr_space: u32,
    ) -> Result<Vec<u8>, ()> {
        let device = self.device_for_session(session);
        let devices = self.devices.borrow();
        let dev = devices.get(&device).ok_or(())?;
        let mut out = Vec::with_capacity(len);
        for i in 0..len as u64 {
            let a = addr + i;
            if dev.unreadable.contains(&a) {
                return Err(());
            }
            out.push(*dev.memory.get(&a).unwrap_or(&0));
        }
        Ok(out)
    }

    fn write_memory(
        &self,
        session: SessionHandle,
        _thread: ThreadId,
        addr: u64,
        data: &[u8],
        _addr_space: u32,
    ) -> Result<(), ()> {
        let device = self.device_for_session(session);
        let mut devices = self.devices.borrow_mut();
        let dev = devices.get_mut(&device).ok_or(())?;
        for (i, byte) in data.iter().enumerate() {
            dev.memory.insert(addr + i as u64, *byte);
        }
        Ok(())
    }
}
