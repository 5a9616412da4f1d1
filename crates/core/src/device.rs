// ze-gdbserver - remote debug stub for Intel GPU compute devices
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Device manager: attach/enumerate/detach and the event
//! fetch & translation loop.

use crate::backend::{GpuBackend, RegsetInfo, TargetDescription};
use crate::config::AttachConfig;
use crate::driver::{DebugDriver, DeviceHandle, DeviceProperties, Event, RegsetDescriptor, SessionHandle, ThreadId};
use crate::error::{AttachError, AttachOutcome};
use crate::thread::{ExecState, ResumeState, Thread, WaitStatus};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// One device modelled to the debugger ("Process").
///
/// Owned by its [`Device`] rather than holding a back-pointer to it — the
/// natural resolution of the device/process cyclic reference.
#[derive(Debug)]
pub struct Process {
    pub visibility: Visibility,
    pub waitstatus: WaitStatus,
}

impl Process {
    fn priority(&self) -> u8 {
        match self.waitstatus {
            WaitStatus::Ignore => 0,
            WaitStatus::Unavailable => 1,
            WaitStatus::Stopped(_) | WaitStatus::Exited(_) | WaitStatus::Signalled(_) => 2,
        }
    }

    /// Set the process-level status unless a higher-priority one is
    /// already pending (module_load handling).
    fn set_status_if_not_lower_priority(&mut self, status: WaitStatus, new_priority: u8) {
        if new_priority >= self.priority() {
            self.waitstatus = status;
        }
    }
}

/// A queued `module_load` event awaiting `ack_in_memory_library`.
#[derive(Debug, Clone, Copy)]
pub struct ModuleLoadAck {
    pub begin: u64,
    pub end: u64,
    pub token: crate::driver::AckToken,
}

/// One attached GPU or GPU sub-device ("Device").
#[derive(Debug)]
pub struct Device {
    pub ordinal: u32,
    pub driver_device: DeviceHandle,
    pub session: Option<SessionHandle>,
    pub props: DeviceProperties,
    pub regsets: Vec<RegsetDescriptor>,
    /// Names of registers the remote protocol always ships with stop
    /// packets. Left empty: no registers are marked expedited in this
    /// implementation.
    pub expedite: Vec<String>,
    pub threads: Vec<Thread>,
    pub nthreads: u32,
    pub nresumed: u32,
    pub ninterrupts: u32,
    pub process: Option<Process>,
    pub ack_pending: Vec<ModuleLoadAck>,
    tdesc: Rc<TargetDescription>,
    regset_info: Rc<RegsetInfo>,
}

pub(crate) enum EventOutcome {
    Continue,
    Detached,
}

impl Device {
    pub fn id_str(&self) -> String {
        match self.props.subdevice_id {
            Some(sub) => format!("device [{:04x}:{}].{}", self.props.device_id, self.props.pci_slot, sub),
            None => format!("device [{:04x}:{}]", self.props.device_id, self.props.pci_slot),
        }
    }

    pub fn tdesc(&self) -> &Rc<TargetDescription> {
        &self.tdesc
    }

    pub fn regset_info(&self) -> &Rc<RegsetInfo> {
        &self.regset_info
    }

    pub fn thread_mut(&mut self, seq_id: u32) -> Option<&mut Thread> {
        self.threads.iter_mut().find(|t| t.seq_id == seq_id)
    }

    pub fn thread(&self, seq_id: u32) -> Option<&Thread> {
        self.threads.iter().find(|t| t.seq_id == seq_id)
    }

    /// Issue a wildcard interrupt if none is already outstanding
    /// ("interrupt requests are idempotent").
    pub fn request_wildcard_interrupt(&mut self, driver: &dyn DebugDriver) {
        let Some(session) = self.session else { return };
        if self.ninterrupts > 0 {
            return;
        }
        driver.interrupt(session, ThreadId::WILDCARD);
        self.ninterrupts = 1;
    }

    /// Debugger-requested detach (target-ops `detach`):
    /// clear pending wait-statuses, resume everything, call the driver,
    /// then mark every thread exited.
    pub fn detach(&mut self, driver: &dyn DebugDriver) {
        for thread in &mut self.threads {
            thread.waitstatus = WaitStatus::Ignore;
        }
        if let Some(session) = self.session.take() {
            driver.resume_thread(session, ThreadId::WILDCARD);
            driver.detach(session);
        }
        for thread in &mut self.threads {
            thread.exec_state = ExecState::Exited;
            thread.waitstatus = WaitStatus::Exited(0);
        }
        // No session means no further drain/interrupt can ever touch this
        // device again: a stale nonzero count here would spin pause_all's
        // quiescing loop forever the next time it runs.
        self.nresumed = 0;
        self.ninterrupts = 0;
    }

    /// Translate one driver event into state-machine transitions.
    pub(crate) fn handle_event(
        &mut self,
        driver: &dyn DebugDriver,
        backend: &dyn GpuBackend,
        non_stop: bool,
        event: Event,
        token: Option<crate::driver::AckToken>,
    ) -> EventOutcome {
        let Some(session) = self.session else {
            return EventOutcome::Detached;
        };

        match event {
            Event::Detached { reason } => {
                for thread in &mut self.threads {
                    thread.exec_state = ExecState::Exited;
                    thread.waitstatus = WaitStatus::Exited(reason);
                }
                self.session = None;
                // Mirror `detach()`: a sessionless device can never resume
                // or interrupt again, so a stale count here would spin
                // pause_all's quiescing loop forever.
                self.nresumed = 0;
                self.ninterrupts = 0;
                return EventOutcome::Detached;
            }
            Event::ProcessEntry => {
                if let Some(t) = token {
                    driver.acknowledge(session, t);
                }
                if let Some(p) = &mut self.process {
                    p.visibility = Visibility::Visible;
                }
            }
            Event::ProcessExit => {
                if let Some(t) = token {
                    driver.acknowledge(session, t);
                }
                if let Some(p) = &mut self.process {
                    p.visibility = Visibility::Hidden;
                }
            }
            Event::ModuleLoad { begin, end, load, format: _, need_ack } => {
                if begin < end {
                    tracing::info!(ordinal = self.ordinal, begin, end, load, "module loaded");
                }
                if need_ack {
                    if let Some(t) = token {
                        self.ack_pending.push(ModuleLoadAck { begin, end, token: t });
                    }
                } else if let Some(t) = token {
                    driver.acknowledge(session, t);
                }
                if let Some(p) = &mut self.process {
                    p.set_status_if_not_lower_priority(WaitStatus::Unavailable, 1);
                }
            }
            Event::ModuleUnload { begin, end, need_ack: _ } => {
                tracing::info!(ordinal = self.ordinal, begin, end, "module unloaded");
                if let Some(t) = token {
                    driver.acknowledge(session, t);
                }
            }
            Event::ThreadStopped(tid) => {
                let is_wildcard = tid.is_wildcard();
                let mut matched = false;
                for thread in self.threads.iter_mut().filter(|t| is_wildcard || t.tid == tid) {
                    matched = true;
                    if matches!(thread.exec_state, ExecState::Stopped | ExecState::Held | ExecState::Paused) {
                        continue;
                    }
                    self.nresumed = self.nresumed.saturating_sub(1);
                    thread.regcache.discard();
                    let was_unavailable = thread.exec_state == ExecState::Unavailable;

                    match backend.get_stop_reason(driver, session, thread.tid, thread.resume_state) {
                        Some((reason, sig)) => {
                            thread.stop_reason = reason;
                            if !non_stop && was_unavailable && thread.resume_state == ResumeState::Stop {
                                thread.exec_state = ExecState::Held;
                            } else {
                                thread.exec_state = ExecState::Stopped;
                            }
                            thread.waitstatus = WaitStatus::Stopped(sig);
                        }
                        None => {
                            tracing::warn!(?thread.tid, "stop-reason classification failed, marking unavailable");
                            thread.exec_state = ExecState::Unavailable;
                            thread.waitstatus = WaitStatus::Unavailable;
                        }
                    }
                }
                let _ = matched;
                if is_wildcard {
                    if self.ninterrupts == 0 {
                        tracing::warn!(ordinal = self.ordinal, "interrupt-count underflow on thread_stopped");
                    } else {
                        self.ninterrupts -= 1;
                    }
                }
            }
            Event::ThreadUnavailable(tid) => {
                let is_wildcard = tid.is_wildcard();
                for thread in self.threads.iter_mut().filter(|t| is_wildcard || t.tid == tid) {
                    self.nresumed = self.nresumed.saturating_sub(1);
                    thread.exec_state = ExecState::Unavailable;
                    thread.waitstatus = WaitStatus::Unavailable;
                }
                if is_wildcard {
                    if self.ninterrupts == 0 {
                        tracing::warn!(ordinal = self.ordinal, "interrupt-count underflow on thread_unavailable");
                    } else {
                        self.ninterrupts -= 1;
                    }
                }
            }
            Event::PageFault { address, mask, reason } => {
                tracing::warn!(ordinal = self.ordinal, address, mask, reason, "page fault");
                if let Some(p) = &mut self.process {
                    p.set_status_if_not_lower_priority(WaitStatus::Signalled(crate::thread::Signal::SEGV), 2);
                }
            }
        }
        EventOutcome::Continue
    }
}

/// Owns the driver handle, the GPU backend, and every attached device
/// ("Global state... a single target context").
pub struct DeviceManager {
    pub(crate) driver: Box<dyn DebugDriver>,
    pub(crate) backend: Box<dyn GpuBackend>,
    config: AttachConfig,
    pub(crate) devices: Vec<Device>,
    next_ordinal: u32,
    /// Wire-protocol mode negotiated by the dispatcher (`QNonStop`);
    /// defaults to all-stop.
    non_stop: bool,
    pub(crate) freeze: u32,
    /// Set once the outer event loop calls [`enable_async_wake`]; absent
    /// otherwise, in which case `wait` just yields between drain passes.
    ///
    /// [`enable_async_wake`]: DeviceManager::enable_async_wake
    async_wake: Option<crate::wake::WakePipe>,
}

impl DeviceManager {
    pub fn new(driver: Box<dyn DebugDriver>, backend: Box<dyn GpuBackend>, config: AttachConfig) -> Self {
        Self {
            driver,
            backend,
            config,
            devices: Vec::new(),
            next_ordinal: 1,
            non_stop: false,
            freeze: 0,
            async_wake: None,
        }
    }

    pub fn driver(&self) -> &dyn DebugDriver {
        &*self.driver
    }

    pub fn backend(&self) -> &dyn GpuBackend {
        &*self.backend
    }

    pub fn non_stop(&self) -> bool {
        self.non_stop
    }

    pub fn set_non_stop(&mut self, non_stop: bool) {
        self.non_stop = non_stop;
    }

    /// Opens the wake pipe and registers it. On failure the pipe is
    /// dropped (closing whatever ends opened) and async wake stays
    /// disabled; the caller falls back to plain yielding.
    pub fn enable_async_wake(&mut self) -> std::io::Result<()> {
        self.async_wake = Some(crate::wake::WakePipe::new()?);
        Ok(())
    }

    /// The read end the outer event loop polls/selects on. `None` if
    /// async wake was never enabled or failed to initialize.
    pub fn wake_fd(&self) -> Option<std::os::fd::RawFd> {
        self.async_wake.as_ref().map(|p| p.read_fd())
    }

    /// Nudges a blocked `wait` to recheck now instead of on its next
    /// scheduled yield. No-op if async wake isn't enabled.
    pub(crate) fn notify_wake(&self) {
        if let Some(pipe) = &self.async_wake {
            pipe.wake();
        }
    }

    /// Drains any pending wakeup byte. Called at the start of every
    /// `wait` retry, before the event drain pass.
    pub(crate) fn drain_wake(&self) {
        if let Some(pipe) = &self.async_wake {
            pipe.drain();
        }
    }

    pub fn devices_mut(&mut self) -> &mut [Device] {
        &mut self.devices
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn device(&self, ordinal: u32) -> Option<&Device> {
        self.devices.iter().find(|d| d.ordinal == ordinal)
    }

    pub fn device_mut(&mut self, ordinal: u32) -> Option<&mut Device> {
        self.devices.iter_mut().find(|d| d.ordinal == ordinal)
    }

    /// Enumerate every driver, device, and sub-device and attach to the
    /// leaves.
    pub fn attach(&mut self) -> Result<(), AttachError> {
        let mut failures = Vec::new();
        for handle in self.driver.enumerate_devices() {
            self.attach_one(handle, &mut failures, false);
        }
        if self.devices.is_empty() {
            return Err(AttachError::NoDevices(failures.join("; ")));
        }
        if !failures.is_empty() {
            tracing::warn!(failures = ?failures, "some devices failed to attach");
        }
        Ok(())
    }

    fn attach_one(&mut self, handle: DeviceHandle, failures: &mut Vec<String>, is_sub: bool) {
        let subs = self.driver.subdevices(handle);
        if !subs.is_empty() {
            if !self.config.attach_to_subdevice {
                return;
            }
            for sub in subs {
                self.attach_one(sub, failures, true);
            }
            return;
        }
        if !is_sub && !self.config.attach_to_device {
            return;
        }

        let props = self.driver.device_properties(handle);
        let regsets = self.driver.regset_descriptors(handle);
        if !self.backend.is_device_supported(&props, &regsets) {
            tracing::info!(?handle, "device does not meet minimum regset requirements, skipping");
            return;
        }

        match self.driver.attach(handle) {
            (AttachOutcome::Success, Some(session)) => {
                self.register_device(handle, session, props, regsets);
            }
            (AttachOutcome::UnsupportedFeature, _) => {}
            (other, _) => {
                failures.push(format!("{handle:?}: {other:?}"));
            }
        }
    }

    fn register_device(
        &mut self,
        handle: DeviceHandle,
        session: SessionHandle,
        props: DeviceProperties,
        regsets: Vec<RegsetDescriptor>,
    ) {
        let ordinal = self.next_ordinal;
        self.next_ordinal = self
            .next_ordinal
            .checked_add(1)
            .expect("device ordinal overflow");

        let (tdesc, regset_info) = self.backend.create_tdesc(&props, &regsets);
        let tdesc = Rc::new(tdesc);
        let regset_info = Rc::new(regset_info);

        let mut threads = Vec::new();
        let mut seq: u32 = 0;
        for slice in 0..props.slices {
            for subslice in 0..props.subslices_per_slice {
                for eu in 0..props.eus_per_subslice {
                    for thread in 0..props.threads_per_eu {
                        seq = seq.checked_add(1).expect("thread sequence-id overflow");
                        threads.push(Thread::new(
                            ordinal,
                            seq,
                            ThreadId { slice, subslice, eu, thread },
                            Rc::clone(&regset_info),
                        ));
                    }
                }
            }
        }
        let nthreads = threads.len() as u32;

        tracing::info!(ordinal, nthreads, name = %props.name, "device attached");

        self.devices.push(Device {
            ordinal,
            driver_device: handle,
            session: Some(session),
            props,
            regsets,
            expedite: Vec::new(),
            threads,
            nthreads,
            nresumed: nthreads,
            ninterrupts: 0,
            process: Some(Process {
                visibility: Visibility::Hidden,
                waitstatus: WaitStatus::Ignore,
            }),
            ack_pending: Vec::new(),
            tdesc,
            regset_info,
        });
    }

    /// Drain every queued event for one device until the driver reports
    /// `not-ready` . Returns `false` if the device was
    /// forcibly detached mid-drain.
    pub fn drain_device(&mut self, ordinal: u32) -> bool {
        let non_stop = self.non_stop;
        loop {
            let driver = &*self.driver;
            let backend = &*self.backend;
            let Some(device) = self.devices.iter_mut().find(|d| d.ordinal == ordinal) else {
                return false;
            };
            let Some(session) = device.session else {
                return false;
            };
            let Some((event, token)) = driver.read_event(session) else {
                return true;
            };
            match device.handle_event(driver, backend, non_stop, event, token) {
                EventOutcome::Continue => continue,
                EventOutcome::Detached => return false,
            }
        }
    }

    /// Drain every device's event queue.
    pub fn drain_all(&mut self) {
        let ordinals: Vec<u32> = self.devices.iter().map(|d| d.ordinal).collect();
        for ordinal in ordinals {
            self.drain_device(ordinal);
        }
    }

    /// Post-attach all-stop quiescing.
    pub fn post_attach_quiesce(&mut self) {
        if self.non_stop {
            return;
        }
        for device in &mut self.devices {
            device.request_wildcard_interrupt(&*self.driver);
        }
        loop {
            self.drain_all();
            if self.devices.iter().all(|d| d.nresumed == 0) {
                break;
            }
        }
    }

    /// Pop a matching queued `module_load` and acknowledge it
    /// (`ack_in_memory_library`).
    pub fn ack_in_memory_library(&mut self, ordinal: u32, begin: u64, end: u64) {
        let driver = &*self.driver;
        let Some(device) = self.devices.iter_mut().find(|d| d.ordinal == ordinal) else {
            return;
        };
        let Some(session) = device.session else { return };
        if let Some(pos) = device
            .ack_pending
            .iter()
            .position(|a| a.begin == begin && a.end == end)
        {
            let ack = device.ack_pending.remove(pos);
            driver.acknowledge(session, ack.token);
        }
    }
}
