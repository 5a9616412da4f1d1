// ze-gdbserver - remote debug stub for Intel GPU compute devices
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! `wait`: drains events, picks one reportable thread or
//! process status, and returns it.

use crate::device::DeviceManager;
use crate::thread::{ExecState, ResumeState, Signal, StopReason, Thread, WaitStatus};
use rand::Rng;
use std::cmp::Ordering;

/// `(ordinal, seq_id)` filter for `wait`; `None` in either field is a
/// wildcard, mirroring [`crate::resume::ResumeRequest`]'s `(ordinal,
/// seq_id)` pair.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ptid {
    pub ordinal: Option<u32>,
    pub seq_id: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WaitOptions {
    /// `WNOHANG`: return `Ignore` immediately instead of looping when
    /// nothing is reportable yet.
    pub no_hang: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Process { ordinal: u32, status: WaitStatus },
    Thread { ordinal: u32, seq_id: u32, status: WaitStatus },
    Ignore,
}

/// Candidate priority class for `wait`'s thread-selection pass: lower is
/// more preferred. `None` means the thread is not a candidate at all.
fn candidate_class(thread: &Thread) -> Option<u8> {
    if !thread.waitstatus.is_pending() {
        return None;
    }
    if thread.resume_state == ResumeState::None {
        return None;
    }
    if thread.exec_state == ExecState::Held {
        return None;
    }
    if thread.waitstatus.is_priority(thread.stop_reason, thread.resume_state) {
        Some(0)
    } else if matches!(thread.waitstatus, WaitStatus::Stopped(_)) {
        Some(1)
    } else {
        Some(2)
    }
}

impl DeviceManager {
    /// `wait(ptid, options)`.
    pub fn wait(&mut self, ptid: Ptid, options: WaitOptions) -> WaitOutcome {
        loop {
            self.drain_wake();
            self.drain_all();

            if let Some(outcome) = self.take_process_status(ptid) {
                return outcome;
            }

            if let Some((ordinal, seq_id)) = self.pick_thread(ptid) {
                if self.try_fast_path(ordinal, seq_id) {
                    continue;
                }
                return self.report_thread_stop(ordinal, seq_id);
            }

            if options.no_hang {
                return WaitOutcome::Ignore;
            }
            std::thread::yield_now();
        }
    }

    /// Process-level status, with the module-load
    /// "piggyback" onto a thread event when the process status is merely
    /// `unavailable`.
    fn take_process_status(&mut self, ptid: Ptid) -> Option<WaitOutcome> {
        let ordinals: Vec<u32> = self
            .devices
            .iter()
            .filter(|d| ptid.ordinal.is_none_or(|o| o == d.ordinal))
            .map(|d| d.ordinal)
            .collect();

        for ordinal in ordinals {
            let is_unavailable = {
                let device = self.devices.iter().find(|d| d.ordinal == ordinal)?;
                let process = device.process.as_ref()?;
                if !process.waitstatus.is_pending() {
                    continue;
                }
                process.waitstatus == WaitStatus::Unavailable
            };

            if is_unavailable {
                if let Some((thread_ordinal, seq_id)) = self.pick_thread(Ptid { ordinal: Some(ordinal), seq_id: None }) {
                    if self.try_fast_path(thread_ordinal, seq_id) {
                        // Event evaporated under the fast path; the process
                        // status is still pending for the next round.
                        continue;
                    }
                    return Some(self.report_thread_stop(thread_ordinal, seq_id));
                }
            }

            let device = self.devices.iter_mut().find(|d| d.ordinal == ordinal)?;
            let process = device.process.as_mut()?;
            let status = process.waitstatus;
            process.waitstatus = WaitStatus::Ignore;
            return Some(WaitOutcome::Process { ordinal, status });
        }
        None
    }

    /// Pick uniformly at random among the
    /// candidates of the most-preferred priority class.
    fn pick_thread(&self, ptid: Ptid) -> Option<(u32, u32)> {
        let mut best_class = u8::MAX;
        let mut candidates: Vec<(u32, u32)> = Vec::new();

        for device in &self.devices {
            if ptid.ordinal.is_some_and(|o| o != device.ordinal) {
                continue;
            }
            for thread in &device.threads {
                if ptid.seq_id.is_some_and(|s| s != thread.seq_id) {
                    continue;
                }
                let Some(class) = candidate_class(thread) else { continue };
                match class.cmp(&best_class) {
                    Ordering::Less => {
                        best_class = class;
                        candidates.clear();
                        candidates.push((device.ordinal, thread.seq_id));
                    }
                    Ordering::Equal => candidates.push((device.ordinal, thread.seq_id)),
                    Ordering::Greater => {}
                }
            }
        }

        if candidates.is_empty() {
            return None;
        }
        let idx = rand::thread_rng().gen_range(0..candidates.len());
        Some(candidates[idx])
    }

    /// The range-step and silent-resume fast
    /// paths. Returns `true` if the thread was silently re-resumed and
    /// `wait` should loop rather than report anything.
    fn try_fast_path(&mut self, ordinal: u32, seq: u32) -> bool {
        let driver = &*self.driver;
        let backend = &*self.backend;
        let Some(device) = self.devices.iter_mut().find(|d| d.ordinal == ordinal) else {
            return false;
        };
        let Some(session) = device.session else { return false };
        let regset_info = std::rc::Rc::clone(device.regset_info());
        let Some(thread) = device.thread_mut(seq) else { return false };
        let tid = thread.tid;

        let range_step_inside = thread.stop_reason == StopReason::SingleStep
            && thread.is_range_stepping()
            && backend
                .read_pc(driver, session, tid)
                .map(|pc| pc >= thread.step_range_start && pc < thread.step_range_end)
                .unwrap_or(false);
        let spurious = !range_step_inside
            && thread.stop_reason == StopReason::None
            && matches!(thread.waitstatus, WaitStatus::Stopped(sig) if sig == Signal::NONE);

        if !range_step_inside && !spurious {
            return false;
        }

        thread.waitstatus = WaitStatus::Ignore;
        if !range_step_inside {
            thread.clear_step_range();
        }
        thread.exec_state = ExecState::Running;
        thread.regcache.invalidate(&regset_info, driver, session, tid);
        device.nresumed = device.nresumed.saturating_add(1).min(device.nthreads);

        let ok = backend.prepare_thread_resume(driver, session, tid, range_step_inside);
        if ok {
            driver.resume_thread(session, tid);
        } else if let Some(thread) = device.thread_mut(seq) {
            thread.exec_state = ExecState::Unavailable;
            thread.waitstatus = WaitStatus::Unavailable;
        }
        true
    }

    /// Quiesce the rest in all-stop mode, then
    /// clear the chosen thread's event and report it.
    fn report_thread_stop(&mut self, ordinal: u32, seq: u32) -> WaitOutcome {
        if !self.non_stop() {
            self.pause_all(false);
        }
        let Some(device) = self.devices.iter_mut().find(|d| d.ordinal == ordinal) else {
            return WaitOutcome::Ignore;
        };
        let Some(thread) = device.thread_mut(seq) else {
            return WaitOutcome::Ignore;
        };
        let status = thread.waitstatus;
        thread.waitstatus = WaitStatus::Ignore;
        thread.clear_step_range();
        WaitOutcome::Thread { ordinal, seq_id: seq, status }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::IntelGtBackend;
    use crate::config::AttachConfig;
    use crate::driver::fake::FakeDriver;
    use crate::driver::{DeviceProperties, RegsetDescriptor, RegsetKind};
    use crate::resume::{ResumeKind, ResumeRequest};

    fn single_thread_props() -> DeviceProperties {
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
            RegsetDescriptor { kind: RegsetKind::Grf, type_code: 0, byte_size: 4, bit_size: 32, count: 128, writable: true },
            RegsetDescriptor { kind: RegsetKind::Ce, type_code: 3, byte_size: 4, bit_size: 32, count: 1, writable: true },
            RegsetDescriptor { kind: RegsetKind::Cr, type_code: 5, byte_size: 4, bit_size: 32, count: 3, writable: true },
            RegsetDescriptor { kind: RegsetKind::Sr, type_code: 4, byte_size: 4, bit_size: 32, count: 1, writable: true },
            RegsetDescriptor { kind: RegsetKind::Sba, type_code: 10, byte_size: 8, bit_size: 64, count: 10, writable: false },
        ]
    }

    #[test]
    fn wildcard_continue_after_attach_yields_one_silent_stop_then_resume() {
        let driver = FakeDriver::new();
        let handle = driver.add_device(single_thread_props(), regsets());
        let tid = crate::driver::ThreadId { slice: 0, subslice: 0, eu: 0, thread: 0 };
        // Simulates the driver's response to the wildcard interrupt that
        // `post_attach_quiesce` issues; the fake driver's `interrupt` is a
        // no-op, so tests queue the resulting event themselves.
        driver.push_event(handle, crate::driver::Event::ThreadStopped(tid));

        let mut mgr = DeviceManager::new(Box::new(driver), Box::new(IntelGtBackend), AttachConfig::default());
        mgr.attach().unwrap();
        mgr.post_attach_quiesce();

        assert_eq!(mgr.device(1).unwrap().nresumed, 0);

        // No priority event exists yet (CR0 is all zero in the fake
        // driver): wait must silently resume rather than report anything
        // back to the caller.
        let outcome = mgr.wait(Ptid::default(), WaitOptions { no_hang: true });
        assert!(matches!(outcome, WaitOutcome::Ignore));
        assert_eq!(mgr.device(1).unwrap().nresumed, 1);
        assert_eq!(mgr.device(1).unwrap().thread(1).unwrap().exec_state, ExecState::Running);

        mgr.resume(&[ResumeRequest { ordinal: None, seq_id: None, kind: ResumeKind::Continue, range: None, signal: 0 }]);
    }
}
