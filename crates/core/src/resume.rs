// ze-gdbserver - remote debug stub for Intel GPU compute devices
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! The resume planner: merges per-thread and wildcard
//! resume requests into the minimum number of driver calls.

use crate::device::DeviceManager;
use crate::driver::ThreadId;
use crate::thread::{ExecState, ResumeState, StopReason, WaitStatus};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeKind {
    Continue,
    Step,
    Stop,
}

/// `(ptid, kind, range, signal)`. `ordinal: None` is the
/// wildcard pid (`-1`); `seq_id: None` is "every thread of that pid" —
/// together these already encode the source's `(pid, -1, 0) -> (pid, 0,
/// 0)` normalization, so no separate rewrite step is needed.
#[derive(Debug, Clone, Copy)]
pub struct ResumeRequest {
    pub ordinal: Option<u32>,
    pub seq_id: Option<u32>,
    pub kind: ResumeKind,
    pub range: Option<(u64, u64)>,
    pub signal: u8,
}

impl ResumeRequest {
    pub fn matches_device(&self, ordinal: u32) -> bool {
        self.ordinal.is_none_or(|o| o == ordinal)
    }
}

impl DeviceManager {
    /// Apply a batch of resume requests.
    pub fn resume(&mut self, requests: &[ResumeRequest]) {
        for req in requests {
            if req.signal != 0 {
                tracing::warn!(signal = req.signal, "signals are never forwarded, clearing");
            }
        }

        if !self.non_stop() {
            for device in self.devices_mut() {
                for t in &mut device.threads {
                    t.resume_state = ResumeState::None;
                }
            }
        }

        let non_stop = self.non_stop();
        let ordinals: Vec<u32> = self.devices().iter().map(|d| d.ordinal).collect();
        let device_mergeable: std::collections::HashMap<u32, bool> = ordinals
            .iter()
            .map(|&o| (o, !non_stop && Self::device_requests_are_mergeable(requests, o)))
            .collect();
        let mut handled: HashSet<(u32, u32)> = HashSet::new();

        for req in requests {
            let target_ordinals: Vec<u32> = match req.ordinal {
                Some(o) => vec![o],
                None => ordinals.clone(),
            };
            for ordinal in target_ordinals {
                let seqs: Vec<u32> = {
                    let Some(device) = self.device(ordinal) else { continue };
                    match req.seq_id {
                        Some(s) => vec![s],
                        None => device.threads.iter().map(|t| t.seq_id).collect(),
                    }
                };
                let mergeable = device_mergeable.get(&ordinal).copied().unwrap_or(false);
                for seq in seqs {
                    if !handled.insert((ordinal, seq)) {
                        continue;
                    }
                    self.apply_request_to_thread(ordinal, seq, req, mergeable);
                }
            }
        }

        self.wildcard_merge_pass(requests);
        self.notify_wake();
    }

    /// A device is mergeable into a single wildcard resume only if *every*
    /// request touching it (not just the one being applied) is pid-only and
    /// non-`Stop`. Computed once per batch so the per-thread suppress
    /// decision in `prepare_and_resume` and `wildcard_merge_pass` can never
    /// disagree about whether the wildcard call actually goes out.
    fn device_requests_are_mergeable(requests: &[ResumeRequest], ordinal: u32) -> bool {
        let relevant = requests.iter().filter(|r| r.matches_device(ordinal));
        let mut any = false;
        for r in relevant {
            any = true;
            if r.seq_id.is_some() || r.kind == ResumeKind::Stop {
                return false;
            }
        }
        any
    }

    /// One thread's share of a resume request: the eventing-thread /
    /// priority check, then the per-kind transition.
    fn apply_request_to_thread(&mut self, ordinal: u32, seq: u32, req: &ResumeRequest, mergeable: bool) {
        let driver = &*self.driver;
        let backend = &*self.backend;

        let Some(device) = self.devices.iter_mut().find(|d| d.ordinal == ordinal) else {
            return;
        };
        let Some(session) = device.session else { return };
        let Some(thread) = device.thread_mut(seq) else { return };

        if req.kind != ResumeKind::Stop && thread.waitstatus.is_priority(thread.stop_reason, thread.resume_state) {
            // A prior stop is already pending and would be overwritten by
            // blindly resuming: stale-breakpoint and cancelled-range-step
            // checks first.
            let mut drop_event = false;
            if thread.stop_reason == StopReason::SwBreakpoint
                && !backend.is_at_breakpoint(driver, session, thread.tid)
            {
                drop_event = true;
            }
            if thread.stop_reason == StopReason::SingleStep && thread.is_range_stepping() {
                drop_event = true;
            }

            if drop_event {
                thread.waitstatus = WaitStatus::Ignore;
                thread.clear_step_range();
            } else {
                thread.resume_state = match req.kind {
                    ResumeKind::Step => ResumeState::Step,
                    ResumeKind::Continue => ResumeState::Run,
                    ResumeKind::Stop => unreachable!(),
                };
                // All-stop: the event will be reported by the next `wait`
                // without calling into the driver at all; non-stop only
                // suppresses the resume for this one thread.
                return;
            }
        }

        match req.kind {
            ResumeKind::Stop => {
                thread.resume_state = ResumeState::Stop;
                if matches!(thread.exec_state, ExecState::Running | ExecState::Unavailable) {
                    driver.interrupt(session, thread.tid);
                }
            }
            ResumeKind::Step => {
                if let Some((start, end)) = req.range {
                    thread.step_range_start = start;
                    thread.step_range_end = end;
                } else {
                    thread.clear_step_range();
                }
                thread.resume_state = ResumeState::Step;
                self.prepare_and_resume(ordinal, seq, true, mergeable);
            }
            ResumeKind::Continue => {
                thread.resume_state = ResumeState::Run;
                self.prepare_and_resume(ordinal, seq, false, mergeable);
            }
        }
    }

    fn prepare_and_resume(&mut self, ordinal: u32, seq: u32, is_step: bool, mergeable: bool) {
        let driver = &*self.driver;
        let backend = &*self.backend;
        let Some(device) = self.devices.iter_mut().find(|d| d.ordinal == ordinal) else {
            return;
        };
        let Some(session) = device.session else { return };
        let Some(thread) = device.thread_mut(seq) else { return };

        if matches!(thread.exec_state, ExecState::Running) {
            return;
        }
        device.nresumed = device.nresumed.saturating_add(1).min(device.nthreads);
        let regset_info = std::rc::Rc::clone(device.regset_info());

        let Some(thread) = device.thread_mut(seq) else { return };
        thread.exec_state = ExecState::Running;
        thread.regcache.invalidate(&regset_info, driver, session, thread.tid);

        let ok = backend.prepare_thread_resume(driver, session, thread.tid, is_step);
        if !ok {
            thread.exec_state = ExecState::Unavailable;
            thread.waitstatus = WaitStatus::Unavailable;
            return;
        }

        if !mergeable {
            driver.resume_thread(session, thread.tid);
        }
    }

    /// For every device where every listed request is wildcard/pid-only
    /// and `continue`/`step`, issue a single wildcard-resume call
    /// merging every request into as few wildcard driver calls as possible.
    fn wildcard_merge_pass(&mut self, requests: &[ResumeRequest]) {
        if self.non_stop() {
            return;
        }
        let ordinals: Vec<u32> = self.devices().iter().map(|d| d.ordinal).collect();
        for ordinal in ordinals {
            if !Self::device_requests_are_mergeable(requests, ordinal) {
                continue;
            }
            let driver = self.driver();
            if let Some(device) = self.device(ordinal) {
                if let Some(session) = device.session {
                    driver.resume_thread(session, ThreadId::WILDCARD);
                }
            }
        }
    }
}
