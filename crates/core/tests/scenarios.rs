// ze-gdbserver - remote debug stub for Intel GPU compute devices
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Black-box integration tests for end-to-end attach/resume/wait
//! scenarios, driven entirely through `DeviceManager`'s public surface
//! against `FakeDriver` — no module internals are reached into.

use std::collections::HashSet;

use zegdb_core::backend::{regset_type, IntelGtBackend};
use zegdb_core::config::AttachConfig;
use zegdb_core::driver::fake::FakeDriver;
use zegdb_core::driver::{DeviceProperties, Event, RegsetDescriptor, RegsetKind, SessionHandle, ThreadId};
use zegdb_core::resume::{ResumeKind, ResumeRequest};
use zegdb_core::wait::{Ptid, WaitOptions, WaitOutcome};
use zegdb_core::{DeviceManager, ExecState, Signal, StopReason, WaitStatus};

fn props(threads_per_eu: u32) -> DeviceProperties {
    DeviceProperties {
        name: "Test GPU".into(),
        vendor_id: 0x8086,
        device_id: 0x1234,
        pci_slot: "0000:00:02.0".into(),
        slices: 1,
        subslices_per_slice: 1,
        eus_per_subslice: 1,
        threads_per_eu,
        is_subdevice: false,
        subdevice_id: None,
    }
}

fn regsets() -> Vec<RegsetDescriptor> {
    vec![
        RegsetDescriptor { kind: RegsetKind::Grf, type_code: regset_type::GRF, byte_size: 4, bit_size: 32, count: 4, writable: true },
        RegsetDescriptor { kind: RegsetKind::Ce, type_code: regset_type::CE, byte_size: 4, bit_size: 32, count: 1, writable: true },
        RegsetDescriptor { kind: RegsetKind::Cr, type_code: regset_type::CR, byte_size: 4, bit_size: 32, count: 3, writable: true },
        RegsetDescriptor { kind: RegsetKind::Sr, type_code: regset_type::SR, byte_size: 4, bit_size: 32, count: 1, writable: true },
        RegsetDescriptor { kind: RegsetKind::Sba, type_code: regset_type::SBA, byte_size: 8, bit_size: 64, count: 10, writable: false },
    ]
}

/// Same as [`regsets`] but with the SBA regset writable, so a test can
/// poke `isabase` directly; the real device's SBA regset is read-only.
fn regsets_writable_sba() -> Vec<RegsetDescriptor> {
    let mut r = regsets();
    r.last_mut().unwrap().writable = true;
    r
}

/// Thread 1.1 is stopped with `sw_breakpoint`.
/// A `step` request must set the breakpoint-suppress bit (CR0.0 bit 15,
/// since the underlying instruction carries a breakpoint) and the
/// breakpoint-status bit (CR0.1 bit 31); the next thread-stopped event
/// must then classify as `single_step` because the last resume intent
/// recorded for the thread was `step`.
#[test]
fn scenario_step_over_sw_breakpoint() {
    let driver = FakeDriver::new();
    let handle = driver.add_device(props(1), regsets_writable_sba());
    let session = SessionHandle(handle.0);
    let tid = ThreadId { slice: 0, subslice: 0, eu: 0, thread: 0 };

    // isabase = 0, CR0.2 = 0, so PC == 0; plant a breakpoint-tagged
    // instruction byte there so the suppress bit gets set on resume.
    driver.write_registers(session, tid, regset_type::SBA, 4, &0u64.to_le_bytes());
    driver.write_registers(session, tid, regset_type::CR, 2, &0u32.to_le_bytes());
    driver.write_memory(session, tid, 0, &[0x01, 0, 0, 0, 0, 0, 0, 0], 0).unwrap();

    // The driver's next event: the step completing, CR0.1 bit 31 set by
    // the hardware the same way `prepare_thread_resume` will have left
    // it. Queued up front since `FakeDriver`'s event queue is just a
    // FIFO the manager drains whenever `wait` is next called.
    driver.push_event(handle, Event::ThreadStopped(tid));

    let mut mgr = DeviceManager::new(Box::new(driver), Box::new(IntelGtBackend), AttachConfig::default());
    mgr.attach().unwrap();

    {
        let device = mgr.device_mut(1).unwrap();
        let thread = device.thread_mut(1).unwrap();
        thread.exec_state = ExecState::Stopped;
        thread.stop_reason = StopReason::SwBreakpoint;
        thread.waitstatus = WaitStatus::Ignore;
        device.nresumed = 0;
    }

    mgr.resume(&[ResumeRequest { ordinal: Some(1), seq_id: Some(1), kind: ResumeKind::Step, range: None, signal: 0 }]);

    assert_eq!(mgr.device(1).unwrap().thread(1).unwrap().exec_state, ExecState::Running);
    assert_eq!(mgr.device(1).unwrap().thread(1).unwrap().resume_state, zegdb_core::ResumeState::Step);

    let driver = mgr.driver();
    let cr0_1 = u32::from_le_bytes(driver.read_registers(session, tid, regset_type::CR, 1, 1).unwrap().try_into().unwrap());
    assert_eq!(cr0_1 >> 31 & 1, 1, "CR0.1 breakpoint-status bit must be set for a step");
    let cr0_0 = u32::from_le_bytes(driver.read_registers(session, tid, regset_type::CR, 0, 1).unwrap().try_into().unwrap());
    assert_eq!(cr0_0 >> 15 & 1, 1, "CR0.0 breakpoint-suppress bit must be set when stepping off a breakpoint");

    let outcome = mgr.wait(Ptid::default(), WaitOptions { no_hang: true });
    assert_eq!(outcome, WaitOutcome::Thread { ordinal: 1, seq_id: 1, status: WaitStatus::Stopped(Signal::TRAP) });
    assert_eq!(mgr.device(1).unwrap().thread(1).unwrap().stop_reason, StopReason::SingleStep);
}

/// The driver delivers a `module_load`
/// (`need_ack`) immediately followed by a `thread_stopped`. `wait` must
/// report the thread stop while the module-load event "piggybacks" onto
/// it; `ack_in_memory_library` then acknowledges it exactly once.
#[test]
fn scenario_module_load_piggybacks_onto_thread_stop() {
    let driver = FakeDriver::new();
    let handle = driver.add_device(props(1), regsets());
    let session = SessionHandle(handle.0);
    let tid = ThreadId { slice: 0, subslice: 0, eu: 0, thread: 0 };

    // Breakpoint-status bit set, so the stop classifies as a priority
    // event `wait` is willing to surface rather than silently resuming.
    driver.write_registers(session, tid, regset_type::CR, 1, &(1u32 << 31).to_le_bytes());

    driver.push_event(handle, Event::ModuleLoad { begin: 0x1000, end: 0x2000, load: 0, format: 0, need_ack: true });
    driver.push_event(handle, Event::ThreadStopped(tid));

    let mut mgr = DeviceManager::new(Box::new(driver), Box::new(IntelGtBackend), AttachConfig::default());
    mgr.attach().unwrap();

    let outcome = mgr.wait(Ptid::default(), WaitOptions { no_hang: true });
    assert_eq!(outcome, WaitOutcome::Thread { ordinal: 1, seq_id: 1, status: WaitStatus::Stopped(Signal::TRAP) });

    {
        let device = mgr.device(1).unwrap();
        assert_eq!(device.ack_pending.len(), 1);
        assert_eq!(device.ack_pending[0].begin, 0x1000);
        assert_eq!(device.ack_pending[0].end, 0x2000);
    }

    mgr.ack_in_memory_library(1, 0x1000, 0x2000);
    assert!(mgr.device(1).unwrap().ack_pending.is_empty());
}

/// The driver forces a detach mid-session.
/// Every thread of that device gets an `exited` status with the detach
/// reason as exit code, and `wait` reports each of them in turn.
#[test]
fn scenario_detach_forced_mid_session() {
    let driver = FakeDriver::new();
    let handle = driver.add_device(props(2), regsets());
    driver.push_event(handle, Event::Detached { reason: 2 });

    let mut mgr = DeviceManager::new(Box::new(driver), Box::new(IntelGtBackend), AttachConfig::default());
    mgr.attach().unwrap();
    mgr.post_attach_quiesce();

    assert!(mgr.device(1).unwrap().session.is_none());
    assert_eq!(mgr.device(1).unwrap().nresumed, 0, "a sessionless device must not leave pause_all spinning forever");

    let mut seen: HashSet<u32> = HashSet::new();
    for _ in 0..2 {
        match mgr.wait(Ptid::default(), WaitOptions { no_hang: true }) {
            WaitOutcome::Thread { ordinal, seq_id, status } => {
                assert_eq!(ordinal, 1);
                assert_eq!(status, WaitStatus::Exited(2));
                assert!(seen.insert(seq_id), "each thread must be reported exactly once");
            }
            other => panic!("expected a thread exit status, got {other:?}"),
        }
    }
    assert_eq!(seen, HashSet::from([1, 2]));

    assert_eq!(mgr.wait(Ptid::default(), WaitOptions { no_hang: true }), WaitOutcome::Ignore);
}
