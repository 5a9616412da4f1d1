// ze-gdbserver - remote debug stub for Intel GPU compute devices
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Binds `zegdb-core`'s target-ops surface to `gdbstub`'s GDB remote
//! serial protocol implementation ("the RSP dispatcher is an
//! external collaborator"). This crate is the thin adapter: it owns no
//! state-machine logic of its own, only the translation between
//! `gdbstub`'s `Tid`/`Registers`/`MultiThreadStopReason` vocabulary and
//! `zegdb_core::DeviceManager`'s `(ordinal, seq_id)`/target-ops
//! vocabulary.
//!
//! `gdbstub` has no built-in notion of multiple debuggee "processes"
//! sharing one connection the way `DeviceManager` models devices;
//! rather than pull in the extended-mode multiprocess machinery, each
//! device's threads are folded into `gdbstub`'s single flat `Tid`
//! namespace as `ordinal << 16 | seq_id` ([`encode_tid`]). This caps any
//! one device at 65535 threads, far above anything real GPU topologies
//! need.

mod arch;

pub use arch::{IntelGt, IntelGtRegId, IntelGtRegisters};

use gdbstub::common::{Signal as GdbSignal, Tid};
use gdbstub::conn::{Connection, ConnectionExt};
use gdbstub::stub::{run_blocking, DisconnectReason, GdbStub, MultiThreadStopReason};
use gdbstub::target::ext::base::multithread::{
    MultiThreadBase, MultiThreadResume, MultiThreadResumeOps, MultiThreadSingleStep,
    MultiThreadSingleStepOps,
};
use gdbstub::target::ext::base::single_register_access::{SingleRegisterAccess, SingleRegisterAccessOps};
use gdbstub::target::ext::base::BaseOps;
use gdbstub::target::ext::target_description_xml_override::{
    TargetDescriptionXmlOverride, TargetDescriptionXmlOverrideOps,
};
use gdbstub::target::{Target, TargetError as GdbTargetError, TargetResult};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::net::TcpStream;
use std::num::NonZeroUsize;

use zegdb_core::{DeviceManager, ExecState, Ptid, ResumeKind, ResumeRequest, Signal, StopReason as CoreStopReason, WaitOptions, WaitOutcome, WaitStatus};

/// `(device-ordinal, thread seq_id)` packed into `gdbstub`'s single
/// `usize` `Tid` space. Both halves are assigned starting at 1 by
/// `DeviceManager`, so the packed value is never zero.
fn encode_tid(ordinal: u32, seq_id: u32) -> Tid {
    NonZeroUsize::new(((ordinal as usize) << 16) | seq_id as usize).expect("ordinal is never 0")
}

fn decode_tid(tid: Tid) -> (u32, u32) {
    let raw = tid.get();
    ((raw >> 16) as u32, (raw & 0xFFFF) as u32)
}

#[derive(Debug, thiserror::Error)]
pub enum StubError {
    #[error(transparent)]
    Target(#[from] zegdb_core::TargetError),
}

/// What the debugger last asked a given thread to do, between
/// `vCont`-style resume-action calls and the eventual `resume()`
/// ("set intent, then resume" as a two-phase sequence).
#[derive(Debug, Clone, Copy)]
enum PendingAction {
    Continue,
    Step,
}

/// The `gdbstub::target::Target` implementation wrapping a
/// [`DeviceManager`].
pub struct GpuTarget {
    manager: DeviceManager,
    resume_actions: HashMap<Tid, PendingAction>,
}

impl GpuTarget {
    pub fn new(manager: DeviceManager) -> Self {
        Self { manager, resume_actions: HashMap::new() }
    }

    pub fn manager(&self) -> &DeviceManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut DeviceManager {
        &mut self.manager
    }

    fn regset_elem_size(&self, ordinal: u32, regno: u32) -> Option<u32> {
        self.manager.device(ordinal)?.regset_info().lookup(regno).map(|(_, _, size)| size)
    }

    fn read_pc(&self, ordinal: u32, seq: u32) -> Option<u64> {
        let device = self.manager.device(ordinal)?;
        let session = device.session?;
        let tid = device.thread(seq)?.tid;
        self.manager.backend().read_pc(self.manager.driver(), session, tid).ok()
    }

    fn core_signal_to_gdb(sig: Signal) -> GdbSignal {
        match sig {
            Signal::TRAP => GdbSignal::SIGTRAP,
            Signal::ILL => GdbSignal::SIGILL,
            Signal::INT => GdbSignal::SIGINT,
            Signal::SEGV => GdbSignal::SIGSEGV,
            _ => GdbSignal::SIGTRAP,
        }
    }

    /// Translate one `wait()` outcome into the stop reason `gdbstub`
    /// reports over the wire, or `None` if nothing is reportable yet.
    fn translate_outcome(&self, outcome: WaitOutcome) -> Option<MultiThreadStopReason<u64>> {
        match outcome {
            WaitOutcome::Ignore => None,
            WaitOutcome::Process { ordinal, status } => {
                let tid = encode_tid(ordinal, 1);
                Some(Self::translate_status(tid, status, CoreStopReason::None))
            }
            WaitOutcome::Thread { ordinal, seq_id, status } => {
                let reason = self
                    .manager
                    .device(ordinal)
                    .and_then(|d| d.thread(seq_id))
                    .map(|t| t.stop_reason)
                    .unwrap_or(CoreStopReason::None);
                let tid = encode_tid(ordinal, seq_id);
                Some(Self::translate_status(tid, status, reason))
            }
        }
    }

    fn translate_status(tid: Tid, status: WaitStatus, reason: CoreStopReason) -> MultiThreadStopReason<u64> {
        match status {
            WaitStatus::Exited(code) => MultiThreadStopReason::Exited(code as u8),
            WaitStatus::Signalled(sig) => MultiThreadStopReason::Terminated(Self::core_signal_to_gdb(sig)),
            WaitStatus::Stopped(sig) => match reason {
                CoreStopReason::SwBreakpoint => MultiThreadStopReason::SwBreak(tid),
                CoreStopReason::SingleStep => MultiThreadStopReason::DoneStep,
                CoreStopReason::None => {
                    MultiThreadStopReason::SignalWithThread { tid, signal: Self::core_signal_to_gdb(sig) }
                }
            },
            WaitStatus::Unavailable | WaitStatus::Ignore => {
                MultiThreadStopReason::SignalWithThread { tid, signal: GdbSignal::SIGTRAP }
            }
        }
    }

    /// Build the `qXfer:features:read` document for one device
    /// : one `<feature>` block per regset, in `regno` order.
    fn target_xml_for(&self, ordinal: u32) -> String {
        let mut xml = String::from(
            "<?xml version=\"1.0\"?>\n<!DOCTYPE target SYSTEM \"gdb-target.dtd\">\n<target version=\"1.0\">\n",
        );
        let Some(device) = self.manager.device(ordinal) else {
            xml.push_str("</target>\n");
            return xml;
        };
        let tdesc = device.tdesc();
        let _ = writeln!(xml, "  <architecture>{}</architecture>", tdesc.arch);
        let _ = writeln!(xml, "  <osabi>{}</osabi>", tdesc.osabi);
        let mut regno = 0u32;
        for feature in &tdesc.features {
            let _ = writeln!(xml, "  <feature name=\"{}\">", feature.name);
            for _ in 0..feature.register_count {
                let _ = writeln!(
                    xml,
                    "    <reg name=\"r{regno}\" bitsize=\"{}\" regnum=\"{regno}\"/>",
                    feature.element_bits
                );
                regno += 1;
            }
            xml.push_str("  </feature>\n");
        }
        xml.push_str("</target>\n");
        xml
    }
}

impl Target for GpuTarget {
    type Arch = IntelGt;
    type Error = StubError;

    fn base_ops(&mut self) -> BaseOps<'_, Self::Arch, Self::Error> {
        BaseOps::MultiThread(self)
    }

    fn support_target_description_xml_override(&mut self) -> Option<TargetDescriptionXmlOverrideOps<'_, Self>> {
        Some(self)
    }
}

impl TargetDescriptionXmlOverride for GpuTarget {
    fn target_description_xml(&mut self) -> Result<Cow<'_, str>, Self::Error> {
        let ordinal = self.manager.devices().first().map(|d| d.ordinal).unwrap_or(1);
        Ok(Cow::Owned(self.target_xml_for(ordinal)))
    }
}

impl MultiThreadBase for GpuTarget {
    fn read_registers(&mut self, regs: &mut IntelGtRegisters, tid: Tid) -> TargetResult<(), Self> {
        let (ordinal, seq) = decode_tid(tid);
        let values = self.manager.fetch_registers(ordinal, seq, None);
        if values.is_empty() {
            return Err(GdbTargetError::NonFatal);
        }
        let mut raw = Vec::new();
        for (_, bytes) in values {
            if let Some(b) = bytes {
                raw.extend_from_slice(&b);
            }
        }
        regs.raw = raw;
        regs.pc = self.read_pc(ordinal, seq).unwrap_or(0);
        Ok(())
    }

    fn write_registers(&mut self, regs: &IntelGtRegisters, tid: Tid) -> TargetResult<(), Self> {
        let (ordinal, seq) = decode_tid(tid);
        let Some(total) = self.manager.device(ordinal).map(|d| d.regset_info().total_registers()) else {
            return Err(GdbTargetError::NonFatal);
        };
        let mut writes = Vec::new();
        let mut offset = 0usize;
        for regno in 0..total {
            let Some(size) = self.regset_elem_size(ordinal, regno) else { continue };
            let size = size as usize;
            if offset + size > regs.raw.len() {
                break;
            }
            writes.push((regno, regs.raw[offset..offset + size].to_vec()));
            offset += size;
        }
        self.manager
            .store_registers(ordinal, seq, &writes)
            .map_err(|e| GdbTargetError::Fatal(StubError::Target(e)))
    }

    fn read_addrs(&mut self, start_addr: u64, data: &mut [u8], tid: Tid) -> TargetResult<usize, Self> {
        let (ordinal, seq) = decode_tid(tid);
        let bytes = self
            .manager
            .read_memory(ordinal, Some(seq), start_addr, data.len(), 0)
            .map_err(|e| GdbTargetError::Fatal(StubError::Target(e)))?;
        let n = bytes.len().min(data.len());
        data[..n].copy_from_slice(&bytes[..n]);
        Ok(n)
    }

    fn write_addrs(&mut self, start_addr: u64, data: &[u8], tid: Tid) -> TargetResult<(), Self> {
        let (ordinal, seq) = decode_tid(tid);
        self.manager
            .write_memory(ordinal, Some(seq), start_addr, data, 0)
            .map_err(|e| GdbTargetError::Fatal(StubError::Target(e)))
    }

    fn list_active_threads(&mut self, thread_is_active: &mut dyn FnMut(Tid)) -> Result<(), Self::Error> {
        for device in self.manager.devices() {
            for thread in &device.threads {
                if thread.exec_state != ExecState::Exited {
                    thread_is_active(encode_tid(device.ordinal, thread.seq_id));
                }
            }
        }
        Ok(())
    }

    fn is_thread_alive(&mut self, tid: Tid) -> Result<bool, Self::Error> {
        let (ordinal, seq) = decode_tid(tid);
        Ok(self
            .manager
            .device(ordinal)
            .and_then(|d| d.thread(seq))
            .is_some_and(|t| t.exec_state != ExecState::Exited))
    }

    #[inline(always)]
    fn support_resume(&mut self) -> Option<MultiThreadResumeOps<'_, Self>> {
        Some(self)
    }

    #[inline(always)]
    fn support_single_register_access(&mut self) -> Option<SingleRegisterAccessOps<'_, Tid, Self>> {
        Some(self)
    }
}

impl SingleRegisterAccess<Tid> for GpuTarget {
    fn read_register(&mut self, tid: Tid, reg_id: IntelGtRegId, buf: &mut [u8]) -> TargetResult<usize, Self> {
        let (ordinal, seq) = decode_tid(tid);
        let values = self.manager.fetch_registers(ordinal, seq, Some(reg_id.0));
        let Some((_, Some(bytes))) = values.into_iter().next() else {
            return Err(GdbTargetError::NonFatal);
        };
        let n = bytes.len().min(buf.len());
        buf[..n].copy_from_slice(&bytes[..n]);
        Ok(n)
    }

    fn write_register(&mut self, tid: Tid, reg_id: IntelGtRegId, val: &[u8]) -> TargetResult<(), Self> {
        let (ordinal, seq) = decode_tid(tid);
        self.manager
            .store_registers(ordinal, seq, &[(reg_id.0, val.to_vec())])
            .map_err(|e| GdbTargetError::Fatal(StubError::Target(e)))
    }
}

impl MultiThreadResume for GpuTarget {
    fn resume(&mut self) -> Result<(), Self::Error> {
        let requests: Vec<ResumeRequest> = self
            .resume_actions
            .drain()
            .map(|(tid, action)| {
                let (ordinal, seq) = decode_tid(tid);
                let (kind, range) = match action {
                    PendingAction::Continue => (ResumeKind::Continue, None),
                    PendingAction::Step => (ResumeKind::Step, None),
                };
                ResumeRequest { ordinal: Some(ordinal), seq_id: Some(seq), kind, range, signal: 0 }
            })
            .collect();
        self.manager.resume(&requests);
        Ok(())
    }

    fn clear_resume_actions(&mut self) -> Result<(), Self::Error> {
        self.resume_actions.clear();
        Ok(())
    }

    fn set_resume_action_continue(&mut self, tid: Tid, signal: Option<GdbSignal>) -> Result<(), Self::Error> {
        if signal.is_some() {
            tracing::warn!("signals are never forwarded to the device, ignoring");
        }
        self.resume_actions.insert(tid, PendingAction::Continue);
        Ok(())
    }

    #[inline(always)]
    fn support_single_step(&mut self) -> Option<MultiThreadSingleStepOps<'_, Self>> {
        Some(self)
    }
}

impl MultiThreadSingleStep for GpuTarget {
    fn set_resume_action_step(&mut self, tid: Tid, signal: Option<GdbSignal>) -> Result<(), Self::Error> {
        if signal.is_some() {
            tracing::warn!("signals are never forwarded to the device, ignoring");
        }
        self.resume_actions.insert(tid, PendingAction::Step);
        Ok(())
    }
}

/// Groups the callbacks `GdbStub::run_blocking` needs ("the
/// RSP dispatcher drives `wait`/`resume` itself").
pub enum GpuEventLoop {}

impl run_blocking::BlockingEventLoop for GpuEventLoop {
    type Target = GpuTarget;
    type Connection = TcpStream;
    type StopReason = MultiThreadStopReason<u64>;

    fn wait_for_stop_reason(
        target: &mut GpuTarget,
        conn: &mut Self::Connection,
    ) -> Result<
        run_blocking::Event<MultiThreadStopReason<u64>>,
        run_blocking::WaitForStopReasonError<<GpuTarget as Target>::Error, <Self::Connection as Connection>::Error>,
    > {
        loop {
            match conn.peek() {
                Ok(Some(_)) => {
                    let byte = conn.read().map_err(run_blocking::WaitForStopReasonError::Connection)?;
                    return Ok(run_blocking::Event::IncomingData(byte));
                }
                Ok(None) => {}
                Err(e) => return Err(run_blocking::WaitForStopReasonError::Connection(e)),
            }

            let outcome = target.manager.wait(Ptid::default(), WaitOptions { no_hang: true });
            if let Some(reason) = target.translate_outcome(outcome) {
                return Ok(run_blocking::Event::TargetStopped(reason));
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
    }

    fn on_interrupt(target: &mut GpuTarget) -> Result<Option<MultiThreadStopReason<u64>>, <GpuTarget as Target>::Error> {
        let ordinals: Vec<u32> = target.manager.devices().iter().map(|d| d.ordinal).collect();
        for ordinal in ordinals {
            target.manager.request_interrupt(ordinal);
        }
        Ok(None)
    }
}

/// Serve one GDB connection to completion, wired up just enough to
/// exercise the adapter end to end.
pub fn serve(mut manager: DeviceManager, conn: Box<dyn ConnectionExt<Error = std::io::Error>>) -> anyhow::Result<()> {
    if let Err(e) = manager.enable_async_wake() {
        tracing::warn!(error = %e, "async wake pipe unavailable, falling back to plain polling");
    }
    let mut target = GpuTarget::new(manager);
    let gdb = GdbStub::new(conn);
    match gdb.run_blocking::<GpuEventLoop>(&mut target) {
        Ok(DisconnectReason::Disconnect) => tracing::info!("client disconnected"),
        Ok(DisconnectReason::TargetExited(code)) => tracing::info!(code, "target exited"),
        Ok(DisconnectReason::TargetTerminated(sig)) => tracing::info!(?sig, "target terminated"),
        Ok(DisconnectReason::Kill) => tracing::info!("client sent kill"),
        Err(e) => anyhow::bail!("gdbstub session error: {e}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use zegdb_core::backend::IntelGtBackend;
    use zegdb_core::config::AttachConfig;
    use zegdb_core::driver::fake::FakeDriver;
    use zegdb_core::driver::{DeviceProperties, RegsetDescriptor, RegsetKind};

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

    fn attached_target() -> GpuTarget {
        let driver = FakeDriver::new();
        driver.add_device(props(), regsets());
        let mut manager = DeviceManager::new(Box::new(driver), Box::new(IntelGtBackend), AttachConfig::default());
        manager.attach().unwrap();
        manager.post_attach_quiesce();
        GpuTarget::new(manager)
    }

    #[test]
    fn tid_round_trips_through_encode_decode() {
        assert_eq!(decode_tid(encode_tid(1, 1)), (1, 1));
        assert_eq!(decode_tid(encode_tid(3, 42)), (3, 42));
    }

    #[test]
    fn bulk_register_read_matches_total_register_count() {
        let mut target = attached_target();
        let tid = encode_tid(1, 1);
        let mut regs = IntelGtRegisters::default();
        target.read_registers(&mut regs, tid).unwrap();
        let total_bytes: u32 = regsets().iter().map(|r| r.byte_size * r.count).sum();
        assert_eq!(regs.raw.len(), total_bytes as usize);
    }

    #[test]
    fn single_register_write_then_read_round_trips() {
        let mut target = attached_target();
        let tid = encode_tid(1, 1);
        target.write_register(tid, IntelGtRegId(0), &[7, 0, 0, 0]).unwrap();
        let mut buf = [0u8; 4];
        let n = target.read_register(tid, IntelGtRegId(0), &mut buf).unwrap();
        assert_eq!(n, 4);
        assert_eq!(buf, [7, 0, 0, 0]);
    }

    #[test]
    fn writing_unwritable_regset_is_reported_fatal() {
        let mut target = attached_target();
        let tid = encode_tid(1, 1);
        // register 7 falls inside the non-writable SBA regset.
        let err = target.write_register(tid, IntelGtRegId(7), &[0; 8]).unwrap_err();
        assert!(matches!(err, GdbTargetError::Fatal(_)));
    }

    #[test]
    fn target_xml_lists_every_feature() {
        let target = attached_target();
        let xml = target.target_xml_for(1);
        for feature in &target.manager().device(1).unwrap().tdesc().features {
            assert!(xml.contains(feature.name));
        }
    }
}
