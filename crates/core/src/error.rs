// ze-gdbserver - remote debug stub for Intel GPU compute devices
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use thiserror::Error;

/// Errors from `attach()`.
///
/// Per-device attach failures are accumulated and only surfaced if zero
/// devices attached at all; otherwise the stub just logs and continues
/// with the surviving set.
#[derive(Debug, Error)]
pub enum AttachError {
    #[error("no devices attached: {0}")]
    NoDevices(String),
}

/// The driver's classification of a single device's attach attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    /// Non-null debug session: the device is usable.
    Success,
    /// Driver not yet initialized.
    NotReady,
    /// The device doesn't meet the minimum support bar; skip silently.
    UnsupportedFeature,
    /// Someone else already attached to this device.
    NotAvailable,
    Other,
}

/// User-visible errors raised to the (out-of-scope) RSP dispatcher layer.
/// These return an `EIO`-style errno from memory operations rather than
/// unwind.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TargetError {
    #[error("malformed thread-id string: {0:?}")]
    MalformedThreadId(String),
    #[error("SIMD lane {0} out of range (max 31)")]
    LaneOutOfRange(u32),
    #[error("register set {0:?} is not writable")]
    RegsetNotWritable(String),
    #[error("PC {0:#x} is outside the ISA range (isabase {1:#x})")]
    PcOutOfRange(u64, u64),
    #[error("memory access in address space {0} requires a stopped thread")]
    MemoryAccessNeedsThread(u32),
    #[error("no such thread: {0:?}")]
    NoSuchThread(String),
}

impl TargetError {
    /// The `errno`-like integer the memory bridge returns instead of
    /// throwing.
    pub fn io_errno(&self) -> i32 {
        const EIO: i32 = 5;
        EIO
    }
}
