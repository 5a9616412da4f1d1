// ze-gdbserver - remote debug stub for Intel GPU compute devices
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! The async wake pipe: any operation that wants `wait` to
//! recheck writes one byte into the pipe; `wait` drains it at the start of
//! each retry. Both ends are kept non-blocking, and `EAGAIN` never counts
//! as a failure — a pending byte already guarantees the wakeup.

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::unistd::{pipe, read, write};
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

fn set_nonblocking(fd: RawFd) -> nix::Result<()> {
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

#[derive(Debug)]
pub struct WakePipe {
    read_end: OwnedFd,
    write_end: OwnedFd,
}

impl WakePipe {
    /// Opens the pipe and makes both ends non-blocking. On any failure both
    /// ends are dropped (closing the fds) rather than leave a half-open
    /// pipe around; the caller should disable async mode in that case.
    pub fn new() -> io::Result<Self> {
        let (read_end, write_end) = pipe()?;
        set_nonblocking(read_end.as_raw_fd())?;
        set_nonblocking(write_end.as_raw_fd())?;
        Ok(Self { read_end, write_end })
    }

    pub fn read_fd(&self) -> RawFd {
        self.read_end.as_raw_fd()
    }

    /// Writes one wakeup byte. Non-blocking; `EAGAIN` (the pipe already
    /// has a pending byte) is not an error.
    pub fn wake(&self) {
        match write(&self.write_end, &[0u8]) {
            Ok(_) | Err(nix::errno::Errno::EAGAIN) => {}
            Err(e) => tracing::warn!(error = %e, "wake pipe write failed"),
        }
    }

    /// Drains every pending byte. Called at the start of each `wait` retry.
    pub fn drain(&self) {
        let mut buf = [0u8; 64];
        loop {
            match read(&self.read_end, &mut buf) {
                Ok(0) => break,
                Ok(n) if n < buf.len() => break,
                Ok(_) => continue,
                Err(nix::errno::Errno::EAGAIN) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "wake pipe drain failed");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wake_then_drain_is_idempotent() {
        let pipe = WakePipe::new().expect("pipe creation should succeed in test environment");
        pipe.wake();
        pipe.wake();
        pipe.drain();
        // a second drain with nothing pending must not block or panic.
        pipe.drain();
    }
}
