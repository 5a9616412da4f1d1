// ze-gdbserver - remote debug stub for Intel GPU compute devices
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! One lazy register cache per thread.

use crate::backend::RegsetInfo;
use crate::driver::{DebugDriver, SessionHandle, ThreadId};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Unknown,
    Valid,
    Dirty,
    Unavailable,
}

#[derive(Debug, Default)]
pub struct RegisterCache {
    slots: HashMap<u32, (SlotState, Vec<u8>)>,
    fully_fetched: bool,
}

impl RegisterCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self, regno: u32) -> SlotState {
        self.slots
            .get(&regno)
            .map(|(s, _)| *s)
            .unwrap_or(SlotState::Unknown)
    }

    /// Read one register, fetching it lazily from the driver if the slot
    /// is still `unknown`.
    pub fn read(
        &mut self,
        regno: u32,
        regset_info: &RegsetInfo,
        driver: &dyn DebugDriver,
        session: SessionHandle,
        thread: ThreadId,
    ) -> Option<Vec<u8>> {
        match self.state(regno) {
            SlotState::Valid | SlotState::Dirty => {
                self.slots.get(&regno).map(|(_, bytes)| bytes.clone())
            }
            SlotState::Unavailable => None,
            SlotState::Unknown => {
                let (type_code, index, _) = regset_info.lookup(regno)?;
                match driver.read_registers(session, thread, type_code, index, 1) {
                    Some(bytes) => {
                        self.slots.insert(regno, (SlotState::Valid, bytes.clone()));
                        Some(bytes)
                    }
                    None => {
                        self.slots.insert(regno, (SlotState::Unavailable, Vec::new()));
                        None
                    }
                }
            }
        }
    }

    /// User write: promotes `unknown -> valid -> dirty`.
    pub fn write(&mut self, regno: u32, bytes: Vec<u8>) {
        self.slots.insert(regno, (SlotState::Dirty, bytes));
    }

    /// Fetch-all semantics: flush individually-dirty registers first,
    /// invalidate, then bulk-fetch everything and mark whatever is still
    /// unknown afterward as unavailable.
    pub fn fetch_all(
        &mut self,
        regset_info: &RegsetInfo,
        driver: &dyn DebugDriver,
        session: SessionHandle,
        thread: ThreadId,
    ) {
        if self.fully_fetched {
            return;
        }
        self.flush_dirty(regset_info, driver, session, thread);
        self.slots.clear();

        for range in &regset_info.ranges {
            match driver.read_registers(session, thread, range.type_code, 0, range.regno_end - range.regno_start) {
                Some(bytes) => {
                    for (i, chunk) in bytes.chunks(range.elem_size as usize).enumerate() {
                        let regno = range.regno_start + i as u32;
                        self.slots
                            .insert(regno, (SlotState::Valid, chunk.to_vec()));
                    }
                }
                None => {
                    for regno in range.regno_start..range.regno_end {
                        self.slots
                            .entry(regno)
                            .or_insert((SlotState::Unavailable, Vec::new()));
                    }
                }
            }
        }
        self.fully_fetched = true;
    }

    /// Write only dirty slots back to the driver.
    pub fn flush_dirty(
        &mut self,
        regset_info: &RegsetInfo,
        driver: &dyn DebugDriver,
        session: SessionHandle,
        thread: ThreadId,
    ) {
        for (&regno, (state, bytes)) in self.slots.iter_mut() {
            if *state != SlotState::Dirty {
                continue;
            }
            if let Some((type_code, index, _)) = regset_info.lookup(regno) {
                if driver.write_registers(session, thread, type_code, index, bytes) {
                    *state = SlotState::Valid;
                } else {
                    *state = SlotState::Unavailable;
                }
            }
        }
    }

    /// Flush dirty slots back, then reset all slot state to `unknown`.
    /// Called on resume, or on an explicit cache invalidate (e.g. when a
    /// thread stop is observed and the cache must be rebuilt).
    pub fn invalidate(
        &mut self,
        regset_info: &RegsetInfo,
        driver: &dyn DebugDriver,
        session: SessionHandle,
        thread: ThreadId,
    ) {
        self.flush_dirty(regset_info, driver, session, thread);
        self.slots.clear();
        self.fully_fetched = false;
    }

    pub fn discard(&mut self) {
        self.slots.clear();
        self.fully_fetched = false;
    }
}
