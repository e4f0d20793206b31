// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Script loader: builds the fixed program and the scheduler slot bank in
//! DMA-coherent memory, and brings the chip from reset into its idle
//! wait-for-reselect loop.

use log::info;
use remain::sorted;
use thiserror::Error;
use zerocopy::AsBytes;

use crate::controller::CompletionSink;
use crate::controller::Controller;
use crate::hba_abi::*;
use crate::hw::AdapterHw;
use crate::hw::BusAddr;
use crate::hw::DmaError;
use crate::hw::DmaOps;
use crate::hw::SyncDir;
use crate::regs::*;

#[sorted]
#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot map script ram: {0}")]
    CoherentMap(DmaError),
    #[error("chip did not come out of soft reset")]
    ResetTimeout,
    #[error("script ram of {0} bytes holds no scheduler slot")]
    ScriptRamTooSmall(usize),
}

type Result<T> = std::result::Result<T, Error>;

/// Words of fixed program ahead of the slot bank. The builder asserts
/// this against what it actually emitted.
const FIXED_WORDS: usize = 36;
/// Words of the wait-for-reselect tail behind the last slot.
const TAIL_WORDS: usize = 4;

const RESET_POLL_TRIES: u32 = 100;
const RESET_POLL_US: u32 = 10;

/// Word offsets of the entry points the interrupt handlers resume at.
#[derive(Copy, Clone, Debug, Default)]
pub struct Entries {
    /// Scheduler dispatch loop: scans the slot bank.
    pub dispatch: usize,
    /// Resume a (re)selected command through its remaining phases.
    pub selected: usize,
    /// Fetch the status byte and the final message.
    pub status: usize,
    /// Capture the next message-in byte(s).
    pub msg_in: usize,
    /// Raise ATN and send whatever is in the outgoing message buffer.
    pub send_msg: usize,
    /// Fetch the remaining bytes of an announced extended message.
    pub ext_fetch: usize,
    /// Idle loop: wait for a reselecting target.
    pub wait_reselect: usize,
}

/// The coherent script region plus the slot bank geometry within it.
pub struct ScriptRegion {
    ram: Box<[u32]>,
    bus: BusAddr,
    n_slots: usize,
    slot_base: usize,
    pub entries: Entries,
}

impl ScriptRegion {
    pub fn new(ram_bytes: usize, dma: &mut dyn DmaOps) -> Result<ScriptRegion> {
        let words = ram_bytes / 4;
        if words < FIXED_WORDS + TAIL_WORDS + SLOT_WORDS {
            return Err(Error::ScriptRamTooSmall(ram_bytes));
        }
        let n_slots = ((words - FIXED_WORDS - TAIL_WORDS) / SLOT_WORDS).min(MAX_SLOTS);
        let bus = dma.map_coherent(ram_bytes as u32).map_err(Error::CoherentMap)?;
        let mut region = ScriptRegion {
            ram: vec![OP_NOP; words].into_boxed_slice(),
            bus,
            n_slots,
            slot_base: 0,
            entries: Entries::default(),
        };
        region.rebuild();
        Ok(region)
    }

    pub fn n_slots(&self) -> usize {
        self.n_slots
    }

    /// Bus address of a word offset; this is what goes into the script
    /// pointer register.
    pub fn bus_of(&self, word_off: usize) -> u32 {
        self.bus.0 + (word_off * 4) as u32
    }

    /// Rewrite the whole region from scratch: fixed program, slot bank
    /// with every slot free, wait-for-reselect tail. Idempotent; run at
    /// attach and again after every bus reset.
    pub fn rebuild(&mut self) {
        self.ram.fill(OP_NOP);
        let mut off = 0;
        let mut emit = |ram: &mut Box<[u32]>, op: u32, operand: u32| {
            ram[off] = op;
            ram[off + 1] = operand;
            off += 2;
            off - 2
        };

        // Dispatch head: jump into the slot bank (operand patched below).
        self.entries.dispatch = emit(&mut self.ram, OP_JUMP, 0);
        // Command execution engine, entered after (re)selection.
        self.entries.selected = emit(&mut self.ram, OP_CLEAR_ACK, 0);
        emit(&mut self.ram, OP_MOVE_MSG_OUT, 0);
        emit(&mut self.ram, OP_MOVE_CMD, 0);
        emit(&mut self.ram, OP_MOVE_DATA, 0);
        // Falls through into status fetch.
        self.entries.status = emit(&mut self.ram, OP_MOVE_STATUS, 0);
        emit(&mut self.ram, OP_MOVE_MSG_IN, 0);
        emit(&mut self.ram, OP_INT, SIG_DONE);
        // Message-in: classify; save-data-pointers/disconnect pairs are
        // handled in-script, everything else is raised to the host.
        self.entries.msg_in = emit(&mut self.ram, OP_MOVE_MSG_IN, 1);
        emit(&mut self.ram, OP_CLASSIFY_MSG, 0);
        emit(&mut self.ram, OP_INT, SIG_MSG_IN);
        // Disconnect path: record progress, release the bus, tell host.
        emit(&mut self.ram, OP_SAVE_PTRS, 0);
        emit(&mut self.ram, OP_INT, SIG_DISCONNECTED);
        // Send the outgoing message buffer under ATN.
        self.entries.send_msg = emit(&mut self.ram, OP_SET_ATN, 0);
        emit(&mut self.ram, OP_MOVE_MSG_OUT, 0);
        let msg_in_entry = self.entries.msg_in as u32;
        emit(&mut self.ram, OP_JUMP, msg_in_entry);
        // Fetch the rest of an extended message.
        self.entries.ext_fetch = emit(&mut self.ram, OP_MOVE_EXT_MSG, 0);
        emit(&mut self.ram, OP_INT, SIG_EXT_MSG_DONE);

        debug_assert_eq!(off, FIXED_WORDS);
        self.slot_base = off;
        self.ram[self.entries.dispatch + 1] = self.slot_base as u32;

        for i in 0..self.n_slots {
            self.write_slot_template(i);
        }

        off = self.slot_base + self.n_slots * SLOT_WORDS;
        self.entries.wait_reselect = off;
        self.ram[off] = OP_WAIT_RESELECT;
        self.ram[off + 1] = 0;
        self.ram[off + 2] = OP_INT;
        self.ram[off + 3] = SIG_RESELECTED;
    }

    fn slot_off(&self, slot: usize) -> usize {
        self.slot_base + slot * SLOT_WORDS
    }

    fn write_slot_template(&mut self, slot: usize) {
        let o = self.slot_off(slot);
        let e = self.entries;
        // A free slot's leading jump skips the body; for the last slot
        // that lands on the wait-for-reselect tail right behind the bank.
        self.ram[o] = OP_JUMP;
        self.ram[o + 1] = (o + SLOT_WORDS) as u32;
        self.ram[o + 2] = OP_LOAD_DSA;
        self.ram[o + 3] = 0;
        self.ram[o + 4] = OP_SELECT_ATN;
        self.ram[o + 5] = 0;
        self.ram[o + 6] = OP_JUMP;
        self.ram[o + 7] = e.selected as u32;
    }

    /// Patch a descriptor's table address into a slot and clear the free
    /// sentinel so the dispatch loop falls into the body.
    pub fn bind_slot(&mut self, slot: usize, dsa: BusAddr) {
        let o = self.slot_off(slot);
        debug_assert_ne!(self.ram[o + 1], 0, "binding an occupied slot");
        self.ram[o + 3] = dsa.0;
        self.ram[o + 5] = dsa.0;
        self.ram[o + 1] = 0;
    }

    /// Restore the free sentinel and wipe the descriptor address.
    pub fn free_slot(&mut self, slot: usize) {
        self.write_slot_template(slot);
    }

    pub fn slot_is_free(&self, slot: usize) -> bool {
        self.ram[self.slot_off(slot) + 1] != 0
    }

    /// Descriptor address currently patched into a slot (0 when free).
    pub fn slot_dsa(&self, slot: usize) -> u32 {
        self.ram[self.slot_off(slot) + 3]
    }

    /// Flush the region through the coherency boundary so the script
    /// processor sees the latest patches.
    pub fn publish(&mut self, dma: &mut dyn DmaOps) {
        dma.sync(self.bus, self.ram.as_bytes().len() as u32, SyncDir::ToDevice);
    }
}

impl<H: AdapterHw, S: CompletionSink> Controller<H, S> {
    /// Soft-reset the chip, reinstall the whole script program with every
    /// slot free, program the static configuration and park the script
    /// processor in its wait-for-reselect loop.
    pub(crate) fn reset_and_load(&mut self) -> Result<()> {
        self.hw.write32(REG_ISTAT, ISTAT_SRST);
        let mut ready = false;
        for _ in 0..RESET_POLL_TRIES {
            self.hw.delay_us(RESET_POLL_US);
            if self.hw.read32(REG_ISTAT) & ISTAT_SRST == 0 {
                ready = true;
                break;
            }
        }
        if !ready {
            return Err(Error::ResetTimeout);
        }

        self.script.rebuild();
        self.slots.clear();
        self.script.publish(self.dma.as_mut());

        self.hw.write32(REG_SCID, self.cfg.own_id as u32);
        self.hw.write32(REG_SXFER, 0);
        let mut scntl = SCNTL_ARB_FULL;
        if self.cfg.parity {
            scntl |= SCNTL_EPC;
        }
        self.hw.write32(REG_SCNTL, scntl);
        self.hw.write32(REG_STIME, self.cfg.sel_timeout_code);

        let entry = self.script.entries.wait_reselect;
        self.hw.write32(REG_DSP, self.script.bus_of(entry));
        info!(
            "script processor loaded: {} slots, id {}",
            self.script.n_slots(),
            self.cfg.own_id
        );
        Ok(())
    }
}
