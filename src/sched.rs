// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Slot scheduler: binds ready descriptors to free hardware slots and
//! wakes the script processor when it has new work.

use log::debug;

use crate::controller::CompletionSink;
use crate::controller::Controller;
use crate::hw::AdapterHw;
use crate::pool::CmdState;
use crate::pool::DescriptorId;
use crate::queue::MAX_TARGETS;
use crate::regs::ISTAT_SIGP;
use crate::regs::REG_ISTAT;

/// Host-side view of slot occupancy. The script region holds the truth
/// the hardware sees; this mirror is what the completion path consults.
pub struct SlotBank {
    slots: Vec<Option<DescriptorId>>,
    /// Slot scan cursor: the slot after the last one allocated.
    next_slot: usize,
    /// Target scan cursor, so no target starves under load.
    next_target: usize,
}

impl SlotBank {
    pub fn new(n: usize) -> SlotBank {
        SlotBank {
            slots: vec![None; n],
            next_slot: 0,
            next_target: 0,
        }
    }

    pub fn clear(&mut self) {
        self.slots.fill(None);
        self.next_slot = 0;
    }

    pub fn get(&self, slot: usize) -> Option<DescriptorId> {
        self.slots[slot]
    }

    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    fn bind(&mut self, slot: usize, id: DescriptorId) {
        debug_assert!(self.slots[slot].is_none());
        self.slots[slot] = Some(id);
        self.next_slot = (slot + 1) % self.slots.len();
    }

    pub fn release(&mut self, slot: usize) {
        self.slots[slot] = None;
    }

    fn find_free(&self) -> Option<usize> {
        let n = self.slots.len();
        (0..n)
            .map(|k| (self.next_slot + k) % n)
            .find(|&s| self.slots[s].is_none())
    }
}

impl<H: AdapterHw, S: CompletionSink> Controller<H, S> {
    /// Bind every schedulable queue head to a free slot, then wake the
    /// script processor once — or not at all, if nothing was bound.
    /// Returns the number of descriptors newly handed to hardware.
    pub(crate) fn dispatch_ready(&mut self) -> usize {
        let mut bound = 0;
        for k in 0..MAX_TARGETS {
            let target = (self.slots.next_target + k) % MAX_TARGETS;
            let Some(id) = self.queues.head(target as u8) else {
                continue;
            };
            // Only the head runs, and only if it is not already on
            // hardware; that is what serializes a target's commands.
            let sense = match self.pool.desc(id).state {
                CmdState::Ready => false,
                CmdState::Sense => true,
                _ => continue,
            };
            let Some(slot) = self.slots.find_free() else {
                break;
            };

            let dsa = self.pool.table_bus(id);
            self.script.bind_slot(slot, dsa);
            self.slots.bind(slot, id);
            self.slots.next_target = (target + 1) % MAX_TARGETS;

            let now = self.ticks;
            let d = self.pool.desc_mut(id);
            d.state = if sense {
                CmdState::SenseActive
            } else {
                CmdState::Active
            };
            d.bound_slot = Some(slot);
            d.deadline = d.timeout_ticks.map(|t| now + u64::from(t));
            debug!("slot {} <- target {} ({})", slot, target, dsa);
            bound += 1;
        }

        if bound > 0 {
            self.script.publish(self.dma.as_mut());
            self.hw.write32(REG_ISTAT, ISTAT_SIGP);
        }
        bound
    }

    /// Drop a descriptor's slot binding and restore the slot's free
    /// sentinel in the script.
    pub(crate) fn unbind_slot(&mut self, id: DescriptorId) {
        if let Some(slot) = self.pool.desc_mut(id).bound_slot.take() {
            self.script.free_slot(slot);
            self.slots.release(slot);
            self.script.publish(self.dma.as_mut());
        }
    }
}
