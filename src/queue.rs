// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Per-target active lists. Each target's commands run strictly FIFO;
//! only the head of a list is ever eligible for a scheduler slot, which
//! is what keeps one command per target on the bus at a time.

use std::collections::VecDeque;

use crate::pool::DescriptorId;

/// Number of addressable SCSI target ids.
pub const MAX_TARGETS: usize = 16;

pub struct TargetQueues {
    queues: [VecDeque<DescriptorId>; MAX_TARGETS],
}

impl TargetQueues {
    pub fn new() -> TargetQueues {
        TargetQueues {
            queues: std::array::from_fn(|_| VecDeque::new()),
        }
    }

    pub fn enqueue(&mut self, target: u8, id: DescriptorId) {
        self.queues[target as usize].push_back(id);
    }

    pub fn head(&self, target: u8) -> Option<DescriptorId> {
        self.queues[target as usize].front().copied()
    }

    /// Remove a specific descriptor wherever it sits in its target's
    /// list. Completion normally removes the head; bus-reset recovery may
    /// remove from the middle.
    pub fn remove(&mut self, target: u8, id: DescriptorId) {
        let q = &mut self.queues[target as usize];
        if let Some(pos) = q.iter().position(|&e| e == id) {
            q.remove(pos);
        }
    }

    pub fn len(&self, target: u8) -> usize {
        self.queues[target as usize].len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.iter().all(|q| q.is_empty())
    }

    pub(crate) fn queue(&self, target: usize) -> &VecDeque<DescriptorId> {
        &self.queues[target]
    }

    pub(crate) fn queue_mut(&mut self, target: usize) -> &mut VecDeque<DescriptorId> {
        &mut self.queues[target]
    }
}

impl Default for TargetQueues {
    fn default() -> Self {
        Self::new()
    }
}
