// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Fixed pool of command descriptors and their DMA-coherent transfer
//! tables. Descriptor identity (and therefore bus address) is stable for
//! the life of the pool; hardware holds these addresses while commands
//! are in flight.

use zerocopy::AsBytes;
use zerocopy::FromBytes;
use zerocopy::FromZeroes;

use crate::controller::RequestHandle;
use crate::hba_abi::TransferTable;
use crate::hba_abi::TABLE_SIZE;
use crate::hw::BusAddr;
use crate::hw::DmaError;
use crate::hw::DmaMapping;
use crate::hw::DmaOps;
use crate::hw::IoRegion;
use crate::hw::SyncDir;

/// Index of a descriptor in the pool. Never reused while the descriptor
/// is referenced by hardware.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DescriptorId(pub(crate) u16);

impl DescriptorId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Lifecycle of one descriptor.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CmdState {
    /// On the free list, unreferenced by hardware.
    Free,
    /// On a target's active list, waiting for a scheduler slot.
    Ready,
    /// Bound to a hardware slot; the script processor owns it.
    Active,
    /// Terminal; awaiting completion reporting and release.
    Done,
    /// Completed with CHECK CONDITION; a sense request will be re-issued
    /// from this same descriptor.
    Sense,
    /// The re-issued sense request is bound to a hardware slot.
    SenseActive,
    /// Terminal state of the sense round trip.
    SenseDone,
}

impl CmdState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CmdState::Done | CmdState::SenseDone)
    }

    pub fn is_on_hardware(self) -> bool {
        matches!(self, CmdState::Active | CmdState::SenseActive)
    }
}

/// One in-flight or free SCSI command.
#[derive(Debug)]
pub struct CommandDescriptor {
    pub target: u8,
    pub lun: u8,
    pub handle: RequestHandle,
    pub state: CmdState,
    /// Loaded mapping of the caller's data buffer; rebound to the sense
    /// buffer during sense escalation; absent for no-data commands.
    pub data_mapping: Option<DmaMapping>,
    /// Caller-provided buffer for automatic sense retrieval.
    pub sense_region: IoRegion,
    /// Watchdog deadline in controller ticks; None while unarmed.
    pub deadline: Option<u64>,
    /// Requested watchdog budget; None means untimed (polled) execution.
    pub timeout_ticks: Option<u32>,
    pub timed_out: bool,
    /// A MESSAGE REJECT from us is outstanding on the bus.
    pub rejecting: bool,
    /// Scheduler slot this descriptor currently occupies.
    pub bound_slot: Option<usize>,
    /// The transfer table is hardware-owned; host access must reclaim it
    /// across a sync boundary first.
    hw_owned: bool,
}

impl CommandDescriptor {
    fn new() -> Self {
        CommandDescriptor {
            target: 0,
            lun: 0,
            handle: RequestHandle(0),
            state: CmdState::Free,
            data_mapping: None,
            sense_region: IoRegion::default(),
            deadline: None,
            timeout_ticks: None,
            timed_out: false,
            rejecting: false,
            bound_slot: None,
            hw_owned: false,
        }
    }
}

/// The pool itself: descriptors plus one coherent block holding every
/// transfer table back to back.
pub struct DescriptorPool {
    descs: Box<[CommandDescriptor]>,
    /// u32 backing keeps every table 4-byte aligned.
    table_words: Box<[u32]>,
    table_bus: BusAddr,
    free: Vec<DescriptorId>,
}

impl DescriptorPool {
    pub fn new(n: usize, dma: &mut dyn DmaOps) -> Result<DescriptorPool, DmaError> {
        let bytes = n * TABLE_SIZE;
        let table_bus = dma.map_coherent(bytes as u32)?;
        let descs = (0..n).map(|_| CommandDescriptor::new()).collect();
        let free = (0..n).rev().map(|i| DescriptorId(i as u16)).collect();
        Ok(DescriptorPool {
            descs,
            table_words: vec![0u32; bytes / 4].into_boxed_slice(),
            table_bus,
            free,
        })
    }

    pub fn len(&self) -> usize {
        self.descs.len()
    }

    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    /// Pop a free descriptor, or None when the pool is exhausted and the
    /// caller has to back off and retry later.
    pub fn acquire(&mut self) -> Option<DescriptorId> {
        let id = self.free.pop()?;
        debug_assert_eq!(self.descs[id.index()].state, CmdState::Free);
        Some(id)
    }

    /// Return a descriptor acquired but never submitted (a failed submit
    /// path). It must still be in `Free` state.
    pub fn put_back(&mut self, id: DescriptorId) {
        debug_assert_eq!(self.descs[id.index()].state, CmdState::Free);
        self.free.push(id);
    }

    /// Release a terminal descriptor back to the free list, unloading its
    /// data mapping. Releasing a descriptor that has not reached a
    /// terminal state is a driver bug and panics.
    pub fn release(&mut self, id: DescriptorId, dma: &mut dyn DmaOps) {
        let d = &mut self.descs[id.index()];
        assert!(
            d.state.is_terminal(),
            "descriptor {} released in state {:?}",
            id.0,
            d.state
        );
        if let Some(mapping) = d.data_mapping.take() {
            dma.map_unload(mapping);
        }
        d.state = CmdState::Free;
        d.hw_owned = false;
        d.timed_out = false;
        d.rejecting = false;
        d.deadline = None;
        d.bound_slot = None;
        self.free.push(id);
    }

    pub fn desc(&self, id: DescriptorId) -> &CommandDescriptor {
        &self.descs[id.index()]
    }

    pub fn desc_mut(&mut self, id: DescriptorId) -> &mut CommandDescriptor {
        &mut self.descs[id.index()]
    }

    /// Bus address of the descriptor's transfer table; this is the value
    /// hardware carries in its data structure address register.
    pub fn table_bus(&self, id: DescriptorId) -> BusAddr {
        self.table_bus.offset((id.index() * TABLE_SIZE) as u32)
    }

    /// Map a hardware data structure address back to a descriptor, if it
    /// falls inside the pool.
    pub fn id_for_bus(&self, addr: u32) -> Option<DescriptorId> {
        let base = self.table_bus.0;
        let span = (self.descs.len() * TABLE_SIZE) as u32;
        if addr < base || addr >= base + span {
            return None;
        }
        let off = addr - base;
        if off as usize % TABLE_SIZE != 0 {
            return None;
        }
        Some(DescriptorId((off as usize / TABLE_SIZE) as u16))
    }

    /// Host-side view of the table. Only valid while the host owns it.
    pub fn table_mut(&mut self, id: DescriptorId) -> &mut TransferTable {
        debug_assert!(
            !self.descs[id.index()].hw_owned,
            "host access to a hardware-owned table"
        );
        self.table_view(id)
    }

    /// Hand the table to hardware: flush it through the coherency
    /// boundary and mark it device-owned.
    pub fn publish(&mut self, id: DescriptorId, dma: &mut dyn DmaOps) {
        let addr = self.table_bus(id);
        let d = &mut self.descs[id.index()];
        d.hw_owned = true;
        dma.sync(addr, TABLE_SIZE as u32, SyncDir::ToDevice);
    }

    /// Take the table back from hardware after a completion interrupt:
    /// invalidate through the coherency boundary, then hand out the view.
    pub fn reclaim(&mut self, id: DescriptorId, dma: &mut dyn DmaOps) -> &mut TransferTable {
        let addr = self.table_bus(id);
        dma.sync(addr, TABLE_SIZE as u32, SyncDir::FromDevice);
        self.descs[id.index()].hw_owned = false;
        self.table_view(id)
    }

    fn table_view(&mut self, id: DescriptorId) -> &mut TransferTable {
        let start = id.index() * TABLE_SIZE;
        let bytes = &mut self.table_words.as_bytes_mut()[start..start + TABLE_SIZE];
        TransferTable::mut_from(bytes).expect("transfer table misaligned")
    }

    /// Reset a freshly acquired table to a clean pre-command state.
    pub fn init_table(&mut self, id: DescriptorId) {
        let table = self.table_view(id);
        *table = TransferTable::new_zeroed();
        table.id = id.0 as u32;
        table.status = crate::constants::STATUS_UNSET;
    }

    /// Hardware-side write access for simulation: bypasses the ownership
    /// check because it models the script processor, not the host.
    #[cfg(test)]
    pub fn hw_poke_table(&mut self, id: DescriptorId, f: impl FnOnce(&mut TransferTable)) {
        f(self.table_view(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeDma;

    fn pool(n: usize) -> (DescriptorPool, FakeDma) {
        let mut dma = FakeDma::new();
        let pool = DescriptorPool::new(n, &mut dma).unwrap();
        (pool, dma)
    }

    #[test]
    fn acquire_until_exhausted() {
        let (mut p, _dma) = pool(2);
        assert!(p.acquire().is_some());
        assert!(p.acquire().is_some());
        assert_eq!(p.acquire(), None);
    }

    #[test]
    fn release_returns_to_free_list() {
        let (mut p, mut dma) = pool(1);
        let id = p.acquire().unwrap();
        assert_eq!(p.free_len(), 0);
        p.desc_mut(id).state = CmdState::Done;
        p.release(id, &mut dma);
        assert_eq!(p.free_len(), 1);
        assert_eq!(p.desc(id).state, CmdState::Free);
    }

    #[test]
    #[should_panic(expected = "released descriptor")]
    fn release_of_active_descriptor_panics() {
        let (mut p, mut dma) = pool(1);
        let id = p.acquire().unwrap();
        p.desc_mut(id).state = CmdState::Active;
        p.release(id, &mut dma);
    }

    #[test]
    fn bus_address_round_trip() {
        let (p, _dma) = pool(4);
        for i in 0..4 {
            let id = DescriptorId(i);
            assert_eq!(p.id_for_bus(p.table_bus(id).0), Some(id));
        }
        assert_eq!(p.id_for_bus(p.table_bus(DescriptorId(0)).0 + 1), None);
        assert_eq!(p.id_for_bus(0), None);
    }

    #[test]
    fn table_init_sets_sentinel() {
        let (mut p, _dma) = pool(1);
        let id = p.acquire().unwrap();
        p.init_table(id);
        let t = p.table_mut(id);
        assert_eq!(t.status, crate::constants::STATUS_UNSET);
        assert_eq!(t.id, 0);
        assert_eq!(t.sg_count, 0);
    }

    #[test]
    fn publish_and_reclaim_cross_sync() {
        let (mut p, mut dma) = pool(1);
        let id = p.acquire().unwrap();
        p.init_table(id);
        p.publish(id, &mut dma);
        assert_eq!(dma.state.borrow().syncs_to_device, 1);
        let _ = p.reclaim(id, &mut dma);
        assert_eq!(dma.state.borrow().syncs_from_device, 1);
    }
}
