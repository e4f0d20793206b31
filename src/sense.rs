// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Automatic sense retrieval. A CHECK CONDITION completion re-arms the
//! same descriptor as a REQUEST SENSE command before anything else is
//! reported to the caller.

use log::debug;
use log::error;
use zerocopy::AsBytes;

use crate::constants::STATUS_UNSET;
use crate::controller::identify;
use crate::controller::CmdResult;
use crate::controller::CompletionSink;
use crate::controller::Controller;
use crate::hba_abi::RequestSenseCdb;
use crate::hba_abi::SgEntry;
use crate::hba_abi::CDB_MAX;
use crate::hba_abi::N_SG;
use crate::hw::AdapterHw;
use crate::hw::DataDirection;
use crate::pool::CmdState;
use crate::pool::DescriptorId;

impl<H: AdapterHw, S: CompletionSink> Controller<H, S> {
    /// Rebuild the descriptor as a REQUEST SENSE for the same target and
    /// hand it straight back to the scheduler. Runs in the completion
    /// interrupt context; no report goes to the caller yet.
    pub(crate) fn escalate_sense(&mut self, id: DescriptorId) {
        // The command's connection is over; give the slot back so the
        // sense command (or anyone else) can take it.
        self.unbind_slot(id);

        let (lun, sense_region) = {
            let d = self.pool.desc_mut(id);
            d.state = CmdState::Sense;
            (d.lun, d.sense_region)
        };
        debug!("escalating to request sense on lun {}", lun);

        // The data mapping belonged to the original command; the sense
        // data goes to the caller's sense buffer instead.
        if let Some(mapping) = self.pool.desc_mut(id).data_mapping.take() {
            self.dma.map_unload(mapping);
        }
        let mapping = match self.dma.map_load(&sense_region, DataDirection::FromDevice) {
            Ok(m) => m,
            Err(e) => {
                error!("cannot map sense buffer: {}", e);
                self.finish(id, CmdResult::DriverStuffup);
                return;
            }
        };

        let cdb = RequestSenseCdb::new(lun, sense_region.len.min(0xff) as u8);
        let mut sg = [SgEntry::default(); N_SG];
        let mut sg_count = 0;
        for s in mapping.segments.iter().take(N_SG) {
            sg[sg_count] = SgEntry {
                len: s.len,
                addr: s.addr.0,
            };
            sg_count += 1;
        }
        self.pool.desc_mut(id).data_mapping = Some(mapping);

        let table = self.pool.table_mut(id);
        table.cmd = [0; CDB_MAX];
        table.cmd[..cdb.as_bytes().len()].copy_from_slice(cdb.as_bytes());
        table.cmd_len = cdb.as_bytes().len() as u8;
        // No disconnect privilege for the sense round trip; it runs to
        // completion in one connection.
        table.msg_out[0] = identify(lun, false);
        table.msg_out_len = 1;
        table.msg_in_len = 0;
        table.status = STATUS_UNSET;
        table.bytes_done = 0;
        table.sg = sg;
        table.sg_count = sg_count as u32;

        self.pool.publish(id, self.dma.as_mut());
        // The descriptor kept its place at the head of the target queue,
        // so the scheduler picks it up next for that target.
        self.dispatch_ready();
        self.resume_script(self.script.entries.dispatch);
    }
}
