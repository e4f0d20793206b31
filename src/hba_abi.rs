// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Data structures shared with the script processor. Everything in this
//! file is read (and partially written) by hardware; layouts are fixed.

use static_assertions::const_assert_eq;
use zerocopy::AsBytes;
use zerocopy::FromBytes;
use zerocopy::FromZeroes;

/// Maximum command descriptor block size we pass through.
pub const CDB_MAX: usize = 16;
/// Message buffer size, in and out.
pub const MSG_BUF_LEN: usize = 8;
/// Maximum scatter/gather entries per command.
pub const N_SG: usize = 16;

/// One scatter/gather element as the script processor consumes it.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, AsBytes, FromZeroes, FromBytes)]
#[repr(C)]
pub struct SgEntry {
    /// Transfer length in bytes.
    pub len: u32,
    /// Bus address of the segment.
    pub addr: u32,
}

/// Per-command record co-resident with its descriptor in DMA-coherent
/// memory. The host owns it until the command is handed to hardware;
/// after that the host touches it only across an explicit sync boundary.
/// `status` and `bytes_done` are written back by the script processor.
#[derive(Copy, Clone, Debug, AsBytes, FromZeroes, FromBytes)]
#[repr(C)]
pub struct TransferTable {
    /// Back-reference: index of the owning descriptor.
    pub id: u32,
    /// Command bytes the script moves during COMMAND phase.
    pub cmd: [u8; CDB_MAX],
    /// Valid length of `cmd`.
    pub cmd_len: u8,
    /// Valid length of `msg_out`.
    pub msg_out_len: u8,
    /// Bytes of `msg_in` filled by the script.
    pub msg_in_len: u8,
    /// Status byte from the target; `STATUS_UNSET` until hardware stores it.
    pub status: u8,
    /// Outgoing message bytes (identify, rejects, negotiation answers).
    pub msg_out: [u8; MSG_BUF_LEN],
    /// Incoming message bytes captured by the script.
    pub msg_in: [u8; MSG_BUF_LEN],
    /// Opaque transfer configuration loaded into the chip for this command.
    pub xfer_cfg: u8,
    reserved: [u8; 3],
    /// Bytes moved in the current connection, recorded by the script
    /// before it signals a disconnect or phase change.
    pub bytes_done: u32,
    /// Number of valid entries in `sg`.
    pub sg_count: u32,
    /// Remaining scatter/gather program for the data phase.
    pub sg: [SgEntry; N_SG],
}

const_assert_eq!(std::mem::size_of::<SgEntry>(), 8);
const_assert_eq!(std::mem::size_of::<TransferTable>(), 180);

/// Size of one transfer table in bytes.
pub const TABLE_SIZE: usize = std::mem::size_of::<TransferTable>();

impl TransferTable {
    /// Drop scatter/gather entries already consumed by the hardware and
    /// trim a partially consumed head entry, so a later reconnect resumes
    /// at the right place. Progress past the end of the program is
    /// clamped; the table then has no data left to move.
    pub fn compact_sg(&mut self, mut consumed: u32) {
        let count = (self.sg_count as usize).min(N_SG);
        let mut first_kept = count;
        for i in 0..count {
            let len = self.sg[i].len;
            if consumed >= len {
                consumed -= len;
            } else {
                self.sg[i].addr += consumed;
                self.sg[i].len -= consumed;
                first_kept = i;
                break;
            }
        }
        let kept = count - first_kept;
        for i in 0..kept {
            self.sg[i] = self.sg[first_kept + i];
        }
        for e in self.sg[kept..count].iter_mut() {
            *e = SgEntry::default();
        }
        self.sg_count = kept as u32;
    }

    /// Total bytes left in the scatter/gather program.
    pub fn sg_remaining(&self) -> u32 {
        self.sg[..(self.sg_count as usize).min(N_SG)]
            .iter()
            .map(|e| e.len)
            .sum()
    }
}

/// REQUEST SENSE command descriptor block.
#[derive(Copy, Clone, Debug, Default, AsBytes, FromZeroes, FromBytes)]
#[repr(C, packed)]
pub struct RequestSenseCdb {
    pub opcode: u8,
    /// Logical unit number in the top three bits (historic field).
    pub lun_field: u8,
    reserved: [u8; 2],
    /// Allocation length: how many sense bytes the target may return.
    pub alloc_len: u8,
    pub control: u8,
}

const_assert_eq!(std::mem::size_of::<RequestSenseCdb>(), 6);

impl RequestSenseCdb {
    pub fn new(lun: u8, alloc_len: u8) -> Self {
        RequestSenseCdb {
            opcode: crate::constants::REQUEST_SENSE,
            lun_field: (lun & 0x7) << 5,
            alloc_len,
            ..Default::default()
        }
    }
}

// ── Script instruction words ──────────────────────────
//
// The script processor executes (opcode, operand) pairs. The exact
// microcode encoding is the chip's business; these symbolic values are
// what the loader emits and the scheduler patches.

pub const OP_JUMP: u32 = 0x8000_0000;
pub const OP_LOAD_DSA: u32 = 0x8100_0000;
pub const OP_SELECT_ATN: u32 = 0x4100_0000;
pub const OP_CLEAR_ACK: u32 = 0x6000_0000;
pub const OP_SET_ATN: u32 = 0x6100_0000;
pub const OP_MOVE_MSG_OUT: u32 = 0x0e00_0000;
pub const OP_MOVE_CMD: u32 = 0x0a00_0000;
pub const OP_MOVE_DATA: u32 = 0x0800_0000;
pub const OP_MOVE_STATUS: u32 = 0x0b00_0000;
pub const OP_MOVE_MSG_IN: u32 = 0x0f00_0000;
pub const OP_MOVE_EXT_MSG: u32 = 0x0f01_0000;
pub const OP_CLASSIFY_MSG: u32 = 0x9000_0000;
pub const OP_SAVE_PTRS: u32 = 0x9100_0000;
pub const OP_WAIT_RESELECT: u32 = 0x5000_0000;
pub const OP_INT: u32 = 0x9800_0000;
pub const OP_NOP: u32 = 0x0000_0000;

// ── Script interrupt codes (DSPS operands) ────────────

/// Status and final message are in; the command is complete.
pub const SIG_DONE: u32 = 0x01;
/// Target saved data pointers and disconnected.
pub const SIG_DISCONNECTED: u32 = 0x02;
/// A message byte the script does not classify is in `msg_in[0]`.
pub const SIG_MSG_IN: u32 = 0x03;
/// The remaining bytes of an extended message have been fetched.
pub const SIG_EXT_MSG_DONE: u32 = 0x04;
/// A target reselected us; its identify message has been captured.
pub const SIG_RESELECTED: u32 = 0x05;

/// Words per scheduler slot program.
pub const SLOT_WORDS: usize = 8;
/// Upper bound on scheduler slots regardless of script RAM size.
pub const MAX_SLOTS: usize = 8;

/// SCSI bus phase, decoded from the C/D, I/O and MSG lines.
#[derive(Copy, Clone, Debug, PartialEq, Eq, enumn::N)]
#[repr(u8)]
pub enum BusPhase {
    DataOut = 0,
    DataIn = 1,
    Command = 2,
    Status = 3,
    MsgOut = 6,
    MsgIn = 7,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with_sg(entries: &[(u32, u32)]) -> TransferTable {
        let mut t = TransferTable::new_zeroed();
        for (i, &(len, addr)) in entries.iter().enumerate() {
            t.sg[i] = SgEntry { len, addr };
        }
        t.sg_count = entries.len() as u32;
        t
    }

    #[test]
    fn compact_drops_consumed_entries() {
        let mut t = table_with_sg(&[(0x100, 0x1000), (0x200, 0x2000), (0x80, 0x3000)]);
        t.compact_sg(0x100);
        assert_eq!(t.sg_count, 2);
        assert_eq!(t.sg[0], SgEntry { len: 0x200, addr: 0x2000 });
        assert_eq!(t.sg[1], SgEntry { len: 0x80, addr: 0x3000 });
    }

    #[test]
    fn compact_trims_partial_entry() {
        let mut t = table_with_sg(&[(0x100, 0x1000), (0x200, 0x2000)]);
        t.compact_sg(0x140);
        assert_eq!(t.sg_count, 1);
        assert_eq!(t.sg[0], SgEntry { len: 0x1c0, addr: 0x2040 });
    }

    #[test]
    fn compact_zero_is_noop() {
        let mut t = table_with_sg(&[(0x100, 0x1000)]);
        t.compact_sg(0);
        assert_eq!(t.sg_count, 1);
        assert_eq!(t.sg[0], SgEntry { len: 0x100, addr: 0x1000 });
    }

    #[test]
    fn compact_clamps_overrun() {
        let mut t = table_with_sg(&[(0x100, 0x1000), (0x100, 0x2000)]);
        t.compact_sg(0x1000);
        assert_eq!(t.sg_count, 0);
        assert_eq!(t.sg_remaining(), 0);
    }

    #[test]
    fn request_sense_cdb_layout() {
        let cdb = RequestSenseCdb::new(3, 64);
        let bytes = cdb.as_bytes();
        assert_eq!(bytes, &[0x03, 3 << 5, 0, 0, 64, 0]);
    }

    #[test]
    fn phase_decode() {
        assert_eq!(BusPhase::n(3u8), Some(BusPhase::Status));
        assert_eq!(BusPhase::n(7u8), Some(BusPhase::MsgIn));
        assert_eq!(BusPhase::n(4u8), None);
    }
}
