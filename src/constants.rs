// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

#![deny(missing_docs)]
//! This file contains values specified in spec.
//! SPC-3: <https://www.t10.org/cgi-bin/ac.pl?t=f&f=spc3r23.pdf>
//! SAM-5: <https://www.t10.org/cgi-bin/ac.pl?t=f&f=sam5r21.pdf>

// SAM status codes
/// Command completed without error.
pub const GOOD: u8 = 0x00;
/// Indicates that sense data has been delivered in the buffer.
pub const CHECK_CONDITION: u8 = 0x02;
/// The logical unit is busy; the command should be retried later.
pub const BUSY: u8 = 0x08;
/// Never a valid SAM status. The status slot in the transfer table is
/// preset to this value so an aborted command is distinguishable from one
/// the target actually completed.
pub const STATUS_UNSET: u8 = 0xff;

// Single-byte SCSI messages
/// Target → initiator: command completed, status sent.
pub const MSG_COMMAND_COMPLETE: u8 = 0x00;
/// First byte of a multi-byte extended message.
pub const MSG_EXTENDED: u8 = 0x01;
/// Target asks the initiator to save its data pointers.
pub const MSG_SAVE_DATA_POINTERS: u8 = 0x02;
/// Target asks the initiator to restore its saved data pointers.
pub const MSG_RESTORE_POINTERS: u8 = 0x03;
/// Target is about to release the bus and reselect later.
pub const MSG_DISCONNECT: u8 = 0x04;
/// The last message received was not understood or is not supported.
pub const MSG_MESSAGE_REJECT: u8 = 0x07;
/// No operation.
pub const MSG_NOP: u8 = 0x08;
/// Identify message base value; bit 6 grants disconnect privilege and the
/// low three bits carry the logical unit number.
pub const MSG_IDENTIFY: u8 = 0x80;
/// Disconnect-privilege bit within an identify message.
pub const MSG_IDENTIFY_DISC: u8 = 0x40;

// Extended message codes (second byte is the length, third the code)
/// Synchronous data transfer request.
pub const EXT_MSG_SDTR: u8 = 0x01;
/// Wide data transfer request.
pub const EXT_MSG_WDTR: u8 = 0x03;

// Operation codes
/// REQUEST SENSE, used for automatic sense retrieval after CHECK CONDITION.
pub const REQUEST_SENSE: u8 = 0x03;
