// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Register offsets and bit assignments of the script-processor host
//! adapter. Offsets are byte offsets from the chip's register window.

// ── Register offsets ──────────────────────────────────

/// Interrupt status. Read to find which status register holds the cause;
/// write to soft-reset the chip or to signal the script processor.
pub const REG_ISTAT: u32 = 0x00;
/// DMA / script-engine status, read-to-clear.
pub const REG_DSTAT: u32 = 0x04;
/// SCSI bus status, read-to-clear.
pub const REG_SSTAT: u32 = 0x08;
/// Data structure address: bus address of the transfer table of the
/// command the script processor is currently executing.
pub const REG_DSA: u32 = 0x0c;
/// Script pointer. Writing starts or resumes execution at that address.
pub const REG_DSP: u32 = 0x10;
/// Script interrupt operand: the code stored by the script instruction
/// that raised the interrupt.
pub const REG_DSPS: u32 = 0x14;
/// Current SCSI bus phase lines (C/D, I/O, MSG in the low three bits).
pub const REG_SBCL: u32 = 0x18;
/// Id of the target that reselected us; bit 7 flags a captured, valid
/// identify message.
pub const REG_SSID: u32 = 0x1c;
/// Our own SCSI id.
pub const REG_SCID: u32 = 0x20;
/// Default transfer configuration (period/offset), applied when no
/// per-command value overrides it.
pub const REG_SXFER: u32 = 0x24;
/// SCSI control: bus reset line, parity checking, arbitration mode.
pub const REG_SCNTL: u32 = 0x28;
/// Selection timeout timer code.
pub const REG_STIME: u32 = 0x2c;

// ── ISTAT bits ────────────────────────────────────────

pub const ISTAT_DIP: u32 = 0x01;
pub const ISTAT_SIP: u32 = 0x02;
pub const ISTAT_CON: u32 = 0x08;
/// Signal process: wake the script processor out of a wait.
pub const ISTAT_SIGP: u32 = 0x20;
/// Software reset; self-clears when the chip is ready again.
pub const ISTAT_SRST: u32 = 0x40;

// ── DSTAT bits (read-to-clear) ────────────────────────

/// Script-signalled interrupt; the code is in DSPS.
pub const DSTAT_SIR: u32 = 0x01;
/// Illegal script instruction fetched.
pub const DSTAT_IID: u32 = 0x02;
/// Bus fault on the script fetch or DMA path.
pub const DSTAT_BF: u32 = 0x04;
pub const DSTAT_ABRT: u32 = 0x08;

// ── SSTAT bits (read-to-clear) ────────────────────────

/// Parity error seen on the SCSI bus.
pub const SSTAT_PAR: u32 = 0x01;
/// Gross error (bus sequencing violation).
pub const SSTAT_GROSS: u32 = 0x02;
/// Unexpected disconnect: the target dropped off the bus mid-command.
pub const SSTAT_UDC: u32 = 0x04;
/// Selection timed out; nobody answered at that id.
pub const SSTAT_STO: u32 = 0x08;
/// We have been reselected while not connected.
pub const SSTAT_RSL: u32 = 0x10;
/// Phase mismatch: the bus changed phase under a running transfer.
pub const SSTAT_MA: u32 = 0x20;
/// SCSI bus reset detected (ours or a third party's).
pub const SSTAT_RST: u32 = 0x40;

// ── SCNTL bits ────────────────────────────────────────

/// Full arbitration mode.
pub const SCNTL_ARB_FULL: u32 = 0x03;
/// Enable parity checking.
pub const SCNTL_EPC: u32 = 0x04;
/// Assert the SCSI reset line while set.
pub const SCNTL_RST: u32 = 0x08;

// ── SSID bits ─────────────────────────────────────────

/// The reselection captured a valid identify message.
pub const SSID_VALID: u32 = 0x80;
/// Mask of the reselecting target id.
pub const SSID_ID_MASK: u32 = 0x0f;
