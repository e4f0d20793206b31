// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Interrupt decode and the SCSI-bus protocol state machine. Every
//! interrupt the adapter raises lands in `Controller::on_interrupt`,
//! gets decoded into a `Cause`, and drives descriptors through their
//! lifecycle.

use log::debug;
use log::error;
use log::warn;

use crate::constants::*;
use crate::controller::CmdResult;
use crate::controller::CompletionSink;
use crate::controller::Controller;
use crate::hba_abi::BusPhase;
use crate::hba_abi::MSG_BUF_LEN;
use crate::hba_abi::SIG_DISCONNECTED;
use crate::hba_abi::SIG_DONE;
use crate::hba_abi::SIG_EXT_MSG_DONE;
use crate::hba_abi::SIG_MSG_IN;
use crate::hba_abi::SIG_RESELECTED;
use crate::hw::AdapterHw;
use crate::pool::CmdState;
use crate::pool::DescriptorId;
use crate::regs::*;

/// Decoded interrupt cause. One per handler invocation; matched
/// exhaustively so no condition can fall through unhandled.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Cause {
    /// SCSI reset seen on the bus (ours or a third party's).
    BusReset,
    /// The script engine fetched something it cannot execute.
    IllegalInstruction,
    /// Bus fault or abort on the script/DMA path.
    BusFault,
    /// Parity error on the SCSI bus.
    ScsiParity,
    /// Gross bus sequencing error.
    GrossError,
    /// Selection timed out; expected when a target is absent.
    SelectionTimeout,
    /// Target dropped off the bus without the disconnect protocol.
    UnexpectedDisconnect,
    /// Bus phase changed under a running transfer.
    PhaseMismatch,
    /// A target reselected us while the chip was not connected.
    Reselected,
    /// The script raised an interrupt with this code.
    Signal(u32),
}

impl<H: AdapterHw, S: CompletionSink> Controller<H, S> {
    /// The one registered interrupt handler. A no-op when no
    /// driver-relevant status bit is set (shared interrupt line).
    pub fn on_interrupt(&mut self) {
        let Some(cause) = self.decode_interrupt() else {
            return;
        };
        debug!("interrupt: {:?}", cause);
        match cause {
            Cause::BusReset => self.handle_bus_reset(),
            Cause::IllegalInstruction => self.bus_fatal("illegal script instruction"),
            Cause::BusFault => self.bus_fatal("bus fault on script path"),
            Cause::ScsiParity => self.bus_fatal("scsi parity error"),
            Cause::GrossError => self.bus_fatal("scsi gross error"),
            Cause::SelectionTimeout => self.handle_selection_timeout(),
            Cause::UnexpectedDisconnect => self.handle_unexpected_disconnect(),
            Cause::PhaseMismatch => self.handle_phase_mismatch(),
            Cause::Reselected | Cause::Signal(SIG_RESELECTED) => self.handle_reselected(),
            Cause::Signal(SIG_DONE) => self.handle_status_in(),
            Cause::Signal(SIG_DISCONNECTED) => self.handle_disconnected(),
            Cause::Signal(SIG_MSG_IN) => self.handle_msg_in(),
            Cause::Signal(SIG_EXT_MSG_DONE) => self.handle_ext_msg(),
            Cause::Signal(code) => {
                self.bus_fatal_code("unknown script interrupt code", code)
            }
        }
    }

    fn decode_interrupt(&mut self) -> Option<Cause> {
        let istat = self.hw.read32(REG_ISTAT);
        if istat & (ISTAT_SIP | ISTAT_DIP) == 0 {
            return None;
        }
        if istat & ISTAT_SIP != 0 {
            let sstat = self.hw.read32(REG_SSTAT);
            return if sstat & SSTAT_RST != 0 {
                Some(Cause::BusReset)
            } else if sstat & SSTAT_PAR != 0 {
                Some(Cause::ScsiParity)
            } else if sstat & SSTAT_GROSS != 0 {
                Some(Cause::GrossError)
            } else if sstat & SSTAT_STO != 0 {
                Some(Cause::SelectionTimeout)
            } else if sstat & SSTAT_UDC != 0 {
                Some(Cause::UnexpectedDisconnect)
            } else if sstat & SSTAT_MA != 0 {
                Some(Cause::PhaseMismatch)
            } else if sstat & SSTAT_RSL != 0 {
                Some(Cause::Reselected)
            } else {
                warn!("scsi interrupt with empty status {:#x}", sstat);
                None
            };
        }
        let dstat = self.hw.read32(REG_DSTAT);
        if dstat & DSTAT_IID != 0 {
            Some(Cause::IllegalInstruction)
        } else if dstat & (DSTAT_BF | DSTAT_ABRT) != 0 {
            Some(Cause::BusFault)
        } else if dstat & DSTAT_SIR != 0 {
            Some(Cause::Signal(self.hw.read32(REG_DSPS)))
        } else {
            warn!("dma interrupt with empty status {:#x}", dstat);
            None
        }
    }

    /// Descriptor the hardware is currently working on, resolved from
    /// the data structure address register. None when that address does
    /// not point into the pool (reselect-class interrupts).
    fn current_descriptor(&mut self) -> Option<DescriptorId> {
        let dsa = self.hw.read32(REG_DSA);
        self.pool.id_for_bus(dsa)
    }

    /// A host/coprocessor consistency violation: the only safe way out
    /// is a full bus reset. Recovery runs off the reset interrupt.
    pub(crate) fn bus_fatal(&mut self, why: &str) {
        error!("{}; resetting scsi bus", why);
        self.pulse_scsi_reset();
    }

    fn bus_fatal_code(&mut self, why: &str, code: u32) {
        error!("{} ({:#x}); resetting scsi bus", why, code);
        self.pulse_scsi_reset();
    }

    pub(crate) fn resume_script(&mut self, word_off: usize) {
        let addr = self.script.bus_of(word_off);
        self.hw.write32(REG_DSP, addr);
    }

    /// Shared completion path: unbind, dequeue, report exactly once,
    /// release, and hand the freed slot to whatever is waiting.
    pub(crate) fn finish(&mut self, id: DescriptorId, result: CmdResult) {
        self.unbind_slot(id);
        let (target, handle) = {
            let d = self.pool.desc_mut(id);
            d.state = match d.state {
                CmdState::SenseActive | CmdState::SenseDone => CmdState::SenseDone,
                _ => CmdState::Done,
            };
            (d.target, d.handle)
        };
        self.queues.remove(target, id);
        debug!("target {} command finished: {:?}", target, result);
        self.sink.complete(handle, result);
        self.pool.release(id, self.dma.as_mut());
        self.dispatch_ready();
        self.resume_script(self.script.entries.dispatch);
    }

    /// Status byte and final message are in; decide the command's fate.
    fn handle_status_in(&mut self) {
        let Some(id) = self.current_descriptor() else {
            self.bus_fatal("completion interrupt without a current command");
            return;
        };
        let (status, bytes_done) = {
            let t = self.pool.reclaim(id, self.dma.as_mut());
            (t.status, t.bytes_done)
        };
        let state = self.pool.desc(id).state;
        if !state.is_on_hardware() {
            self.bus_fatal("completion for a command not on hardware");
            return;
        }

        // A status slot still holding the sentinel means the target never
        // reached status phase: the command was aborted under us.
        if status == STATUS_UNSET {
            warn!("target {} aborted command", self.pool.desc(id).target);
            self.finish(id, CmdResult::SelectionTimeout);
            return;
        }

        if state == CmdState::SenseActive {
            // The sense round trip reports the original command's fate.
            // Whatever the sense status was, we do not go around again.
            if status == CHECK_CONDITION {
                error!("check condition on a sense command");
                self.finish(id, CmdResult::DriverStuffup);
            } else {
                self.finish(
                    id,
                    CmdResult::SenseAvailable {
                        sense_len: bytes_done,
                    },
                );
            }
            return;
        }

        match status {
            GOOD => self.finish(id, CmdResult::Ok),
            BUSY => self.finish(id, CmdResult::Busy),
            CHECK_CONDITION => self.escalate_sense(id),
            other => {
                warn!("target returned unsupported status {:#x}", other);
                self.finish(id, CmdResult::DriverStuffup);
            }
        }
    }

    fn handle_selection_timeout(&mut self) {
        match self.current_descriptor() {
            Some(id) if self.pool.desc(id).state.is_on_hardware() => {
                debug!("selection timeout on target {}", self.pool.desc(id).target);
                self.finish(id, CmdResult::SelectionTimeout);
            }
            _ => {
                // Nothing of ours was selecting; rearm the idle loop.
                warn!("selection timeout with no current command");
                self.resume_script(self.script.entries.wait_reselect);
            }
        }
    }

    /// The target dropped the bus without the disconnect protocol. It
    /// may still have posted a status byte first (some targets report
    /// fatal conditions this way), so run the normal completion logic
    /// on whatever is in the table.
    fn handle_unexpected_disconnect(&mut self) {
        match self.current_descriptor() {
            Some(id) if self.pool.desc(id).state.is_on_hardware() => {
                warn!(
                    "unexpected disconnect from target {}",
                    self.pool.desc(id).target
                );
                self.handle_status_in();
            }
            _ => {
                warn!("unexpected disconnect with no current command");
                self.resume_script(self.script.entries.wait_reselect);
            }
        }
    }

    fn handle_phase_mismatch(&mut self) {
        let Some(id) = self.current_descriptor() else {
            self.bus_fatal("phase mismatch without a current command");
            return;
        };
        let phase = self.hw.read32(REG_SBCL) & 0x7;
        match BusPhase::n(phase as u8) {
            Some(BusPhase::Status) => {
                // Benign short transfer: the target skipped straight to
                // status.
                debug!("phase mismatch to status on target {}", self.pool.desc(id).target);
                self.resume_script(self.script.entries.status);
            }
            Some(BusPhase::MsgIn) => {
                // Save data pointers before listening, so a later
                // reconnect resumes the transfer at the right spot.
                self.save_data_pointers(id);
                self.resume_script(self.script.entries.msg_in);
            }
            other => {
                self.bus_fatal_code(
                    "phase mismatch to unexpected phase",
                    other.map_or(phase, |p| p as u32),
                );
            }
        }
    }

    /// Persist the transfer progress the coprocessor recorded into the
    /// remaining scatter/gather program.
    fn save_data_pointers(&mut self, id: DescriptorId) {
        let t = self.pool.reclaim(id, self.dma.as_mut());
        let done = t.bytes_done;
        t.compact_sg(done);
        t.bytes_done = 0;
        debug!("saved data pointers: {:#x} bytes consumed", done);
        self.pool.publish(id, self.dma.as_mut());
    }

    /// Target saved its pointers and disconnected; free the bus for
    /// another slot while it works.
    fn handle_disconnected(&mut self) {
        let Some(id) = self.current_descriptor() else {
            self.bus_fatal("disconnect without a current command");
            return;
        };
        if !self.pool.desc(id).state.is_on_hardware() {
            self.bus_fatal("disconnect for a command not on hardware");
            return;
        }
        self.save_data_pointers(id);
        self.pool.desc_mut(id).rejecting = false;
        self.dispatch_ready();
        self.resume_script(self.script.entries.dispatch);
    }

    /// A message byte the script does not handle itself.
    fn handle_msg_in(&mut self) {
        let Some(id) = self.current_descriptor() else {
            self.bus_fatal("message-in without a current command");
            return;
        };
        let (msg, announced) = {
            let t = self.pool.reclaim(id, self.dma.as_mut());
            (t.msg_in[0], t.msg_in[1] as usize)
        };
        match msg {
            MSG_EXTENDED => {
                // Announced length, then the payload via the fetch
                // sub-script.
                if announced == 0 || announced + 2 > MSG_BUF_LEN {
                    debug!("oversized extended message ({} bytes)", announced);
                    self.send_reject(id);
                } else {
                    self.pool.publish(id, self.dma.as_mut());
                    self.resume_script(self.script.entries.ext_fetch);
                }
            }
            MSG_MESSAGE_REJECT => {
                if self.pool.desc(id).rejecting {
                    // The target rejected our reject; there is no way to
                    // make progress on this conversation.
                    self.bus_fatal("message reject loop with target");
                } else {
                    warn!("target rejected our last message");
                    self.send_reject(id);
                }
            }
            other => {
                debug!("unsupported message {:#x} from target", other);
                self.send_reject(id);
            }
        }
    }

    /// Answer the current message exchange with MESSAGE REJECT.
    fn send_reject(&mut self, id: DescriptorId) {
        let t = self.pool.table_mut(id);
        t.msg_out[0] = MSG_MESSAGE_REJECT;
        t.msg_out_len = 1;
        self.pool.desc_mut(id).rejecting = true;
        self.pool.publish(id, self.dma.as_mut());
        self.resume_script(self.script.entries.send_msg);
    }

    /// Full extended message fetched; the only negotiation we answer is
    /// a synchronous transfer request, and the policy decides the reply.
    fn handle_ext_msg(&mut self) {
        let Some(id) = self.current_descriptor() else {
            self.bus_fatal("extended message without a current command");
            return;
        };
        let (len, code, period, offset) = {
            let t = self.pool.reclaim(id, self.dma.as_mut());
            (t.msg_in[1], t.msg_in[2], t.msg_in[3], t.msg_in[4])
        };
        if code == EXT_MSG_SDTR && len == 3 {
            let (period, offset) = self.policy.answer_sdtr(period, offset);
            debug!("answering sdtr with period {:#x} offset {}", period, offset);
            let t = self.pool.table_mut(id);
            t.msg_out[0] = MSG_EXTENDED;
            t.msg_out[1] = 3;
            t.msg_out[2] = EXT_MSG_SDTR;
            t.msg_out[3] = period;
            t.msg_out[4] = offset;
            t.msg_out_len = 5;
            self.pool.desc_mut(id).rejecting = false;
            self.pool.publish(id, self.dma.as_mut());
            self.resume_script(self.script.entries.send_msg);
        } else {
            debug!("rejecting extended message {:#x}", code);
            self.send_reject(id);
        }
    }

    /// A target reconnected to resume its disconnected command.
    fn handle_reselected(&mut self) {
        let ssid = self.hw.read32(REG_SSID);
        if ssid & SSID_VALID == 0 {
            self.bus_fatal("reselection without a valid identify message");
            return;
        }
        let target = (ssid & SSID_ID_MASK) as u8;
        match self.queues.head(target) {
            Some(id) if self.pool.desc(id).state.is_on_hardware() => {
                debug!("target {} reselected", target);
                let dsa = self.pool.table_bus(id);
                self.hw.write32(REG_DSA, dsa.0);
                self.resume_script(self.script.entries.selected);
            }
            _ => {
                // The target thinks it owns a command we do not know
                // about; host and coprocessor state have diverged.
                self.bus_fatal("reselected by a target with no active command");
            }
        }
    }
}
