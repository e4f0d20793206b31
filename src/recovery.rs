// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Per-command watchdog and bus-reset recovery. A timeout never touches
//! the queues directly; it resets the bus, and the resulting reset
//! interrupt converts every in-flight command to a uniform failure.

use log::error;
use log::info;
use log::warn;

use crate::controller::CmdResult;
use crate::controller::CompletionSink;
use crate::controller::Controller;
use crate::hw::AdapterHw;
use crate::pool::CmdState;
use crate::pool::DescriptorId;
use crate::queue::MAX_TARGETS;
use crate::regs::REG_SCNTL;
use crate::regs::SCNTL_RST;

/// Minimum time the reset line stays asserted, per the bus spec.
const RESET_HOLD_US: u32 = 25;

impl<H: AdapterHw, S: CompletionSink> Controller<H, S> {
    /// Advance the watchdog clock one tick and fire expired commands.
    /// Driven by the platform at the same exclusion level as the
    /// interrupt handler.
    pub fn tick(&mut self) {
        self.ticks += 1;
        let now = self.ticks;
        let mut expired: Vec<DescriptorId> = Vec::new();
        for t in 0..MAX_TARGETS {
            for &id in self.queues.queue(t).iter() {
                let d = self.pool.desc(id);
                if d.state.is_on_hardware() && !d.timed_out {
                    if let Some(deadline) = d.deadline {
                        if now >= deadline {
                            expired.push(id);
                        }
                    }
                }
            }
        }
        for id in expired {
            self.on_timeout(id);
        }
    }

    /// Watchdog expiry: reset the bus and tag the descriptor so recovery
    /// reports `Timeout` instead of `Reset`. Queues are left alone; the
    /// reset interrupt drives recovery uniformly for everything in
    /// flight.
    pub(crate) fn on_timeout(&mut self, id: DescriptorId) {
        let d = self.pool.desc_mut(id);
        if !d.state.is_on_hardware() {
            return;
        }
        d.timed_out = true;
        warn!("command on target {} timed out; resetting bus", d.target);
        self.pulse_scsi_reset();
    }

    /// Assert the SCSI reset line, hold it the minimum settle time, and
    /// release it. The chip raises a bus-reset interrupt in response.
    pub(crate) fn pulse_scsi_reset(&mut self) {
        let scntl = self.hw.read32(REG_SCNTL);
        self.hw.write32(REG_SCNTL, scntl | SCNTL_RST);
        self.hw.delay_us(RESET_HOLD_US);
        self.hw.write32(REG_SCNTL, scntl & !SCNTL_RST);
    }

    /// Operator-requested reset; everything in flight fails uniformly.
    pub fn reset_bus(&mut self) {
        info!("operator requested scsi bus reset");
        self.pulse_scsi_reset();
    }

    /// The bus was reset (by us or anyone else). Reinitialize the script
    /// processor, then fail every command that was on hardware. Commands
    /// still waiting for a slot stay queued and simply run later.
    pub(crate) fn handle_bus_reset(&mut self) {
        warn!("scsi bus reset; recovering in-flight commands");
        if let Err(e) = self.reset_and_load() {
            error!("controller reinitialization failed: {}", e);
            return;
        }

        // Two passes: collect first, complete after. Completion reporting
        // may make the caller resubmit immediately, and that must not
        // disturb the lists being walked.
        let mut victims: Vec<DescriptorId> = Vec::new();
        for t in 0..MAX_TARGETS {
            let pool = &self.pool;
            self.queues.queue_mut(t).retain(|&id| {
                if pool.desc(id).state.is_on_hardware() {
                    victims.push(id);
                    false
                } else {
                    true
                }
            });
        }

        for id in victims {
            let (handle, result) = {
                let d = self.pool.desc_mut(id);
                // The slot bank was rebuilt wholesale; no slot to free.
                d.bound_slot = None;
                d.state = if d.state == CmdState::SenseActive {
                    CmdState::SenseDone
                } else {
                    CmdState::Done
                };
                let result = if d.timed_out {
                    CmdResult::Timeout
                } else {
                    CmdResult::Reset
                };
                (d.handle, result)
            };
            self.sink.complete(handle, result);
            self.pool.release(id, self.dma.as_mut());
        }

        // Anything still Ready (or waiting to re-run as a sense command)
        // goes back onto the fresh slot bank.
        self.dispatch_ready();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::GOOD;
    use crate::fake::rig;
    use crate::fake::simple_request;
    use crate::regs::SSTAT_RST;
    use crate::CmdResult;
    use crate::RequestHandle;

    #[test]
    fn timeout_fires_and_reports_uniformly() {
        let mut r = rig();
        let mut req = simple_request(1, 0);
        req.timeout_ticks = Some(1);
        r.ctrl.submit(req).unwrap();
        assert!(r.completions.borrow().is_empty());

        r.ctrl.tick();
        assert!(r.hw.borrow().saw_reset_pulse());
        // The reset line was held for the minimum settle time.
        assert!(r.hw.borrow().delayed_us >= u64::from(RESET_HOLD_US));
        // The latched reset interrupt performs the recovery.
        r.ctrl.on_interrupt();
        assert_eq!(
            r.completions.borrow().as_slice(),
            &[(RequestHandle(1), CmdResult::Timeout)]
        );
        assert_eq!(r.ctrl.pool.free_len(), r.ctrl.pool.len());
        assert!(r.ctrl.is_idle());
    }

    #[test]
    fn tick_before_deadline_does_nothing() {
        let mut r = rig();
        let mut req = simple_request(1, 0);
        req.timeout_ticks = Some(3);
        r.ctrl.submit(req).unwrap();
        r.ctrl.tick();
        r.ctrl.tick();
        assert!(!r.hw.borrow().saw_reset_pulse());
    }

    #[test]
    fn reset_with_nothing_in_flight_is_idempotent() {
        let mut r = rig();
        let free_before = r.ctrl.pool.free_len();
        r.hw.borrow_mut().raise_scsi(SSTAT_RST);
        r.ctrl.on_interrupt();
        assert_eq!(r.ctrl.pool.free_len(), free_before);
        assert_eq!(r.ctrl.slots.occupied(), 0);
        for s in 0..r.ctrl.n_slots() {
            assert!(r.ctrl.script.slot_is_free(s));
        }
        assert!(r.completions.borrow().is_empty());
    }

    #[test]
    fn reset_fails_in_flight_and_retries_queued() {
        let mut r = rig();
        // Target 0: one on hardware, one queued behind it. Target 1: one
        // on hardware.
        r.ctrl.submit(simple_request(1, 0)).unwrap();
        r.ctrl.submit(simple_request(2, 0)).unwrap();
        r.ctrl.submit(simple_request(3, 1)).unwrap();

        r.hw.borrow_mut().raise_scsi(SSTAT_RST);
        r.ctrl.on_interrupt();

        let done = r.completions.borrow().clone();
        assert_eq!(done.len(), 2);
        assert!(done.contains(&(RequestHandle(1), CmdResult::Reset)));
        assert!(done.contains(&(RequestHandle(3), CmdResult::Reset)));
        drop(done);

        // The queued command survived and was re-dispatched onto the
        // fresh slot bank.
        let id = r.ctrl.queues.head(0).unwrap();
        assert_eq!(r.ctrl.pool.desc(id).handle, RequestHandle(2));
        assert!(r.ctrl.pool.desc(id).state.is_on_hardware());

        r.hw_complete(0, GOOD);
        assert_eq!(
            r.completions.borrow().last().unwrap(),
            &(RequestHandle(2), CmdResult::Ok)
        );
    }

    #[test]
    fn operator_reset_converts_in_flight_commands() {
        let mut r = rig();
        r.ctrl.submit(simple_request(1, 2)).unwrap();
        r.ctrl.reset_bus();
        r.ctrl.on_interrupt();
        assert_eq!(
            r.completions.borrow().as_slice(),
            &[(RequestHandle(1), CmdResult::Reset)]
        );
    }

    #[test]
    fn timed_out_flag_survives_until_recovery() {
        let mut r = rig();
        let mut slow = simple_request(1, 0);
        slow.timeout_ticks = Some(1);
        r.ctrl.submit(slow).unwrap();
        r.ctrl.submit(simple_request(2, 1)).unwrap();

        r.ctrl.tick();
        r.ctrl.on_interrupt();
        let done = r.completions.borrow();
        // The expired command reports Timeout, the innocent bystander on
        // the other target reports Reset.
        assert!(done.contains(&(RequestHandle(1), CmdResult::Timeout)));
        assert!(done.contains(&(RequestHandle(2), CmdResult::Reset)));
    }
}
