// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The controller facade: owns every piece of adapter state and exposes
//! the midlayer-facing entry points. All of them take `&mut self`; the
//! interrupt-level exclusion of the platform becomes ordinary borrow
//! checking at the call site.

use log::debug;
use log::info;
use remain::sorted;
use smallvec::SmallVec;
use thiserror::Error;

use crate::constants::MSG_IDENTIFY;
use crate::constants::MSG_IDENTIFY_DISC;
use crate::hba_abi::SgEntry;
use crate::hba_abi::CDB_MAX;
use crate::hba_abi::N_SG;
use crate::hw::AdapterHw;
use crate::hw::DataDirection;
use crate::hw::DmaError;
use crate::hw::DmaOps;
use crate::hw::IoRegion;
use crate::pool::CmdState;
use crate::pool::DescriptorPool;
use crate::queue::TargetQueues;
use crate::queue::MAX_TARGETS;
use crate::sched::SlotBank;
use crate::script;
use crate::script::ScriptRegion;

/// Opaque per-request token owned by the midlayer; handed back verbatim
/// in the completion callback, exactly once per submitted request.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RequestHandle(pub u64);

/// Final disposition of a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CmdResult {
    /// Completed with GOOD status.
    Ok,
    /// The command drew CHECK CONDITION and automatic sense retrieval
    /// ran; `sense_len` bytes landed in the caller's sense buffer.
    SenseAvailable { sense_len: u32 },
    /// Target reported BUSY; the caller may retry.
    Busy,
    /// Nobody answered the selection (or the command was aborted before
    /// the target ever posted a status).
    SelectionTimeout,
    /// Lost to a bus reset.
    Reset,
    /// The per-command watchdog fired; the bus was reset.
    Timeout,
    /// Driver-internal failure, e.g. CHECK CONDITION on the sense
    /// command itself. Not retryable.
    DriverStuffup,
}

/// Where completions are reported. Called exactly once per request, at
/// the same exclusion level as the interrupt handler.
pub trait CompletionSink {
    fn complete(&mut self, handle: RequestHandle, result: CmdResult);
}

/// Answer policy for an incoming synchronous transfer negotiation.
pub trait NegotiationPolicy {
    /// Given the target's requested period and offset, produce the
    /// (period, offset) we answer with.
    fn answer_sdtr(&self, period: u8, offset: u8) -> (u8, u8);
}

/// Default policy: echo the period, force offset 0 — asynchronous.
pub struct AsyncOnly;

impl NegotiationPolicy for AsyncOnly {
    fn answer_sdtr(&self, period: u8, _offset: u8) -> (u8, u8) {
        (period, 0)
    }
}

/// Static adapter configuration.
pub struct HbaConfig {
    /// Our own SCSI id.
    pub own_id: u8,
    /// Size of the descriptor pool.
    pub n_descriptors: usize,
    /// Script RAM available; the scheduler slot count derives from it.
    pub script_ram_bytes: usize,
    /// Enable parity checking.
    pub parity: bool,
    /// Selection timeout timer code, programmed verbatim.
    pub sel_timeout_code: u32,
}

impl Default for HbaConfig {
    fn default() -> Self {
        HbaConfig {
            own_id: 7,
            n_descriptors: 32,
            script_ram_bytes: 512,
            parity: true,
            sel_timeout_code: 0x0c,
        }
    }
}

/// One request as handed in by the midlayer.
pub struct Request<'a> {
    pub handle: RequestHandle,
    pub target: u8,
    pub lun: u8,
    pub cdb: &'a [u8],
    /// Data buffer and its direction; None for no-data commands.
    pub data: Option<(IoRegion, DataDirection)>,
    /// Buffer that automatic sense retrieval DMAs into.
    pub sense: IoRegion,
    /// Watchdog budget in ticks; None requests untimed (polled) execution.
    pub timeout_ticks: Option<u32>,
    /// Opaque transfer configuration, applied verbatim.
    pub xfer_cfg: u8,
    /// Grant the target disconnect privilege in the identify message.
    pub allow_disconnect: bool,
}

#[sorted]
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("cdb of {0} bytes is not transportable")]
    BadCdb(usize),
    #[error("target id {0} out of range")]
    BadTarget(u8),
    #[error("cannot map data buffer: {0}")]
    Map(DmaError),
    #[error("no free descriptor; retry later")]
    NoDescriptors,
}

#[sorted]
#[derive(Error, Debug)]
pub enum InitError {
    #[error("cannot allocate descriptor pool: {0}")]
    Pool(DmaError),
    #[error("script processor initialization failed: {0}")]
    Script(script::Error),
}

/// Identify message for a logical unit, with or without disconnect
/// privilege.
pub(crate) fn identify(lun: u8, allow_disconnect: bool) -> u8 {
    let mut msg = MSG_IDENTIFY | (lun & 0x7);
    if allow_disconnect {
        msg |= MSG_IDENTIFY_DISC;
    }
    msg
}

/// The adapter. The hardware coprocessor is the only other actor; every
/// host-side mutation funnels through `&mut self` here.
pub struct Controller<H: AdapterHw, S: CompletionSink> {
    pub(crate) hw: H,
    pub(crate) dma: Box<dyn DmaOps>,
    pub(crate) sink: S,
    pub(crate) pool: DescriptorPool,
    pub(crate) queues: TargetQueues,
    pub(crate) script: ScriptRegion,
    pub(crate) slots: SlotBank,
    pub(crate) policy: Box<dyn NegotiationPolicy>,
    pub(crate) ticks: u64,
    pub(crate) cfg: HbaConfig,
}

impl<H: AdapterHw, S: CompletionSink> Controller<H, S> {
    /// Attach: allocate the pool and script region, then bring the chip
    /// up. Any failure here is fatal to the controller.
    pub fn new(
        hw: H,
        mut dma: Box<dyn DmaOps>,
        sink: S,
        cfg: HbaConfig,
    ) -> Result<Self, InitError> {
        let pool =
            DescriptorPool::new(cfg.n_descriptors, dma.as_mut()).map_err(InitError::Pool)?;
        let script =
            ScriptRegion::new(cfg.script_ram_bytes, dma.as_mut()).map_err(InitError::Script)?;
        let n_slots = script.n_slots();
        let mut ctrl = Controller {
            hw,
            dma,
            sink,
            pool,
            queues: TargetQueues::new(),
            script,
            slots: SlotBank::new(n_slots),
            policy: Box::new(AsyncOnly),
            ticks: 0,
            cfg,
        };
        ctrl.reset_and_load().map_err(InitError::Script)?;
        info!(
            "hba attached: {} descriptors, {} scheduler slots",
            ctrl.pool.len(),
            n_slots
        );
        Ok(ctrl)
    }

    /// Replace the negotiation answer policy.
    pub fn set_negotiation_policy(&mut self, policy: Box<dyn NegotiationPolicy>) {
        self.policy = policy;
    }

    pub fn n_slots(&self) -> usize {
        self.script.n_slots()
    }

    /// No command queued or in flight anywhere.
    pub fn is_idle(&self) -> bool {
        self.queues.is_empty()
    }

    /// Queue one command. `Err(NoDescriptors)` is back-pressure: nothing
    /// was accepted and the caller retries after a completion.
    pub fn submit(&mut self, req: Request) -> Result<(), SubmitError> {
        if req.target as usize >= MAX_TARGETS {
            return Err(SubmitError::BadTarget(req.target));
        }
        if req.cdb.is_empty() || req.cdb.len() > CDB_MAX {
            return Err(SubmitError::BadCdb(req.cdb.len()));
        }
        let Some(id) = self.pool.acquire() else {
            return Err(SubmitError::NoDescriptors);
        };

        let mut segs: SmallVec<[SgEntry; 4]> = SmallVec::new();
        let mapping = match req.data {
            Some((region, dir)) => match self.dma.map_load(&region, dir) {
                Ok(m) => {
                    if m.segments.len() > N_SG {
                        let n = m.segments.len();
                        self.dma.map_unload(m);
                        self.pool.put_back(id);
                        return Err(SubmitError::Map(DmaError::TooManySegments(n)));
                    }
                    for s in &m.segments {
                        segs.push(SgEntry {
                            len: s.len,
                            addr: s.addr.0,
                        });
                    }
                    Some(m)
                }
                Err(e) => {
                    self.pool.put_back(id);
                    return Err(SubmitError::Map(e));
                }
            },
            None => None,
        };

        let d = self.pool.desc_mut(id);
        d.target = req.target;
        d.lun = req.lun;
        d.handle = req.handle;
        d.sense_region = req.sense;
        d.timeout_ticks = req.timeout_ticks;
        d.timed_out = false;
        d.rejecting = false;
        d.deadline = None;
        d.bound_slot = None;
        d.data_mapping = mapping;

        self.pool.init_table(id);
        let table = self.pool.table_mut(id);
        table.cmd[..req.cdb.len()].copy_from_slice(req.cdb);
        table.cmd_len = req.cdb.len() as u8;
        table.msg_out[0] = identify(req.lun, req.allow_disconnect);
        table.msg_out_len = 1;
        table.xfer_cfg = req.xfer_cfg;
        for (i, e) in segs.iter().enumerate() {
            table.sg[i] = *e;
        }
        table.sg_count = segs.len() as u32;

        self.pool.desc_mut(id).state = CmdState::Ready;
        self.pool.publish(id, self.dma.as_mut());
        self.queues.enqueue(req.target, id);
        debug!(
            "queued {:#x?} for target {} lun {}",
            req.cdb[0], req.target, req.lun
        );
        self.dispatch_ready();
        Ok(())
    }

    /// Bounded busy-poll used for untimed probe-time commands: spin the
    /// interrupt handler until the adapter drains or the budget runs out.
    /// Returns whether the adapter is idle.
    pub fn poll(&mut self, max_spins: u32) -> bool {
        for _ in 0..max_spins {
            if self.is_idle() {
                return true;
            }
            self.on_interrupt();
            self.hw.delay_us(10);
        }
        self.is_idle()
    }
}
