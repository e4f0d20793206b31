// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Test doubles: a register file standing in for the chip, a DMA
//! subsystem handing out synthetic bus addresses, and a completion sink
//! that records what the midlayer would see.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use smallvec::smallvec;
use smallvec::SmallVec;

use crate::controller::CmdResult;
use crate::controller::CompletionSink;
use crate::controller::Controller;
use crate::controller::HbaConfig;
use crate::controller::Request;
use crate::controller::RequestHandle;
use crate::hw::AdapterHw;
use crate::hw::BusAddr;
use crate::hw::DataDirection;
use crate::hw::DmaError;
use crate::hw::DmaMapping;
use crate::hw::DmaOps;
use crate::hw::IoRegion;
use crate::hw::SgSegment;
use crate::hw::SyncDir;
use crate::regs::*;

#[derive(Default)]
pub struct FakeHwState {
    pub regs: BTreeMap<u32, u32>,
    pub writes: Vec<(u32, u32)>,
    pub pending_sstat: u32,
    pub pending_dstat: u32,
    pub delayed_us: u64,
}

impl FakeHwState {
    /// Latch a script interrupt with the given code.
    pub fn raise_signal(&mut self, code: u32) {
        self.pending_dstat |= DSTAT_SIR;
        self.regs.insert(REG_DSPS, code);
    }

    /// Latch SCSI status bits.
    pub fn raise_scsi(&mut self, bits: u32) {
        self.pending_sstat |= bits;
    }

    /// Latch DMA status bits.
    pub fn raise_dma(&mut self, bits: u32) {
        self.pending_dstat |= bits;
    }

    pub fn set_reg(&mut self, offset: u32, value: u32) {
        self.regs.insert(offset, value);
    }

    pub fn reg(&self, offset: u32) -> u32 {
        *self.regs.get(&offset).unwrap_or(&0)
    }

    pub fn wrote(&self, offset: u32, value: u32) -> bool {
        self.writes.iter().any(|&(o, v)| o == offset && v == value)
    }

    /// Was the reset line pulsed (asserted then released)?
    pub fn saw_reset_pulse(&self) -> bool {
        self.writes
            .iter()
            .any(|&(o, v)| o == REG_SCNTL && v & SCNTL_RST != 0)
    }
}

pub struct FakeAdapter {
    pub state: Rc<RefCell<FakeHwState>>,
}

impl AdapterHw for FakeAdapter {
    fn read32(&mut self, offset: u32) -> u32 {
        let mut s = self.state.borrow_mut();
        match offset {
            REG_ISTAT => {
                let mut v = s.reg(REG_ISTAT) & !(ISTAT_SIP | ISTAT_DIP | ISTAT_SRST);
                if s.pending_sstat != 0 {
                    v |= ISTAT_SIP;
                }
                if s.pending_dstat != 0 {
                    v |= ISTAT_DIP;
                }
                v
            }
            REG_SSTAT => std::mem::take(&mut s.pending_sstat),
            REG_DSTAT => std::mem::take(&mut s.pending_dstat),
            _ => s.reg(offset),
        }
    }

    fn write32(&mut self, offset: u32, value: u32) {
        let mut s = self.state.borrow_mut();
        s.writes.push((offset, value));
        match offset {
            REG_ISTAT => {
                if value & ISTAT_SRST != 0 {
                    // Soft reset drops every pending condition and
                    // self-clears immediately.
                    s.pending_sstat = 0;
                    s.pending_dstat = 0;
                }
                // SIGP is a pulse, not a latched register value.
            }
            REG_SCNTL => {
                let prev = s.reg(REG_SCNTL);
                if value & SCNTL_RST != 0 && prev & SCNTL_RST == 0 {
                    // Asserting the reset line makes the chip observe a
                    // bus reset.
                    s.pending_sstat |= SSTAT_RST;
                }
                s.regs.insert(offset, value);
            }
            _ => {
                s.regs.insert(offset, value);
            }
        }
    }

    fn delay_us(&mut self, us: u32) {
        self.state.borrow_mut().delayed_us += u64::from(us);
    }
}

#[derive(Default)]
pub struct FakeDmaState {
    pub next_bus: u32,
    pub loads: usize,
    pub unloads: usize,
    pub syncs_to_device: usize,
    pub syncs_from_device: usize,
    /// Split every loaded region into two segments to exercise the
    /// scatter/gather path.
    pub split_loads: bool,
    pub fail_next_load: bool,
    pub unloaded_tokens: Vec<u32>,
}

pub struct FakeDma {
    pub state: Rc<RefCell<FakeDmaState>>,
}

impl FakeDma {
    pub fn new() -> FakeDma {
        FakeDma {
            state: Rc::new(RefCell::new(FakeDmaState {
                next_bus: 0x0010_0000,
                ..Default::default()
            })),
        }
    }
}

impl DmaOps for FakeDma {
    fn map_coherent(&mut self, len: u32) -> Result<BusAddr, DmaError> {
        let mut s = self.state.borrow_mut();
        let addr = s.next_bus;
        s.next_bus += (len + 0xfff) & !0xfff;
        Ok(BusAddr(addr))
    }

    fn map_load(
        &mut self,
        region: &IoRegion,
        _dir: DataDirection,
    ) -> Result<DmaMapping, DmaError> {
        let mut s = self.state.borrow_mut();
        if s.fail_next_load {
            s.fail_next_load = false;
            return Err(DmaError::MapFailed {
                base: region.base,
                len: region.len,
            });
        }
        s.loads += 1;
        let bus = s.next_bus;
        s.next_bus += (region.len + 0xfff) & !0xfff;
        let segments: SmallVec<[SgSegment; 2]> = if s.split_loads && region.len > 1 {
            let first = region.len / 2;
            smallvec![
                SgSegment {
                    addr: BusAddr(bus),
                    len: first,
                },
                SgSegment {
                    addr: BusAddr(bus + first),
                    len: region.len - first,
                },
            ]
        } else {
            smallvec![SgSegment {
                addr: BusAddr(bus),
                len: region.len,
            }]
        };
        Ok(DmaMapping {
            segments,
            token: s.loads as u32,
        })
    }

    fn map_unload(&mut self, mapping: DmaMapping) {
        let mut s = self.state.borrow_mut();
        s.unloads += 1;
        s.unloaded_tokens.push(mapping.token);
    }

    fn sync(&mut self, _addr: BusAddr, _len: u32, dir: SyncDir) {
        let mut s = self.state.borrow_mut();
        match dir {
            SyncDir::ToDevice => s.syncs_to_device += 1,
            SyncDir::FromDevice => s.syncs_from_device += 1,
        }
    }
}

#[derive(Clone, Default)]
pub struct RecordingSink {
    pub completions: Rc<RefCell<Vec<(RequestHandle, CmdResult)>>>,
}

impl CompletionSink for RecordingSink {
    fn complete(&mut self, handle: RequestHandle, result: CmdResult) {
        self.completions.borrow_mut().push((handle, result));
    }
}

/// Everything a test needs to drive the engine: the controller plus
/// handles into all three fakes.
pub struct TestRig {
    pub ctrl: Controller<FakeAdapter, RecordingSink>,
    pub hw: Rc<RefCell<FakeHwState>>,
    pub dma: Rc<RefCell<FakeDmaState>>,
    pub completions: Rc<RefCell<Vec<(RequestHandle, CmdResult)>>>,
}

pub fn rig() -> TestRig {
    rig_with_config(HbaConfig::default())
}

pub fn rig_with_config(cfg: HbaConfig) -> TestRig {
    let hw = Rc::new(RefCell::new(FakeHwState::default()));
    let dma = FakeDma::new();
    let dma_state = dma.state.clone();
    let sink = RecordingSink::default();
    let completions = sink.completions.clone();
    let ctrl = Controller::new(
        FakeAdapter { state: hw.clone() },
        Box::new(dma),
        sink,
        cfg,
    )
    .expect("controller attach");
    TestRig {
        ctrl,
        hw,
        dma: dma_state,
        completions,
    }
}

/// A six-byte no-data command with a ten-tick watchdog.
pub fn simple_request(handle: u64, target: u8) -> Request<'static> {
    Request {
        handle: RequestHandle(handle),
        target,
        lun: 0,
        cdb: &[0x00, 0, 0, 0, 0, 0],
        data: None,
        sense: IoRegion {
            base: 0x5000,
            len: 64,
        },
        timeout_ticks: Some(10),
        xfer_cfg: 0,
        allow_disconnect: true,
    }
}

/// A read-class command carrying a data buffer.
pub fn data_request(handle: u64, target: u8, len: u32) -> Request<'static> {
    Request {
        handle: RequestHandle(handle),
        target,
        lun: 0,
        cdb: &[0x08, 0, 0, 0, 16, 0],
        data: Some((
            IoRegion {
                base: 0x9000,
                len,
            },
            DataDirection::FromDevice,
        )),
        sense: IoRegion {
            base: 0x5000,
            len: 64,
        },
        timeout_ticks: Some(10),
        xfer_cfg: 0,
        allow_disconnect: true,
    }
}

impl TestRig {
    /// Descriptor currently at the head of a target's queue.
    pub fn head(&self, target: u8) -> crate::pool::DescriptorId {
        self.ctrl.queues.head(target).expect("no queued command")
    }

    /// Point the chip's current-descriptor register at this descriptor.
    pub fn set_current(&mut self, id: crate::pool::DescriptorId) {
        let dsa = self.ctrl.pool.table_bus(id).0;
        self.hw.borrow_mut().set_reg(REG_DSA, dsa);
    }

    /// Simulate the script processor completing the current command with
    /// the given status byte, then deliver the interrupt.
    pub fn hw_complete(&mut self, target: u8, status: u8) {
        let id = self.head(target);
        self.set_current(id);
        self.ctrl.pool.hw_poke_table(id, |t| t.status = status);
        self.hw.borrow_mut().raise_signal(crate::hba_abi::SIG_DONE);
        self.ctrl.on_interrupt();
    }

    /// Simulate the script processor completing a command that also
    /// moved `bytes_done` bytes of data.
    pub fn hw_complete_with_data(&mut self, target: u8, status: u8, bytes_done: u32) {
        let id = self.head(target);
        self.set_current(id);
        self.ctrl.pool.hw_poke_table(id, |t| {
            t.status = status;
            t.bytes_done = bytes_done;
        });
        self.hw.borrow_mut().raise_signal(crate::hba_abi::SIG_DONE);
        self.ctrl.on_interrupt();
    }
}
