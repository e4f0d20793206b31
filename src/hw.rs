// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Platform collaborator boundary: register access and the DMA subsystem.

use std::fmt;
use std::fmt::Display;

use remain::sorted;
use smallvec::SmallVec;
use thiserror::Error;

/// An address as the adapter sees it on its bus.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct BusAddr(pub u32);

impl Display for BusAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl BusAddr {
    pub fn offset(self, bytes: u32) -> BusAddr {
        BusAddr(self.0 + bytes)
    }
}

/// A caller-owned memory region, described but never dereferenced here.
/// The DMA subsystem translates it into bus segments.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct IoRegion {
    pub base: u64,
    pub len: u32,
}

/// Direction of a data transfer relative to host memory.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DataDirection {
    /// Host memory is read by the device (a write command).
    ToDevice,
    /// Host memory is written by the device (a read command).
    FromDevice,
}

/// Direction of a coherency synchronization.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SyncDir {
    /// Flush host writes so the device sees them.
    ToDevice,
    /// Invalidate so the host sees device writes.
    FromDevice,
}

/// One mapped bus segment of a loaded region.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SgSegment {
    pub addr: BusAddr,
    pub len: u32,
}

/// A loaded DMA mapping: the bus-visible segments of one `IoRegion`.
/// Returned by `DmaOps::map_load` and owed back to `map_unload`.
#[derive(Debug)]
pub struct DmaMapping {
    pub segments: SmallVec<[SgSegment; 2]>,
    /// Platform cookie identifying the load; handed back at unload.
    pub token: u32,
}

impl DmaMapping {
    pub fn total_len(&self) -> u32 {
        self.segments.iter().map(|s| s.len).sum()
    }
}

#[sorted]
#[derive(Error, Debug)]
pub enum DmaError {
    #[error("cannot map region at {base:#x}+{len:#x}")]
    MapFailed { base: u64, len: u32 },
    #[error("no coherent memory for {0} bytes")]
    NoCoherentMemory(u32),
    #[error("region needs {0} segments, over the mapping limit")]
    TooManySegments(usize),
}

/// Adapter register window. All driver access to the chip goes through
/// this trait so the engine never touches real MMIO directly.
pub trait AdapterHw {
    fn read32(&mut self, offset: u32) -> u32;
    fn write32(&mut self, offset: u32, value: u32);
    /// Short bounded delay; only used during synchronous initialization
    /// and the reset pulse, never in steady-state interrupt handling.
    fn delay_us(&mut self, us: u32);
}

/// Platform DMA subsystem.
pub trait DmaOps {
    /// Assign a bus window for `len` bytes of driver-owned coherent
    /// memory. The window is never revoked for the adapter's lifetime.
    fn map_coherent(&mut self, len: u32) -> Result<BusAddr, DmaError>;

    /// Load a caller region for device access, returning its segments.
    fn map_load(&mut self, region: &IoRegion, dir: DataDirection)
        -> Result<DmaMapping, DmaError>;

    /// Release a mapping previously returned by `map_load`.
    fn map_unload(&mut self, mapping: DmaMapping);

    /// Coherency barrier over a bus range. Every host read after device
    /// activity and every host write before signalling the device must
    /// cross one of these.
    fn sync(&mut self, addr: BusAddr, len: u32, dir: SyncDir);
}
