// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Command-execution engine for a SCSI host adapter built around an
//! on-chip script processor. The engine turns midlayer requests into
//! hardware command descriptors, schedules them onto a bounded bank of
//! script slots, interprets the chip's interrupts as a SCSI-bus protocol
//! state machine (selection, messages, disconnect/reselect, completion),
//! escalates CHECK CONDITION completions to automatic REQUEST SENSE, and
//! recovers from timeouts and bus resets.
//!
//! Everything here runs at the platform's interrupt exclusion level and
//! never blocks; the only other actor is the script processor itself,
//! reached through the [`hw::AdapterHw`] and [`hw::DmaOps`] collaborator
//! traits.

pub mod constants;
mod controller;
mod dispatch;
pub mod hba_abi;
pub mod hw;
mod pool;
mod queue;
mod recovery;
pub mod regs;
mod sched;
mod script;
mod sense;

#[cfg(test)]
mod fake;

pub use controller::AsyncOnly;
pub use controller::CmdResult;
pub use controller::CompletionSink;
pub use controller::Controller;
pub use controller::HbaConfig;
pub use controller::InitError;
pub use controller::NegotiationPolicy;
pub use controller::Request;
pub use controller::RequestHandle;
pub use controller::SubmitError;
pub use pool::CmdState;
pub use pool::DescriptorId;
pub use queue::MAX_TARGETS;
pub use script::Error as ScriptError;
