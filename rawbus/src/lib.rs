//! # Rawbus
//!
//! This library provides an asynchronous transaction engine for memory-mapped serial buses
//! in no_std environments. Clients exchange fixed-size request and reply records with the
//! engine; the engine turns them into outstanding, independently completing transactions
//! against the attached bus controllers, and fans inbound isochronous data out to every
//! subscribed client.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────┐   attach    ┌───────────┐
//!                 │ Registry │◄────────────┤ Transport │
//!                 └──┬────┬──┘    Link     └─────┬─────┘
//!          bind/list │    │ bus reset,           │ Completion
//!                    │    │ isochronous data     │
//! ┌─────────┐  ┌─────┴────▼──────────────┐       │
//! │ Client  ├─►│ Session                 │◄──────┘
//! └─────────┘  │ ┌─────────┐ ┌─────────┐ │
//!              │ │ pending ├►│completed│ │
//!              │ └─────────┘ └─────────┘ │
//!              └─────────────────────────┘
//! ```
//! Components:
//! * _Registry_ tracks attached hosts, the sessions bound to each host and their isochronous
//!   channel subscriptions. It consumes bus reset and isochronous receive events.
//! * _Host_ is an attached bus controller: a [`transport::Transport`], a topology generation
//!   and a transaction label allocator per target node.
//! * _Session_ is a client handle. It runs the protocol state machine
//!   (opened, initialized, connected) and owns a pending and a completed request queue.
//! * _Transport_ is the driver of a bus controller. It builds and sends packets, serves the
//!   local node's address space and fires a completion for every accepted packet.
//!
//! A request addressed to the host's own node runs in place against the transport. Other
//! requests acquire a transaction label, become a packet and wait on the pending queue for the
//! completion. Every accepted request yields exactly one reply on the completed queue.
//!
//! ## Concurrency model
//!
//! Completions and registry events may arrive from any execution context concurrently with
//! client calls. The engine uses embassy-sync blocking mutexes. With _CriticalSectionRawMutex_
//! every component may run at a different interrupt level. Critical sections only move
//! requests between queues and copy small payloads; transports are never called while a
//! critical section is held.
//!
//! Inbound isochronous data is copied once into a reference-counted buffer shared by all
//! subscribers of the packet.
//!
//! ## Bus generation
//!
//! Each host counts bus resets. Requests carry the generation the client observed; requests
//! of a connected session that do not match the live generation at submission or at
//! completion fail with [`format::ErrorCode::GenerationChanged`].
#![no_std]

extern crate alloc;

pub use rawbus_core as core;
pub use rawbus_driver::{OutOfMemory, link, packet, transport};

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod client;
mod completion;
pub mod config;
mod dispatch;
pub mod format;
mod registry;
mod request;
pub mod session;

pub use registry::Registry;
pub use session::{Session, SessionState};

/// Failure of a submission call. The request produces no reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SubmitError {
    /// The input is not a single request record
    InvalidLength,
    OutOfMemory,
    /// No transaction label is available
    WouldBlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConsumeError {
    /// No reply is ready
    WouldBlock,
}
