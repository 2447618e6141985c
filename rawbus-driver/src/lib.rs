//! Rawbus driver interface
//!
//! The crate provides an interface between a serial bus controller driver and the rawbus
//! transaction engine. Limited scope facilitates compatibility across versions.
//! Driver crates should depend on this crate. Rawbus users should depend on the `rawbus`
//! crate instead.
//!
//! A driver plays three roles:
//! * It implements [`transport::Transport`]: builds and sends request packets and serves
//!   local address space operations.
//! * It fires the [`link::Completion`] attached to every sent packet once the response
//!   (or a transport failure) is known.
//! * It reports bus resets and inbound isochronous data through the [`link::Link`] it receives
//!   upon attachment.
//!
//! Completions and link events may be delivered from any execution context, including
//! interrupt handlers, concurrently with client calls. The engine guards its state with
//! short critical sections and never calls back into the transport while holding them.
//!
//! Every packet accepted by `send` must eventually have its completion fired, with
//! [`packet::Ack::Aborted`] if the controller gives up on it. A rejected packet is simply
//! dropped; the engine reports the send failure itself.

#![no_std]

extern crate alloc;

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod internal;
pub mod link;
pub mod packet;
pub mod transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OutOfMemory;
