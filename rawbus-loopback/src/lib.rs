//! Simulated bus controller for the rawbus stack
//!
//! The controller keeps the address spaces of all simulated nodes in memory. Local operations
//! act on the controller's own node immediately. Sent packets are queued until serviced, either
//! by [`Loopback::service`] or by the [`Loopback::run`] task, so tests can observe and complete
//! them at chosen points.
//!
//! # Features
//!
//! * Quadlet and block reads and writes
//! * All extended lock operations
//! * Manual completion of sent packets
//! * Send rejection and allocation failure injection
//!
//! # Limitations
//!
//! * Isochronous data is not generated; report it through the [`rawbus_driver::link::Link`]
//! * Packets to absent nodes are not acknowledged
#![no_std]

extern crate alloc;

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod config;
mod driver;

pub use driver::Loopback;
