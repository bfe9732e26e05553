//! AXIS — an event-driven automation agent for Elite Dangerous.
//!
//! Tails the game's journal files, hands every entry to a coordinating
//! [`kernel::Kernel`] that pets a liveness watchdog, dispatches skills and
//! drives a finite state machine.
//!
//! See `DESIGN.md` for the module breakdown.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod event;
pub mod logging;

pub mod fsm;
pub mod journal;
pub mod watchdog;

pub mod kernel;
pub mod skills;
