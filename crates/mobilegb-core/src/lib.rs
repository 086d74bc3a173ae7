//! Host-side serial plumbing for link-port peripherals.
//!
//! The console cores own their CPUs and timers; this crate only provides the
//! register-level shims that turn SB/SC (Game Boy) and SIOCNT/SIODATA8 (Game
//! Boy Advance) writes into single-byte [`serial::LinkPort`] exchanges, plus a
//! small [`timing::Timebase`] for elapsed-time checks.

/// Game Boy Advance SIO (normal 8-bit mode).
pub mod gba;

/// Game Boy serial unit and the link port contract.
pub mod serial;

/// Cycle-based elapsed-time checks.
pub mod timing;
