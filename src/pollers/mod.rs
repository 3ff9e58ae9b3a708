//! Meter/ESS/environment pollers (C5, C6, C9). Each is a fixed-cadence
//! fan-out over one device population sharing the same shape: skip devices
//! under breaker, read concurrently bounded by `MAX_PARALLEL_POLLS`, batch
//! the successful rows into one store write, record breaker outcomes as we
//! go (§4.4, §4.5, §4.9).

mod common;
pub mod environment;
pub mod ess;
pub mod meter;
