//! # Events filtering
//!
//! Filtering happens on the kernel side, driven by three maps the probe only
//! reads:
//!
//! - `SKIP_PIDS`: processes which never generate events, whatever the mode
//! - `PRINT_ALL`: when set to 1, every other process generates events
//! - `TARGET_PIDS`: otherwise, only these processes generate events
//!
//! Filtering is done on process id (tgid), threads are not distinguished.
//!
//! This crate is the only writer of those maps:
//!
//! - [`FilterTables`] abstracts the maps: [`BpfTables`] wraps the aya maps of a
//!   loaded probe, [`MemoryTables`] keeps everything in memory and doubles as
//!   [`iotap_common::ControlTables`] to evaluate decisions in tests
//! - [`initializer::setup_filter`] writes the initial state from the
//!   configuration file
//! - [`controller::start_controller`] runs the actor serializing every later
//!   change, reachable through an [`iotap_core::ProbeHandle`]

pub mod config;
pub mod controller;
pub mod initializer;
mod tables;

pub use tables::{BpfTables, FilterError, FilterTables, MemoryTables};
