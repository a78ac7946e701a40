//! Marlowe
//!
//! A single-host observer that attributes live network traffic to the
//! owning process and reports process start/exit events from the OS
//! audit trail.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod network;
pub mod process;
pub mod view;
