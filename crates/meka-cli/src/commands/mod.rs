//! Command handlers

pub mod config;
pub mod me;
pub mod watch;
