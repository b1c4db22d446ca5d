//! Core domain types
//!
//! These types describe one pipeline run as seen from both sides: the runner
//! produces them while driving the toolchain, the server serializes them onto
//! the wire.

pub mod command;
pub mod event;
pub mod outcome;
