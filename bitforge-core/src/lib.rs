//! Bitforge Core
//!
//! Core types shared by the Bitforge compilation runner and server.
//!
//! This crate contains:
//! - Domain types: commands, streamed events and command outcomes
//! - DTOs: the compile request accepted at the HTTP boundary

pub mod domain;
pub mod dto;
