//! Data Transfer Objects
//!
//! DTOs accepted at the HTTP boundary and handed to the runner.

pub mod compile;
