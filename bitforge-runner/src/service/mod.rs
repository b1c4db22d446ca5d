//! Service layer
//!
//! Services hold the business logic of a compilation: turning a request into
//! a populated workspace and a pipeline run, and driving it to its terminal
//! event.
//!
//! Services are trait-based so the HTTP layer can be tested without a real
//! toolchain.

mod compile;

pub use compile::{CompileService, StandardCompileService, spawn_compile};
