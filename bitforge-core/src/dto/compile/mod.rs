//! Compile request DTO

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Placement frequency (MHz) used when the request omits `freq`
pub const DEFAULT_FREQ: i64 = 12;

/// Placement seed used when the request omits `seed`
pub const DEFAULT_SEED: i64 = 42;

/// Request to compile a source bundle into a bitstream
///
/// Sources are kept in a sorted map so the synthesis command line is
/// deterministic for a given bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileRequest {
    pub sources: BTreeMap<String, String>,
    pub top_module: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freq: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
}

impl CompileRequest {
    pub fn freq(&self) -> i64 {
        self.freq.unwrap_or(DEFAULT_FREQ)
    }

    pub fn seed(&self) -> i64 {
        self.seed.unwrap_or(DEFAULT_SEED)
    }
}
