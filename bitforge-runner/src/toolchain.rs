//! iCE40 toolchain definition
//!
//! Knows which files a compilation needs in its workspace and which commands
//! turn them into a bitstream:
//!
//! 1. `yosys` synthesizes the sources and the injected top wrapper
//! 2. `nextpnr-ice40` places and routes for the UP5K in the SG48 package
//! 3. `icepack` packs the routed design into `output.bin`

use bitforge_core::domain::command::CommandSpec;
use bitforge_core::dto::compile::CompileRequest;
use std::path::PathBuf;
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::workspace::Workspace;

/// Template of the board-level wrapper, read from the assets directory
pub const TOP_TEMPLATE: &str = "tt_fpga_top.v";

/// Pin constraints of the target board, read from the assets directory
pub const PCF_TEMPLATE: &str = "tt_fpga_fabricfox.pcf";

/// Token in the wrapper template replaced by the requested top module
pub const TOP_PLACEHOLDER: &str = "__tt_um_placeholder";

/// Wrapper file name inside the workspace
pub const TOP_FILE: &str = "top.v";

/// Constraint file name inside the workspace
pub const PCF_FILE: &str = "fpga.pcf";

/// Bitstream produced by the last stage
pub const ARTIFACT: &str = "output.bin";

/// Source of the wrapper/constraint files and of the command list
#[derive(Debug, Clone)]
pub struct Toolchain {
    assets_dir: PathBuf,
}

impl Toolchain {
    pub fn new(assets_dir: impl Into<PathBuf>) -> Self {
        Self {
            assets_dir: assets_dir.into(),
        }
    }

    /// Writes the request's sources plus the injected files into `workspace`
    pub async fn populate(&self, workspace: &mut Workspace, request: &CompileRequest) -> Result<()> {
        for (name, content) in &request.sources {
            workspace.write_file(name, content).await?;
        }

        let template = tokio::fs::read_to_string(self.assets_dir.join(TOP_TEMPLATE))
            .await
            .map_err(|e| PipelineError::resource("Failed to read FPGA top verilog", e))?;
        workspace
            .write_file(TOP_FILE, render_top(&template, &request.top_module))
            .await
            .map_err(|e| relabel(e, TOP_FILE))?;

        let pcf = tokio::fs::read(self.assets_dir.join(PCF_TEMPLATE))
            .await
            .map_err(|e| PipelineError::resource("Failed to read PCF file", e))?;
        workspace
            .write_file(PCF_FILE, pcf)
            .await
            .map_err(|e| relabel(e, PCF_FILE))?;

        debug!(
            workspace = %workspace.id(),
            sources = request.sources.len(),
            "Workspace populated"
        );
        Ok(())
    }

    /// Ordered command list for `request`
    pub fn commands(&self, request: &CompileRequest) -> Vec<CommandSpec> {
        vec![
            synthesize(request),
            place_and_route(request),
            CommandSpec::new("icepack", ["output.asc", ARTIFACT]),
        ]
    }
}

/// Substitutes every placeholder occurrence with the top module name
pub fn render_top(template: &str, top_module: &str) -> String {
    template.replace(TOP_PLACEHOLDER, top_module)
}

/// Names an injected file in a write failure, keeping the I/O cause
fn relabel(err: PipelineError, file: &str) -> PipelineError {
    match err {
        PipelineError::Resource { source, .. } => PipelineError::Resource {
            message: format!("Failed to write {}", file),
            source,
        },
        other => other,
    }
}

fn synthesize(request: &CompileRequest) -> CommandSpec {
    let mut args = vec![
        "-l".to_string(),
        "yosys.log".to_string(),
        "-DSYNTH".to_string(),
        "-p".to_string(),
        "synth_ice40 -top tt_fpga_top -json output.json".to_string(),
        TOP_FILE.to_string(),
    ];
    args.extend(request.sources.keys().cloned());
    CommandSpec::new("yosys", args)
}

fn place_and_route(request: &CompileRequest) -> CommandSpec {
    CommandSpec::new(
        "nextpnr-ice40",
        [
            "--pcf-allow-unconstrained".to_string(),
            "--seed".to_string(),
            request.seed().to_string(),
            "--freq".to_string(),
            request.freq().to_string(),
            "--package".to_string(),
            "sg48".to_string(),
            "--up5k".to_string(),
            "--asc".to_string(),
            "output.asc".to_string(),
            "--pcf".to_string(),
            PCF_FILE.to_string(),
            "--json".to_string(),
            "output.json".to_string(),
        ],
    )
}
