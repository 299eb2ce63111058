//! External transpile / bundle / minify tools
//!
//! Tools are opaque subprocesses. Only their contract matters: read the input
//! file, write the output file, exit zero. Arguments are templated with
//! `{input}` and `{output}` and every tool runs inside the compilation's
//! temporary directory.

use std::{
    path::{Path, PathBuf},
    process::Command,
};

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ToolStage, WidgetError};

/// Program plus templated arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|arg| (*arg).to_owned()).collect(),
        }
    }

    fn render_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        let output = output.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace("{input}", &input).replace("{output}", &output))
            .collect()
    }

    /// Run the tool and check that it produced `output`
    pub fn run(&self, stage: ToolStage, workdir: &Path, input: &Path, output: &Path) -> Result<()> {
        let args = self.render_args(input, output);
        debug!("Running {stage} tool: {} {}", self.program, args.join(" "));

        let result = Command::new(&self.program)
            .args(&args)
            .current_dir(workdir)
            .output()
            .map_err(|e| WidgetError::ExternalToolFailure {
                stage,
                status: "not started".to_owned(),
                stderr: format!("failed to run `{}`: {e}", self.program),
            })?;

        trace!(
            "{stage} tool stdout: {}",
            String::from_utf8_lossy(&result.stdout)
        );

        if !result.status.success() {
            return Err(WidgetError::ExternalToolFailure {
                stage,
                status: result.status.to_string(),
                stderr: String::from_utf8_lossy(&result.stderr).into_owned(),
            });
        }

        if !output.is_file() {
            return Err(WidgetError::ExternalToolFailure {
                stage,
                status: result.status.to_string(),
                stderr: format!("expected output {} was not produced", output.display()),
            });
        }

        Ok(())
    }
}

/// The three external tools of a compilation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Toolchain {
    /// Python -> JavaScript transpiler
    pub transpiler: ToolCommand,
    /// Where the transpiler writes its result, relative to the working directory
    pub transpiler_output: PathBuf,
    /// Module bundler producing one CommonJS script
    pub bundler: ToolCommand,
    pub minifier: ToolCommand,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            transpiler: ToolCommand::new("transcrypt", &["--nomin", "{input}"]),
            transpiler_output: PathBuf::from("__target__").join("source.js"),
            bundler: ToolCommand::new(
                "rollup",
                &["{input}", "--format", "cjs", "--file", "{output}"],
            ),
            minifier: ToolCommand::new("uglifyjs", &["{input}", "-o", "{output}"]),
        }
    }
}

impl Toolchain {
    pub fn command(&self, stage: ToolStage) -> &ToolCommand {
        match stage {
            ToolStage::Transpile => &self.transpiler,
            ToolStage::Bundle => &self.bundler,
            ToolStage::Minify => &self.minifier,
        }
    }

    pub fn command_mut(&mut self, stage: ToolStage) -> &mut ToolCommand {
        match stage {
            ToolStage::Transpile => &mut self.transpiler,
            ToolStage::Bundle => &mut self.bundler,
            ToolStage::Minify => &mut self.minifier,
        }
    }
}
