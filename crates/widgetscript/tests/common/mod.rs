#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
};

use tempfile::TempDir;
use widgetscript::{
    ContextCompiler,
    codec::Base64Codec,
    toolchain::{ToolCommand, Toolchain},
};

/// Shell-script stand-ins for the external tools
///
/// Each tool appends its stage name to `log` and records its working
/// directory in `workdirs`. The transpiler and bundler copy their input, the
/// minifier prefixes it with `MIN:`.
pub struct FakeTools {
    pub dir: TempDir,
    pub toolchain: Toolchain,
}

fn sh(script: String) -> ToolCommand {
    ToolCommand::new("sh", &["-c", script.as_str(), "tool", "{input}", "{output}"])
}

impl FakeTools {
    pub fn new() -> Self {
        Self::with_failing_stage(None)
    }

    pub fn with_failing_stage(failing: Option<&str>) -> Self {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("tools.log");
        let workdirs = dir.path().join("workdirs.log");

        let tool = |stage: &str, action: &str| {
            let body = if failing == Some(stage) {
                format!("echo '{stage} exploded' >&2; exit 7")
            } else {
                action.to_owned()
            };
            sh(format!(
                "echo {stage} >> '{}'; pwd >> '{}'; {body}",
                log.display(),
                workdirs.display()
            ))
        };

        let toolchain = Toolchain {
            transpiler: tool("transpile", r#"mkdir -p "$(dirname "$2")" && cp "$1" "$2""#),
            bundler: tool("bundle", r#"cp "$1" "$2""#),
            minifier: tool("minify", r#"printf 'MIN:' > "$2" && cat "$1" >> "$2""#),
            ..Toolchain::default()
        };
        Self { dir, toolchain }
    }

    pub fn compiler(&self, capacity: usize) -> ContextCompiler {
        ContextCompiler::new(self.toolchain.clone(), &Base64Codec, capacity)
    }

    fn read_lines(&self, name: &str) -> Vec<String> {
        let path = self.dir.path().join(name);
        if !path.exists() {
            return Vec::new();
        }
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    /// Stage names in invocation order
    pub fn invocations(&self) -> Vec<String> {
        self.read_lines("tools.log")
    }

    /// Working directory of every invocation
    pub fn workdirs(&self) -> Vec<PathBuf> {
        self.read_lines("workdirs.log")
            .into_iter()
            .map(PathBuf::from)
            .collect()
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}
