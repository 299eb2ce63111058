//! Configuration discovery and loading
//!
//! Lookup order: an explicit path, `./widgetscript.toml`, then
//! `<user config dir>/widgetscript/config.toml`. Missing files fall back to
//! defaults. `WIDGETSCRIPT_TRANSPILER`, `WIDGETSCRIPT_BUNDLER` and
//! `WIDGETSCRIPT_MINIFIER` override the tool programs afterwards.

use std::{
    fs,
    path::{Path, PathBuf},
};

use etcetera::BaseStrategy;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{
    codec::{ArgumentCodec, codec_by_name},
    compiler::DEFAULT_CACHE_CAPACITY,
    error::{Result, ToolStage, WidgetError},
    toolchain::Toolchain,
};

pub const PROJECT_CONFIG_FILE: &str = "widgetscript.toml";
const USER_CONFIG_DIR: &str = "widgetscript";
const USER_CONFIG_FILE: &str = "config.toml";

const TOOL_ENV_OVERRIDES: [(&str, ToolStage); 3] = [
    ("WIDGETSCRIPT_TRANSPILER", ToolStage::Transpile),
    ("WIDGETSCRIPT_BUNDLER", ToolStage::Bundle),
    ("WIDGETSCRIPT_MINIFIER", ToolStage::Minify),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Minify compiled factories unless told otherwise
    pub minify: bool,
    /// Number of compiled factories kept in memory
    pub cache_capacity: usize,
    /// Argument encoding scheme: `base64` or `json`
    pub codec: String,
    pub toolchain: Toolchain,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            minify: true,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            codec: "base64".to_owned(),
            toolchain: Toolchain::default(),
        }
    }
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| WidgetError::Config(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from {}", path.display());
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
            .map_err(|e| WidgetError::Config(format!("{}: {e}", path.display())))
    }

    /// Discover and load configuration, then apply environment overrides
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match Self::discover() {
                Some(path) => Self::from_file(&path)?,
                None => {
                    debug!("No configuration file found, using defaults");
                    Self::default()
                }
            },
        };
        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.codec()?;
        Ok(config)
    }

    fn discover() -> Option<PathBuf> {
        let project = PathBuf::from(PROJECT_CONFIG_FILE);
        if project.is_file() {
            return Some(project);
        }

        match etcetera::choose_base_strategy() {
            Ok(strategy) => {
                let user = strategy
                    .config_dir()
                    .join(USER_CONFIG_DIR)
                    .join(USER_CONFIG_FILE);
                user.is_file().then_some(user)
            }
            Err(e) => {
                warn!("Could not determine user config directory: {e}");
                None
            }
        }
    }

    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for (variable, stage) in TOOL_ENV_OVERRIDES {
            if let Some(program) = lookup(variable).filter(|value| !value.is_empty()) {
                debug!("{variable} overrides {stage} program with `{program}`");
                self.toolchain.command_mut(stage).program = program;
            }
        }
    }

    pub fn codec(&self) -> Result<&'static dyn ArgumentCodec> {
        codec_by_name(&self.codec)
            .ok_or_else(|| WidgetError::Config(format!("unknown codec `{}`", self.codec)))
    }
}
