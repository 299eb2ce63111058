//! Context factory compilation
//!
//! Units are rewritten and merged after the builtin support code into one
//! Python module, which goes through transpile -> bundle -> (minify) inside a
//! fresh temporary directory. The resulting script is wrapped into a factory
//!
//! ```js
//! function(__context_id, __data, __py_functions_names){ ...; return exportTable; }
//! ```
//!
//! Results are memoized on the exact unit texts, the initializer texts, the
//! minify flag and the codec, with least-recently-used eviction. A hit hands
//! back the very same [`Arc<CompiledScript>`] without touching the filesystem.

use std::{
    fmt, fs,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use log::{debug, info};
use once_cell::sync::OnceCell;

use crate::{
    builtins::{
        COMMON_INIT, CONTEXT_ID_PARAM, CONVERT_EXPORTS, DATA_PARAM, HOST_FUNCTIONS_PARAM,
        support_source,
    },
    cache::LruCache,
    codec::{ArgumentCodec, Base64Codec},
    config::Config,
    error::{Result, ToolStage},
    rewriter::rewrite_unit,
    source::{FunctionUnit, SourceUnit},
    toolchain::Toolchain,
};

/// Default number of compiled factories kept per compiler
pub const DEFAULT_CACHE_CAPACITY: usize = 20;

const SOURCE_FILE: &str = "source.py";
const MERGED_FILE: &str = "source_merged.js";
const MINIFIED_FILE: &str = "source_merged.min.js";

/// Text of a context factory function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledScript {
    text: String,
}

impl CompiledScript {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for CompiledScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CompileKey {
    units: Vec<String>,
    initializers: Vec<String>,
    minify: bool,
    codec: &'static str,
}

impl CompileKey {
    fn new(
        units: &[SourceUnit],
        initializers: &[FunctionUnit],
        minify: bool,
        codec: &'static str,
    ) -> Self {
        Self {
            units: units.iter().map(|unit| unit.source_text().to_owned()).collect(),
            initializers: initializers
                .iter()
                .map(|unit| unit.source_text().to_owned())
                .collect(),
            minify,
            codec,
        }
    }
}

#[derive(Debug)]
pub struct ContextCompiler {
    toolchain: Toolchain,
    codec: &'static dyn ArgumentCodec,
    cache: Mutex<LruCache<CompileKey, Arc<CompiledScript>>>,
}

static SHARED: OnceCell<ContextCompiler> = OnceCell::new();

impl ContextCompiler {
    pub fn new(toolchain: Toolchain, codec: &'static dyn ArgumentCodec, capacity: usize) -> Self {
        Self {
            toolchain,
            codec,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            config.toolchain.clone(),
            config.codec()?,
            config.cache_capacity,
        ))
    }

    /// Process-wide compiler, built from the discovered configuration on first use
    pub fn shared() -> Result<&'static Self> {
        SHARED.get_or_try_init(|| {
            let config = Config::load(None)?;
            Self::from_config(&config)
        })
    }

    pub fn codec(&self) -> &'static dyn ArgumentCodec {
        self.codec
    }

    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    /// Compile `units` into a context factory
    pub fn compile(&self, units: &[SourceUnit], minify: bool) -> Result<Arc<CompiledScript>> {
        self.compile_with_initializers(units, &[], minify)
    }

    /// Compile `units`; each of `initializers` is called once when a context is
    /// created, after the builtin cleanup watcher
    pub fn compile_with_initializers(
        &self,
        units: &[SourceUnit],
        initializers: &[FunctionUnit],
        minify: bool,
    ) -> Result<Arc<CompiledScript>> {
        let key = CompileKey::new(units, initializers, minify, self.codec.name());
        if let Some(script) = self.lock_cache().get(&key) {
            debug!("Context factory cache hit ({} unit(s))", units.len());
            return Ok(Arc::clone(script));
        }

        debug!("Context factory cache miss ({} unit(s))", units.len());
        let script = Arc::new(self.build(units, initializers, minify)?);
        self.lock_cache().insert(key, Arc::clone(&script));
        Ok(script)
    }

    pub fn cached_entries(&self) -> usize {
        self.lock_cache().len()
    }

    pub fn clear_cache(&self) {
        self.lock_cache().clear();
    }

    fn lock_cache(&self) -> MutexGuard<'_, LruCache<CompileKey, Arc<CompiledScript>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Assemble the merged Python module: support code, then every unit
    pub fn assemble_module(&self, units: &[SourceUnit]) -> Result<String> {
        let mut parts = Vec::with_capacity(units.len() + 1);
        parts.push(support_source(self.codec));
        for unit in units {
            parts.push(rewrite_unit(unit)?);
        }
        Ok(parts.join("\n\n"))
    }

    fn build(
        &self,
        units: &[SourceUnit],
        initializers: &[FunctionUnit],
        minify: bool,
    ) -> Result<CompiledScript> {
        let module = self.assemble_module(units)?;

        // Removed on drop, whichever way this function returns
        let workdir = tempfile::Builder::new()
            .prefix("widgetscript-")
            .tempdir()?;
        let dir = workdir.path();
        debug!("Compiling context factory in {}", dir.display());

        let source_file = dir.join(SOURCE_FILE);
        fs::write(&source_file, module)?;

        let transpiled = dir.join(&self.toolchain.transpiler_output);
        self.toolchain
            .transpiler
            .run(ToolStage::Transpile, dir, &source_file, &transpiled)?;

        let merged = dir.join(MERGED_FILE);
        self.toolchain
            .bundler
            .run(ToolStage::Bundle, dir, &transpiled, &merged)?;

        let output = if minify {
            let minified = dir.join(MINIFIED_FILE);
            self.toolchain
                .minifier
                .run(ToolStage::Minify, dir, &merged, &minified)?;
            minified
        } else {
            merged
        };

        let script = fs::read_to_string(&output)?;
        info!(
            "Compiled context factory from {} unit(s){}",
            units.len(),
            if minify { ", minified" } else { "" }
        );
        Ok(CompiledScript::new(wrap_factory(&script, initializers)))
    }
}

impl Default for ContextCompiler {
    fn default() -> Self {
        Self::new(Toolchain::default(), &Base64Codec, DEFAULT_CACHE_CAPACITY)
    }
}

/// Wrap a bundled script into the factory function
pub fn wrap_factory(script: &str, initializers: &[FunctionUnit]) -> String {
    let init_calls: String = std::iter::once::<&str>(COMMON_INIT)
        .chain(initializers.iter().map(FunctionUnit::name))
        .map(|name| format!("__exports.{name}();\n"))
        .collect();

    format!(
        "function({CONTEXT_ID_PARAM}, {DATA_PARAM}, {HOST_FUNCTIONS_PARAM}){{\n\
         let __scope = {{}};\n\
         let exports = {{}};\n\
         {script}\n\
         let __exports = exports;\n\
         exports = undefined;\n\
         {init_calls}\
         return __exports.{CONVERT_EXPORTS}(__exports);\n\
         }}"
    )
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::source::RawUnit;

    #[test]
    fn test_wrap_factory() {
        let init = FunctionUnit::new("def setup():\n    pass\n").unwrap();
        let wrapped = wrap_factory("exports.f = f;", &[init]);
        assert_eq!(
            wrapped,
            "function(__context_id, __data, __py_functions_names){\n\
             let __scope = {};\n\
             let exports = {};\n\
             exports.f = f;\n\
             let __exports = exports;\n\
             exports = undefined;\n\
             __exports.__common_init__();\n\
             __exports.setup();\n\
             return __exports.__convert_exports__(__exports);\n\
             }"
        );
    }

    #[test]
    fn test_assemble_module_orders_support_first() {
        let compiler = ContextCompiler::default();
        let unit: SourceUnit = FunctionUnit::new("@ctx.js\ndef hello():\n    pycall(world())\n")
            .unwrap()
            .into();
        let raw: SourceUnit = RawUnit::new("var x = 1;").into();
        let module = compiler.assemble_module(&[unit, raw]).unwrap();

        let support = module.find("def __common_init__").unwrap();
        let hello = module.find("def hello():").unwrap();
        let raw = module.find("__pragma__('js', '{}', 'var x = 1;')").unwrap();
        assert!(support < hello);
        assert!(hello < raw);
        assert!(!module.contains("@ctx.js"));
        assert!(!module.contains("pycall("));
    }

    #[test]
    fn test_rewrite_failure_aborts_before_tools() {
        let compiler = ContextCompiler::default();
        let unit: SourceUnit = FunctionUnit::new("def f():\n    pycall()\n").unwrap().into();
        assert!(matches!(
            compiler.compile(&[unit], false),
            Err(crate::error::WidgetError::InvalidMarkerArity { found: 0, .. })
        ));
        assert_eq!(compiler.cached_entries(), 0);
    }
}
