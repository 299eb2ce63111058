//! Call bridge between Python kernels and browser-side widget code
//!
//! Python functions marked for the browser are rewritten so that
//! `pycall(f(...))` becomes a request on the kernel's execute channel, merged
//! with support code, pushed through an external transpile / bundle / minify
//! toolchain and wrapped into a context factory. Each [`Context`] injects one
//! instance of such a factory and owns the unique names it exposes.

pub mod ast_builder;
pub mod builtins;
pub mod cache;
pub mod codec;
pub mod compiler;
pub mod config;
pub mod context;
pub mod error;
pub mod host;
pub mod injector;
pub mod names;
pub mod rewriter;
pub mod source;
pub mod toolchain;
pub mod types;
pub mod visitors;

pub use codec::{ArgumentCodec, Base64Codec, JsonLiteralCodec};
pub use compiler::{CompiledScript, ContextCompiler};
pub use config::Config;
pub use context::{Context, JsFunction};
pub use error::{Result, ToolStage, WidgetError};
pub use host::{HostBridge, HostFunction, HostRegistry};
pub use injector::{AnonymousInjector, ContextDescriptor, ContextInjector, PrecompiledContext};
pub use names::ContextId;
pub use source::{FlatUnit, FunctionUnit, RawUnit, SourceUnit};
