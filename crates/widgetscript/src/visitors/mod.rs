//! AST visitor implementations for widgetscript
//!
//! This module contains the transformers applied to Python unit sources
//! before they are merged into one module.

mod marker_call;

pub use marker_call::MarkerCallRewriter;
