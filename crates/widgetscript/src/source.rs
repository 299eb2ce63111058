//! Source units merged into a context
//!
//! A unit is identified only by its source text: two units with the same text
//! are the same unit for caching, no matter which variant or constructor
//! produced them.

use std::hash::{Hash, Hasher};

use ruff_python_ast::{Stmt, StmtFunctionDef};
use ruff_python_parser::parse_module;
use ruff_python_trivia::textwrap::dedent;
use ruff_text_size::Ranged;

use crate::error::{Result, WidgetError};

/// A Python function that becomes one embedded-side function
#[derive(Debug, Clone)]
pub struct FunctionUnit {
    name: String,
    source: String,
}

impl FunctionUnit {
    /// Create a unit from the source of a single (possibly decorated) `def`
    pub fn new(source: &str) -> Result<Self> {
        let source = dedent(source).into_owned();
        let name = single_function(&source, |function| Ok(function.name.to_string()))?;
        Ok(Self { name, source })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source_text(&self) -> &str {
        &self.source
    }
}

/// A parameterless Python function whose body is lifted to module level
#[derive(Debug, Clone)]
pub struct FlatUnit {
    source: String,
}

impl FlatUnit {
    pub fn new(source: &str) -> Result<Self> {
        let function_source = dedent(source).into_owned();
        let body = single_function(&function_source, |function| {
            if has_parameters(function) {
                return Err(WidgetError::InvalidFlatUnitSignature {
                    name: function.name.to_string(),
                });
            }
            let first = function
                .body
                .first()
                .map_or(function.end(), |stmt| stmt.start());
            let last = function.end();
            let first = usize::from(first);
            let line = line_start(&function_source, first);
            // `def f(): x = 1` keeps its body on the signature line
            let body_start = if function_source[line..first].trim().is_empty() {
                line
            } else {
                first
            };
            Ok(function_source[body_start..usize::from(last)].to_owned())
        })?;
        let mut source = dedent(&body).into_owned();
        if !source.ends_with('\n') {
            source.push('\n');
        }
        Ok(Self { source })
    }

    pub fn source_text(&self) -> &str {
        &self.source
    }
}

/// Pre-written JavaScript inserted verbatim through the transpiler's escape hatch
#[derive(Debug, Clone)]
pub struct RawUnit {
    source: String,
}

impl RawUnit {
    pub fn new(js_source: &str) -> Self {
        let mut escaped = String::with_capacity(js_source.len());
        for c in js_source.chars() {
            match c {
                '\\' => escaped.push_str("\\\\"),
                '\'' => escaped.push_str("\\'"),
                _ => escaped.push(c),
            }
        }
        Self {
            source: format!("__pragma__('js', '{{}}', '{escaped}')\n"),
        }
    }

    pub fn source_text(&self) -> &str {
        &self.source
    }
}

#[derive(Debug, Clone)]
pub enum SourceUnit {
    Function(FunctionUnit),
    Flat(FlatUnit),
    Raw(RawUnit),
}

impl SourceUnit {
    pub fn source_text(&self) -> &str {
        match self {
            Self::Function(unit) => unit.source_text(),
            Self::Flat(unit) => unit.source_text(),
            Self::Raw(unit) => unit.source_text(),
        }
    }
}

impl PartialEq for SourceUnit {
    fn eq(&self, other: &Self) -> bool {
        self.source_text() == other.source_text()
    }
}

impl Eq for SourceUnit {}

impl Hash for SourceUnit {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source_text().hash(state);
    }
}

impl From<FunctionUnit> for SourceUnit {
    fn from(unit: FunctionUnit) -> Self {
        Self::Function(unit)
    }
}

impl From<FlatUnit> for SourceUnit {
    fn from(unit: FlatUnit) -> Self {
        Self::Flat(unit)
    }
}

impl From<RawUnit> for SourceUnit {
    fn from(unit: RawUnit) -> Self {
        Self::Raw(unit)
    }
}

/// Every top-level function definition of a module as `(name, source)`,
/// decorators included
pub fn split_module_functions(source: &str) -> Result<Vec<(String, String)>> {
    let parsed = parse_module(source).map_err(WidgetError::invalid_source)?;
    Ok(parsed
        .syntax()
        .body
        .iter()
        .filter_map(|stmt| match stmt {
            Stmt::FunctionDef(function) => {
                let start = line_start(source, function.start().into());
                let text = &source[start..usize::from(function.end())];
                Some((function.name.to_string(), format!("{text}\n")))
            }
            _ => None,
        })
        .collect())
}

fn single_function<T>(
    source: &str,
    visit: impl FnOnce(&StmtFunctionDef) -> Result<T>,
) -> Result<T> {
    let parsed = parse_module(source).map_err(WidgetError::invalid_source)?;
    match parsed.syntax().body.as_slice() {
        [Stmt::FunctionDef(function)] => visit(function),
        body => Err(WidgetError::InvalidFunctionUnit { found: body.len() }),
    }
}

fn has_parameters(function: &StmtFunctionDef) -> bool {
    let parameters = &function.parameters;
    !parameters.posonlyargs.is_empty()
        || !parameters.args.is_empty()
        || parameters.vararg.is_some()
        || !parameters.kwonlyargs.is_empty()
        || parameters.kwarg.is_some()
}

fn line_start(source: &str, offset: usize) -> usize {
    source[..offset].rfind('\n').map_or(0, |newline| newline + 1)
}
