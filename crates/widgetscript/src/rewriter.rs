//! Per-unit source rewriting ahead of the merge
//!
//! Function and flat units are parsed, stripped of decorators, run through
//! [`MarkerCallRewriter`] and rendered back to Python. Raw units are already
//! escaped and pass through verbatim.

use log::debug;
use ruff_python_ast::{Stmt, visitor::transformer::Transformer};
use ruff_python_codegen::{Generator, Stylist};
use ruff_python_parser::parse_module;

use crate::{
    error::{Result, WidgetError},
    source::SourceUnit,
    visitors::MarkerCallRewriter,
};

/// Module text contributed by one unit
pub fn rewrite_unit(unit: &SourceUnit) -> Result<String> {
    match unit {
        SourceUnit::Function(function) => {
            debug!("Rewriting function unit `{}`", function.name());
            rewrite_source(function.source_text())
        }
        SourceUnit::Flat(flat) => rewrite_source(flat.source_text()),
        SourceUnit::Raw(raw) => Ok(raw.source_text().to_owned()),
    }
}

/// Rewrite every marker call in `source`, dropping decorators of top-level
/// functions
pub fn rewrite_source(source: &str) -> Result<String> {
    let parsed = parse_module(source).map_err(WidgetError::invalid_source)?;
    let stylist = Stylist::from_tokens(parsed.tokens(), source);
    let mut module = parsed.syntax().clone();

    for stmt in &mut module.body {
        if let Stmt::FunctionDef(function) = stmt {
            function.decorator_list.clear();
        }
    }

    let rewriter = MarkerCallRewriter::new(source);
    rewriter.visit_body(&mut module.body);
    rewriter.finish()?;

    let mut rendered = module
        .body
        .iter()
        .map(|stmt| Generator::from(&stylist).stmt(stmt))
        .collect::<Vec<_>>()
        .join("\n");
    rendered.push('\n');
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{FlatUnit, FunctionUnit, RawUnit};

    /// Rewrite and normalise quotes so assertions don't depend on the
    /// stylist's preferred quote character
    fn rewrite(source: &str) -> String {
        rewrite_source(source).unwrap().replace('\'', "\"")
    }

    fn position(haystack: &str, needle: &str) -> usize {
        haystack
            .find(needle)
            .unwrap_or_else(|| panic!("`{needle}` not found in:\n{haystack}"))
    }

    #[test]
    fn test_rewrites_all_argument_shapes_in_order() {
        let output = rewrite("def f(xs, kw):\n    pycall(foo(1, *xs, k=2, **kw))\n");

        assert!(!output.contains("pycall("), "{output}");
        let execute = position(&output, "IPython.notebook.kernel.execute(");
        let name = position(&output, "__unique_py_function_name__(\"foo\", __context_id)");
        let plain = position(&output, "__convert_py_argument__(1)");
        let starred = position(&output, "__convert_py_starred_argument__(xs)");
        let keyword = position(&output, "__convert_py_keyword_argument__(\"k\", 2)");
        let starred_keyword = position(&output, "__convert_py_starred_keyword_argument__(kw)");
        assert!(execute < name);
        assert!(name < plain);
        assert!(plain < starred);
        assert!(starred < keyword);
        assert!(keyword < starred_keyword);
        assert!(output.contains("__join_py_arguments__(["), "{output}");
        // No callbacks means no reply handler registration
        assert!(!output.contains("__callback_adapter__"), "{output}");
    }

    #[test]
    fn test_rewrites_callbacks() {
        let output = rewrite("def f():\n    pycall(foo(), on_ok, on_err)\n");
        assert!(output.contains("__callback_adapter__(on_ok, on_err)"), "{output}");
        assert!(output.contains("\"iopub\""), "{output}");
        assert!(output.contains("\"output\""), "{output}");
        assert!(output.contains("\"silent\": False"), "{output}");

        let output = rewrite("def f():\n    pycall(foo(), on_ok)\n");
        assert!(output.contains("__callback_adapter__(on_ok, None)"), "{output}");
    }

    #[test]
    fn test_rewrites_nested_markers() {
        let output = rewrite(
            "def f():\n    pycall(foo(), lambda result: pycall(bar(result)))\n    helper(pycall(baz()))\n",
        );
        assert!(!output.contains("pycall("), "{output}");
        for callee in ["foo", "bar", "baz"] {
            assert!(
                output.contains(&format!("__unique_py_function_name__(\"{callee}\", __context_id)")),
                "{callee} not rewritten:\n{output}"
            );
        }
        assert!(output.contains("helper(IPython.notebook.kernel.execute("), "{output}");
    }

    #[test]
    fn test_invalid_arity() {
        for source in [
            "def f():\n    pycall()\n",
            "def f():\n    pycall(a(), b, c, d)\n",
            "def f():\n    pycall(a(), callback=b)\n",
        ] {
            assert!(
                matches!(
                    rewrite_source(source),
                    Err(WidgetError::InvalidMarkerArity { .. })
                ),
                "{source}"
            );
        }
        assert!(matches!(
            rewrite_source("def f():\n    pycall(a(), b, c, d)\n"),
            Err(WidgetError::InvalidMarkerArity { found: 4, .. })
        ));
    }

    #[test]
    fn test_invalid_target() {
        let error = rewrite_source("def f(x):\n    pycall(x)\n").unwrap_err();
        match error {
            WidgetError::InvalidMarkerTarget { found, .. } => assert_eq!(found, "x"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_marker_as_marker_target() {
        for source in [
            "def f():\n    pycall(pycall(foo()))\n",
            "def f():\n    pycall(pycall(foo())(), done)\n",
        ] {
            match rewrite_source(source).unwrap_err() {
                WidgetError::InvalidMarkerTarget { found, .. } => {
                    assert!(found.contains("pycall("), "{found}");
                }
                other => panic!("unexpected error {other:?}"),
            }
        }
    }

    #[test]
    fn test_leaves_other_calls_unchanged() {
        let output = rewrite("def f(x):\n    return other(foo(x), key=1)\n");
        assert_eq!(output, "def f(x):\n    return other(foo(x), key=1)\n");
    }

    #[test]
    fn test_strips_decorators() {
        let unit = FunctionUnit::new("@ctx.js\n@other\ndef f():\n    pass\n").unwrap();
        let output = rewrite_unit(&unit.into()).unwrap();
        assert_eq!(output, "def f():\n    pass\n");
    }

    #[test]
    fn test_flat_and_raw_units() {
        let flat = FlatUnit::new("def setup():\n    pycall(ready())\n").unwrap();
        let output = rewrite_unit(&flat.into()).unwrap();
        assert!(output.starts_with("IPython.notebook.kernel.execute("), "{output}");

        let raw = RawUnit::new("console.log('hi');");
        let expected = raw.source_text().to_owned();
        assert_eq!(rewrite_unit(&raw.into()).unwrap(), expected);
    }
}
