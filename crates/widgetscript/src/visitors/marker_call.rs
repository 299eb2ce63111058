//! AST transformer that turns `pycall(...)` markers into boundary calls
//!
//! ```python
//! pycall(foo(1, *xs, k=2, **kw), on_result, on_error)
//! ```
//!
//! becomes a call on the host execute channel whose request string is
//! `<unique name of foo>(<encoded arguments>)`, with a reply handler built from
//! the optional callbacks. Nested calls are rewritten bottom-up, so markers in
//! callback lambdas or in target arguments are handled too.

use std::cell::RefCell;

use log::trace;
use ruff_python_ast::{
    Expr, ExprCall,
    visitor::transformer::{Transformer, walk_expr},
};
use ruff_text_size::Ranged;

use crate::{
    ast_builder,
    builtins::{
        CALLBACK_ADAPTER, CONTEXT_ID_PARAM, CONVERT_ARGUMENT, CONVERT_KEYWORD_ARGUMENT,
        CONVERT_STARRED_ARGUMENT, CONVERT_STARRED_KEYWORD_ARGUMENT, EXECUTE_CHANNEL,
        JOIN_ARGUMENTS, MARKER, UNIQUE_PY_FUNCTION_NAME,
    },
    error::{Result, WidgetError},
};

/// Rewrites marker calls in place; the first failure stops the walk and is
/// reported by [`MarkerCallRewriter::finish`]
#[derive(Debug)]
pub struct MarkerCallRewriter<'src> {
    source: &'src str,
    error: RefCell<Option<WidgetError>>,
}

impl<'src> MarkerCallRewriter<'src> {
    /// `source` is the text the visited tree was parsed from
    pub fn new(source: &'src str) -> Self {
        Self {
            source,
            error: RefCell::new(None),
        }
    }

    pub fn finish(self) -> Result<()> {
        self.error.into_inner().map_or(Ok(()), Err)
    }

    fn is_marker(call: &ExprCall) -> bool {
        matches!(call.func.as_ref(), Expr::Name(name) if name.id.as_str() == MARKER)
    }

    fn rewrite_marker(&self, marker: &ExprCall) -> Result<Expr> {
        let arguments = &marker.arguments;
        if !arguments.keywords.is_empty() || !(1..=3).contains(&arguments.args.len()) {
            return Err(WidgetError::InvalidMarkerArity {
                marker: MARKER,
                found: arguments.args.len() + arguments.keywords.len(),
            });
        }

        // A marker nested as the target has already been replaced by a
        // synthetic call without a source range
        let target = match &arguments.args[0] {
            Expr::Call(target)
                if !Self::is_marker(target)
                    && !target.range().is_empty()
                    && !target.func.range().is_empty() =>
            {
                target
            }
            other => {
                let found = match &self.source[other.range()] {
                    "" => format!("{MARKER}(...)"),
                    text => text.to_owned(),
                };
                return Err(WidgetError::InvalidMarkerTarget {
                    marker: MARKER,
                    found,
                });
            }
        };

        let mut execute_args = vec![self.request_expr(target)];
        if let Some(callback) = arguments.args.get(1) {
            let error_callback = arguments
                .args
                .get(2)
                .cloned()
                .unwrap_or_else(ast_builder::none_literal);
            let adapter = ast_builder::call_with_args(
                ast_builder::name(CALLBACK_ADAPTER),
                vec![callback.clone(), error_callback],
            );
            execute_args.push(ast_builder::dict(vec![(
                "iopub",
                ast_builder::dict(vec![("output", adapter)]),
            )]));
            execute_args.push(ast_builder::dict(vec![(
                "silent",
                ast_builder::bool_literal(false),
            )]));
        }

        Ok(ast_builder::call_with_args(
            ast_builder::dotted(EXECUTE_CHANNEL),
            execute_args,
        ))
    }

    /// `<unique name> + '(' + <joined encoded args> + ')'`
    fn request_expr(&self, target: &ExprCall) -> Expr {
        let callee = &self.source[target.func.range()];
        trace!("Rewriting marker call to `{callee}`");

        let unique_name = ast_builder::call_with_args(
            ast_builder::name(UNIQUE_PY_FUNCTION_NAME),
            vec![
                ast_builder::string_literal(callee),
                ast_builder::name(CONTEXT_ID_PARAM),
            ],
        );

        let positional = target.arguments.args.iter().map(|arg| match arg {
            Expr::Starred(starred) => {
                convert(CONVERT_STARRED_ARGUMENT, vec![(*starred.value).clone()])
            }
            plain => convert(CONVERT_ARGUMENT, vec![plain.clone()]),
        });
        let keywords = target
            .arguments
            .keywords
            .iter()
            .map(|keyword| match &keyword.arg {
                Some(name) => convert(
                    CONVERT_KEYWORD_ARGUMENT,
                    vec![
                        ast_builder::string_literal(name.as_str()),
                        keyword.value.clone(),
                    ],
                ),
                None => convert(CONVERT_STARRED_KEYWORD_ARGUMENT, vec![keyword.value.clone()]),
            });
        let converted = positional.chain(keywords).collect();

        ast_builder::concat(vec![
            unique_name,
            ast_builder::string_literal("("),
            convert(JOIN_ARGUMENTS, vec![ast_builder::list(converted)]),
            ast_builder::string_literal(")"),
        ])
    }
}

fn convert(helper: &str, args: Vec<Expr>) -> Expr {
    ast_builder::call_with_args(ast_builder::name(helper), args)
}

impl Transformer for MarkerCallRewriter<'_> {
    fn visit_expr(&self, expr: &mut Expr) {
        if self.error.borrow().is_some() {
            return;
        }

        walk_expr(self, expr);

        let rewritten = match expr {
            Expr::Call(call) if Self::is_marker(call) => self.rewrite_marker(call),
            _ => return,
        };
        match rewritten {
            Ok(replacement) => *expr = replacement,
            Err(error) => {
                self.error.borrow_mut().get_or_insert(error);
            }
        }
    }
}
