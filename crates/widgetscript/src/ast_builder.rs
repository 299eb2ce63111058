//! AST builder module for creating synthetic AST nodes
//!
//! This module provides factory functions for the expression nodes the marker
//! rewriter splices into user code. All synthetic nodes use default ranges to
//! clearly indicate they are generated.

use ruff_python_ast::{
    Arguments, AtomicNodeIndex, DictItem, Expr, ExprAttribute, ExprBinOp, ExprBooleanLiteral,
    ExprCall, ExprContext, ExprDict, ExprList, ExprName, ExprNoneLiteral, ExprStringLiteral,
    Identifier, Operator, StringLiteral, StringLiteralFlags, StringLiteralValue, name::Name,
};
use ruff_text_size::TextRange;

/// Create a synthetic range for generated nodes
fn synthetic_range() -> TextRange {
    TextRange::default()
}

/// Create a name expression: `name`
pub fn name(name: &str) -> Expr {
    Expr::Name(ExprName {
        id: Name::new(name),
        ctx: ExprContext::Load,
        range: synthetic_range(),
        node_index: AtomicNodeIndex::dummy(),
    })
}

/// Create a dotted attribute chain: `a.b.c`
pub fn dotted(path: &str) -> Expr {
    let mut segments = path.split('.');
    let root = name(segments.next().unwrap_or_default());
    segments.fold(root, |value, attr| {
        Expr::Attribute(ExprAttribute {
            value: Box::new(value),
            attr: Identifier::new(attr, synthetic_range()),
            ctx: ExprContext::Load,
            range: synthetic_range(),
            node_index: AtomicNodeIndex::dummy(),
        })
    })
}

/// Create a function call with arguments: `func(arg1, arg2, ...)`
pub fn call_with_args(func: Expr, args: Vec<Expr>) -> Expr {
    Expr::Call(ExprCall {
        func: Box::new(func),
        arguments: Arguments {
            args: args.into_boxed_slice(),
            keywords: Box::new([]),
            range: synthetic_range(),
            node_index: AtomicNodeIndex::dummy(),
        },
        range: synthetic_range(),
        node_index: AtomicNodeIndex::dummy(),
    })
}

/// Create a string literal: `'value'`
pub fn string_literal(value: &str) -> Expr {
    Expr::StringLiteral(ExprStringLiteral {
        value: StringLiteralValue::single(StringLiteral {
            value: value.into(),
            flags: StringLiteralFlags::empty(),
            range: synthetic_range(),
            node_index: AtomicNodeIndex::dummy(),
        }),
        range: synthetic_range(),
        node_index: AtomicNodeIndex::dummy(),
    })
}

/// Create a boolean literal: `True` / `False`
pub fn bool_literal(value: bool) -> Expr {
    Expr::BooleanLiteral(ExprBooleanLiteral {
        value,
        range: synthetic_range(),
        node_index: AtomicNodeIndex::dummy(),
    })
}

/// Create `None`
pub fn none_literal() -> Expr {
    Expr::NoneLiteral(ExprNoneLiteral {
        range: synthetic_range(),
        node_index: AtomicNodeIndex::dummy(),
    })
}

/// Create a left-associated concatenation: `a + b + c`
///
/// Returns an empty string literal when `operands` is empty.
pub fn concat(operands: Vec<Expr>) -> Expr {
    let mut operands = operands.into_iter();
    let Some(first) = operands.next() else {
        return string_literal("");
    };
    operands.fold(first, |left, right| {
        Expr::BinOp(ExprBinOp {
            left: Box::new(left),
            op: Operator::Add,
            right: Box::new(right),
            range: synthetic_range(),
            node_index: AtomicNodeIndex::dummy(),
        })
    })
}

/// Create a list display: `[a, b]`
pub fn list(elts: Vec<Expr>) -> Expr {
    Expr::List(ExprList {
        elts,
        ctx: ExprContext::Load,
        range: synthetic_range(),
        node_index: AtomicNodeIndex::dummy(),
    })
}

/// Create a dict display with string keys: `{'k': v}`
pub fn dict(entries: Vec<(&str, Expr)>) -> Expr {
    Expr::Dict(ExprDict {
        items: entries
            .into_iter()
            .map(|(key, value)| DictItem {
                key: Some(string_literal(key)),
                value,
            })
            .collect(),
        range: synthetic_range(),
        node_index: AtomicNodeIndex::dummy(),
    })
}
