//! Host side of the boundary
//!
//! The notebook kernel that actually evaluates boundary call requests is an
//! external collaborator. [`HostBridge`] is the seam: it makes wrapper
//! functions reachable under their unique names and forwards scripts to the
//! embedded engine. [`HostRegistry`] is an in-process implementation that also
//! evaluates requests itself, which is what the boundary protocol needs from
//! any concrete host.

use std::{cell::RefCell, fmt, rc::Rc};

use indexmap::IndexMap;
use log::{debug, trace, warn};
use ruff_python_ast::{Expr, Stmt};
use ruff_python_parser::parse_module;
use ruff_text_size::Ranged;
use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::{
    codec::{ArgumentCodec, DecodedCall, ReplyEnvelope, decode_call_arguments},
    error::{Result, WidgetError},
};

/// A host function callable from embedded code
pub type HostFunction = Box<dyn Fn(&[Value], &IndexMap<String, Value>) -> anyhow::Result<Value>>;

pub trait HostBridge {
    /// Make `function` reachable from boundary requests as `unique_name`
    fn register(&self, unique_name: &str, function: HostFunction);

    /// Drop a wrapper; returns whether it existed
    fn unregister(&self, unique_name: &str) -> bool;

    /// Run a script in the embedded engine
    fn execute_script(&self, script: &str) -> Result<()>;
}

/// Parsed boundary request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundaryRequest {
    /// `<name>('<encoded>', ..., key='<encoded>')`, arguments still encoded
    Call {
        function: String,
        positional: Vec<String>,
        keywords: Vec<(String, String)>,
    },
    /// `del <name>`, sent when a context is cleaned up
    Release { function: String },
}

impl BoundaryRequest {
    pub fn parse(request: &str) -> Result<Self> {
        let parsed = parse_module(request).map_err(WidgetError::invalid_source)?;
        match parsed.syntax().body.as_slice() {
            [Stmt::Delete(delete)] => match delete.targets.as_slice() {
                [Expr::Name(name)] => Ok(Self::Release {
                    function: name.id.to_string(),
                }),
                _ => Err(malformed(request)),
            },
            [Stmt::Expr(stmt)] => {
                let Expr::Call(call) = stmt.value.as_ref() else {
                    return Err(malformed(request));
                };
                let Expr::Name(function) = call.func.as_ref() else {
                    return Err(malformed(request));
                };
                let positional = call
                    .arguments
                    .args
                    .iter()
                    .map(|arg| literal_body(request, arg))
                    .collect::<Result<Vec<_>>>()?;
                let keywords = call
                    .arguments
                    .keywords
                    .iter()
                    .map(|keyword| {
                        let name = keyword.arg.as_ref().ok_or_else(|| malformed(request))?;
                        Ok((name.to_string(), literal_body(request, &keyword.value)?))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Self::Call {
                    function: function.id.to_string(),
                    positional,
                    keywords,
                })
            }
            _ => Err(malformed(request)),
        }
    }

    /// Decode the arguments of a [`BoundaryRequest::Call`]
    pub fn decode(&self, codec: &dyn ArgumentCodec) -> Result<DecodedCall> {
        match self {
            Self::Call {
                positional,
                keywords,
                ..
            } => decode_call_arguments(codec, positional, keywords),
            Self::Release { .. } => Ok(DecodedCall::default()),
        }
    }
}

fn malformed(request: &str) -> WidgetError {
    WidgetError::Codec(format!("malformed boundary request `{request}`"))
}

/// Raw text between the quotes of a string literal argument
fn literal_body(request: &str, expr: &Expr) -> Result<String> {
    let Expr::StringLiteral(literal) = expr else {
        return Err(malformed(request));
    };
    if literal.value.is_implicit_concatenated() {
        return Err(malformed(request));
    }
    let text = &request[literal.range()];
    let quote = text.chars().next().filter(|c| matches!(c, '\'' | '"'));
    match quote {
        Some(quote) if text.len() >= 2 && text.ends_with(quote) => {
            Ok(text[1..text.len() - 1].to_owned())
        }
        _ => Err(malformed(request)),
    }
}

/// In-memory host: a name -> wrapper table plus a log of executed scripts
#[derive(Default)]
pub struct HostRegistry {
    functions: RefCell<FxHashMap<String, Rc<HostFunction>>>,
    scripts: RefCell<Vec<String>>,
}

impl fmt::Debug for HostRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostRegistry")
            .field("functions", &self.registered_names())
            .field("scripts", &self.scripts.borrow().len())
            .finish()
    }
}

impl HostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_registered(&self, unique_name: &str) -> bool {
        self.functions.borrow().contains_key(unique_name)
    }

    pub fn registered_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.functions.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    /// Scripts sent to the embedded engine, oldest first
    pub fn executed_scripts(&self) -> Vec<String> {
        self.scripts.borrow().clone()
    }

    /// Evaluate a boundary request and build the reply envelope
    ///
    /// Never fails: every problem is reported inside the envelope, as the
    /// kernel would report an exception.
    pub fn dispatch(&self, request: &str, codec: &dyn ArgumentCodec) -> ReplyEnvelope {
        trace!("Dispatching boundary request `{request}`");
        let parsed = match BoundaryRequest::parse(request) {
            Ok(parsed) => parsed,
            Err(e) => return ReplyEnvelope::error("SyntaxError", e.to_string()),
        };

        let function_name = match &parsed {
            BoundaryRequest::Release { function } => {
                self.unregister(function);
                return reply(Ok(Value::Null));
            }
            BoundaryRequest::Call { function, .. } => function,
        };

        // Cloned out so the wrapper may itself (un)register functions
        let Some(function) = self.functions.borrow().get(function_name).cloned() else {
            return ReplyEnvelope::error(
                "NameError",
                format!("name '{function_name}' is not defined"),
            );
        };

        let call = match parsed.decode(codec) {
            Ok(call) => call,
            Err(e) => return ReplyEnvelope::error("ValueError", e.to_string()),
        };

        match function(&call.positional, &call.keywords) {
            Ok(value) => reply(Ok(value)),
            Err(e) => {
                debug!("Host function `{function_name}` failed: {e:#}");
                ReplyEnvelope::error("HostFunctionError", format!("{e:#}"))
            }
        }
    }
}

fn reply(result: Result<Value>) -> ReplyEnvelope {
    match result.and_then(|value| ReplyEnvelope::success(&value)) {
        Ok(envelope) => envelope,
        Err(e) => ReplyEnvelope::error("ValueError", e.to_string()),
    }
}

impl HostBridge for HostRegistry {
    fn register(&self, unique_name: &str, function: HostFunction) {
        debug!("Registering host function `{unique_name}`");
        let previous = self
            .functions
            .borrow_mut()
            .insert(unique_name.to_owned(), Rc::new(function));
        if previous.is_some() {
            warn!("Host function `{unique_name}` was replaced");
        }
    }

    fn unregister(&self, unique_name: &str) -> bool {
        debug!("Unregistering host function `{unique_name}`");
        self.functions.borrow_mut().remove(unique_name).is_some()
    }

    fn execute_script(&self, script: &str) -> Result<()> {
        self.scripts.borrow_mut().push(script.to_owned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::bail;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::codec::{
        Base64Codec, CallArgument, JsonLiteralCodec, encode_call_arguments,
        strategies::call_arguments,
    };

    fn echo() -> HostFunction {
        Box::new(|args, kwargs| Ok(json!({"args": args, "kwargs": kwargs})))
    }

    #[test]
    fn test_parse_call_and_release() {
        let request = BoundaryRequest::parse("f_1('YQ==',\"Yg==\",key='Yw==')").unwrap();
        assert_eq!(
            request,
            BoundaryRequest::Call {
                function: "f_1".to_owned(),
                positional: vec!["YQ==".to_owned(), "Yg==".to_owned()],
                keywords: vec![("key".to_owned(), "Yw==".to_owned())],
            }
        );
        assert_eq!(
            BoundaryRequest::parse("del f_1").unwrap(),
            BoundaryRequest::Release {
                function: "f_1".to_owned()
            }
        );
    }

    #[test]
    fn test_parse_rejects_non_literal_arguments() {
        for request in [
            "f(x)",
            "f(**kw)",
            "a.b('x')",
            "x = 1",
            "del a.b",
            "f('a') ; g('b')",
            "f('a' 'b')",
        ] {
            assert!(BoundaryRequest::parse(request).is_err(), "{request}");
        }
    }

    #[test]
    fn test_call_shapes_round_trip_through_dispatch() {
        for codec in [&Base64Codec as &dyn ArgumentCodec, &JsonLiteralCodec] {
            let registry = HostRegistry::new();
            registry.register("echo_ctx", echo());

            let mut spread = IndexMap::new();
            spread.insert("z".to_owned(), json!({"deep": ["it's", "\\"]}));
            spread.insert("y".to_owned(), Value::Null);
            let arguments = [
                CallArgument::Positional(json!(1)),
                CallArgument::Starred(vec![json!("two"), json!([3])]),
                CallArgument::Keyword("k".to_owned(), json!(2)),
                CallArgument::StarredKeyword(spread),
            ];
            let joined = encode_call_arguments(codec, &arguments).unwrap();
            let reply = registry.dispatch(&format!("echo_ctx({joined})"), codec);

            let payload = reply.payload().unwrap();
            assert_eq!(payload["args"], json!([1, "two", [3]]));
            assert_eq!(
                payload["kwargs"],
                json!({"k": 2, "z": {"deep": ["it's", "\\"]}, "y": null})
            );
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn test_any_call_survives_the_request_text((arguments, expected) in call_arguments()) {
            for codec in [&Base64Codec as &dyn ArgumentCodec, &JsonLiteralCodec] {
                let joined = encode_call_arguments(codec, &arguments).unwrap();
                let request = BoundaryRequest::parse(&format!("target({joined})")).unwrap();
                prop_assert!(
                    matches!(&request, BoundaryRequest::Call { function, .. } if function == "target")
                );
                prop_assert_eq!(request.decode(codec).unwrap(), expected.clone());
            }
        }
    }

    #[test]
    fn test_dispatch_errors_become_envelopes() {
        let registry = HostRegistry::new();
        registry.register(
            "fails",
            Box::new(|_, _| -> anyhow::Result<Value> { bail!("nope") }),
        );

        let unknown = registry.dispatch("missing()", &Base64Codec);
        assert!(matches!(unknown, ReplyEnvelope::Error { ref ename, .. } if ename == "NameError"));

        let failed = registry.dispatch("fails()", &Base64Codec);
        assert!(
            matches!(failed, ReplyEnvelope::Error { ref evalue, .. } if evalue.contains("nope"))
        );

        let malformed = registry.dispatch("fails(", &Base64Codec);
        assert!(matches!(malformed, ReplyEnvelope::Error { ref ename, .. } if ename == "SyntaxError"));

        let undecodable = registry.dispatch("fails('***')", &Base64Codec);
        assert!(matches!(undecodable, ReplyEnvelope::Error { ref ename, .. } if ename == "ValueError"));
    }

    #[test]
    fn test_release_unregisters() {
        let registry = HostRegistry::new();
        registry.register("gone", echo());
        assert!(registry.is_registered("gone"));

        let reply = registry.dispatch("del gone", &Base64Codec);
        assert!(!reply.is_error());
        assert!(!registry.is_registered("gone"));
        assert!(registry.registered_names().is_empty());
    }

    #[test]
    fn test_execute_script_is_recorded() {
        let registry = HostRegistry::new();
        registry.execute_script("a();").unwrap();
        registry.execute_script("b();").unwrap();
        assert_eq!(registry.executed_scripts(), vec!["a();", "b();"]);
    }
}
