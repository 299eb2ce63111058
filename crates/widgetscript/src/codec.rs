//! Reversible encoding of values crossing the host/embedded boundary
//!
//! Values travel as JSON. Before being spliced into generated source text the
//! JSON is encoded once more so the result can sit inside a single-quoted
//! string literal without breaking it. The scheme is pluggable through
//! [`ArgumentCodec`]; [`Base64Codec`] is the default because it has no
//! quoting hazards at all.
//!
//! Both sides must agree on the scheme, so every codec also supplies the
//! embedded-side helpers (`__encode_value__` / `__decode_value__`) that get
//! compiled into the context factory.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, WidgetError};

/// MIME key under which a successful reply carries its payload
pub const TEXT_PLAIN: &str = "text/plain";

pub trait ArgumentCodec: fmt::Debug + Send + Sync {
    /// Stable name, part of the compilation cache key
    fn name(&self) -> &'static str;

    /// Encode a value into the body of a single-quoted string literal
    fn encode(&self, value: &Value) -> Result<String>;

    /// Reverse [`ArgumentCodec::encode`]
    fn decode(&self, encoded: &str) -> Result<Value>;

    /// Python source of the embedded `__encode_value__` / `__decode_value__` pair
    fn embedded_helpers(&self) -> &'static str;

    /// Encode a value as a complete single-quoted literal
    fn encode_literal(&self, value: &Value) -> Result<String> {
        Ok(format!("'{}'", self.encode(value)?))
    }
}

/// Base64 over the UTF-8 JSON text
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64Codec;

impl ArgumentCodec for Base64Codec {
    fn name(&self) -> &'static str {
        "base64"
    }

    fn encode(&self, value: &Value) -> Result<String> {
        let json = serde_json::to_string(value)?;
        Ok(STANDARD.encode(json))
    }

    fn decode(&self, encoded: &str) -> Result<Value> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| WidgetError::Codec(format!("bad base64 `{encoded}`: {e}")))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn embedded_helpers(&self) -> &'static str {
        r#"def __encode_value__(value):
    text = JSON.stringify(value, __json_replacer__)
    return "'" + btoa(unescape(encodeURIComponent(text))) + "'"


def __decode_value__(encoded):
    return JSON.parse(decodeURIComponent(escape(atob(encoded))))
"#
    }
}

/// JSON text with backslashes and single quotes escaped
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLiteralCodec;

impl ArgumentCodec for JsonLiteralCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, value: &Value) -> Result<String> {
        let json = serde_json::to_string(value)?;
        let mut escaped = String::with_capacity(json.len());
        for c in json.chars() {
            if matches!(c, '\\' | '\'') {
                escaped.push('\\');
            }
            escaped.push(c);
        }
        Ok(escaped)
    }

    fn decode(&self, encoded: &str) -> Result<Value> {
        let mut json = String::with_capacity(encoded.len());
        let mut chars = encoded.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                match chars.next() {
                    Some(escaped @ ('\\' | '\'')) => json.push(escaped),
                    other => {
                        return Err(WidgetError::Codec(format!(
                            "unexpected escape `\\{}` in `{encoded}`",
                            other.map(String::from).unwrap_or_default()
                        )));
                    }
                }
            } else {
                json.push(c);
            }
        }
        Ok(serde_json::from_str(&json)?)
    }

    fn embedded_helpers(&self) -> &'static str {
        r#"def __encode_value__(value):
    text = JSON.stringify(value, __json_replacer__)
    return "'" + text.replace('\\', '\\\\').replace("'", "\\'") + "'"


def __decode_value__(encoded):
    return JSON.parse(encoded)
"#
    }
}

/// Look up a codec by its [`ArgumentCodec::name`]
pub fn codec_by_name(name: &str) -> Option<&'static dyn ArgumentCodec> {
    match name {
        "base64" => Some(&Base64Codec),
        "json" => Some(&JsonLiteralCodec),
        _ => None,
    }
}

/// One argument of a call as written at the call site
#[derive(Debug, Clone, PartialEq)]
pub enum CallArgument {
    /// `f(x)`
    Positional(Value),
    /// `f(*xs)`
    Starred(Vec<Value>),
    /// `f(k=x)`
    Keyword(String, Value),
    /// `f(**kw)`
    StarredKeyword(IndexMap<String, Value>),
}

/// Arguments reconstructed on the receiving side
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedCall {
    pub positional: Vec<Value>,
    pub keywords: IndexMap<String, Value>,
}

/// Join call arguments into the text that goes between the parentheses of a
/// boundary call request
///
/// Positional entries keep their order; spread entries are flattened in place
/// and empty spreads contribute nothing.
pub fn encode_call_arguments(
    codec: &dyn ArgumentCodec,
    arguments: &[CallArgument],
) -> Result<String> {
    let mut parts = Vec::with_capacity(arguments.len());
    for argument in arguments {
        match argument {
            CallArgument::Positional(value) => parts.push(codec.encode_literal(value)?),
            CallArgument::Starred(values) => {
                for value in values {
                    parts.push(codec.encode_literal(value)?);
                }
            }
            CallArgument::Keyword(name, value) => {
                parts.push(format!("{name}={}", codec.encode_literal(value)?));
            }
            CallArgument::StarredKeyword(entries) => {
                for (name, value) in entries {
                    parts.push(format!("{name}={}", codec.encode_literal(value)?));
                }
            }
        }
    }
    Ok(parts.join(","))
}

/// Rebuild a call from encoded literal bodies, as received by the host
pub fn decode_call_arguments(
    codec: &dyn ArgumentCodec,
    positional: &[String],
    keywords: &[(String, String)],
) -> Result<DecodedCall> {
    Ok(DecodedCall {
        positional: positional
            .iter()
            .map(|arg| codec.decode(arg))
            .collect::<Result<_>>()?,
        keywords: keywords
            .iter()
            .map(|(name, arg)| Ok((name.clone(), codec.decode(arg)?)))
            .collect::<Result<_>>()?,
    })
}

/// Envelope of the host's answer to a boundary call, shaped like the
/// `content` of a notebook output message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReplyEnvelope {
    Error {
        ename: String,
        evalue: String,
        #[serde(default)]
        traceback: Vec<String>,
    },
    Success {
        data: IndexMap<String, String>,
    },
}

impl ReplyEnvelope {
    /// Wrap a host function's return value
    pub fn success(value: &Value) -> Result<Self> {
        let json = serde_json::to_string(value)?;
        let mut data = IndexMap::new();
        data.insert(TEXT_PLAIN.to_owned(), format!("'{json}'"));
        Ok(Self::Success { data })
    }

    pub fn error(ename: impl Into<String>, evalue: impl Into<String>) -> Self {
        Self::Error {
            ename: ename.into(),
            evalue: evalue.into(),
            traceback: Vec::new(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Strip the quoting around the textual payload and JSON-decode it, the
    /// same way the embedded callback adapter does
    pub fn payload(&self) -> Result<Value> {
        match self {
            Self::Error { ename, evalue, .. } => {
                Err(WidgetError::Codec(format!("reply is an error: {ename}: {evalue}")))
            }
            Self::Success { data } => {
                let text = data
                    .get(TEXT_PLAIN)
                    .ok_or_else(|| WidgetError::Codec(format!("reply has no `{TEXT_PLAIN}`")))?;
                let inner = text
                    .get(1..text.len().saturating_sub(1))
                    .filter(|_| text.len() >= 2)
                    .ok_or_else(|| WidgetError::Codec(format!("reply `{text}` is not quoted")))?;
                Ok(serde_json::from_str(inner)?)
            }
        }
    }
}


/// Generators for arbitrary boundary values and call shapes
#[cfg(test)]
pub(crate) mod strategies {
    use indexmap::IndexMap;
    use proptest::prelude::*;
    use serde_json::Value;

    use super::{CallArgument, DecodedCall};

    /// Text mixing arbitrary printable characters with the quoting hazards
    fn text() -> impl Strategy<Value = String> {
        prop_oneof!["\\PC{0,12}", "['\\\\</>\"a é✓]{0,8}"]
    }

    /// Any JSON value without non-finite numbers
    pub(crate) fn json_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            // Short decimals parse back to the same double
            (any::<i32>(), 0..4i32).prop_map(|(m, e)| Value::from(f64::from(m) / 10f64.powi(e))),
            text().prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::vec((text(), inner), 0..4)
                    .prop_map(|entries| Value::Object(entries.into_iter().collect())),
            ]
        })
    }

    #[derive(Debug, Clone)]
    enum KeywordShape {
        Single(Value),
        Spread(Vec<Value>),
    }

    /// Positional shapes followed by keyword shapes, as a call site allows,
    /// with the call the receiver should rebuild from them
    pub(crate) fn call_arguments() -> impl Strategy<Value = (Vec<CallArgument>, DecodedCall)> {
        let positional = prop::collection::vec(
            prop_oneof![
                json_value().prop_map(CallArgument::Positional),
                prop::collection::vec(json_value(), 0..3).prop_map(CallArgument::Starred),
            ],
            0..4,
        );
        let keywords = prop::collection::vec(
            prop_oneof![
                json_value().prop_map(KeywordShape::Single),
                prop::collection::vec(json_value(), 0..3).prop_map(KeywordShape::Spread),
            ],
            0..4,
        );
        (positional, keywords).prop_map(|(mut arguments, keywords)| {
            let mut expected = DecodedCall::default();
            for argument in &arguments {
                match argument {
                    CallArgument::Positional(value) => expected.positional.push(value.clone()),
                    CallArgument::Starred(values) => {
                        expected.positional.extend(values.iter().cloned());
                    }
                    _ => {}
                }
            }
            for (i, shape) in keywords.into_iter().enumerate() {
                match shape {
                    KeywordShape::Single(value) => {
                        let name = format!("k{i}");
                        expected.keywords.insert(name.clone(), value.clone());
                        arguments.push(CallArgument::Keyword(name, value));
                    }
                    KeywordShape::Spread(values) => {
                        let entries: IndexMap<String, Value> = values
                            .into_iter()
                            .enumerate()
                            .map(|(j, value)| (format!("k{i}_{j}"), value))
                            .collect();
                        expected.keywords.extend(entries.clone());
                        arguments.push(CallArgument::StarredKeyword(entries));
                    }
                }
            }
            (arguments, expected)
        })
    }
}
