//! Deterministic identifier derivation for everything a context owns
//!
//! Every name is a pure function of a role prefix and a [`ContextId`], so two
//! contexts never share a global and two roles never share a name inside one
//! context. The embedded side derives the same names from the same prefixes
//! (see [`crate::builtins`]).

use std::fmt;

use cow_utils::CowUtils;
use uuid::Uuid;

/// Prefix of host-side wrapper functions reachable from boundary call requests
pub const PY_FUNCTION_PREFIX: &str = "__widgetscript_py";
/// Prefix of the global holding a context's export table
pub const CONTEXT_VARIABLE_PREFIX: &str = "__widgetscript_context";
/// Prefix of the hidden DOM element used to detect cell removal
pub const HANDLE_PREFIX: &str = "__widgetscript_handle";
/// Prefix of the global holding a shared precompiled factory
pub const GENERATOR_PREFIX: &str = "__widgetscript_generator";

/// Opaque random token identifying one context instance
///
/// Always a valid bare identifier fragment: only ASCII alphanumerics and `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextId(String);

impl ContextId {
    /// Generate a fresh id from a v4 UUID
    pub fn generate() -> Self {
        let uuid = Uuid::new_v4().to_string();
        Self(uuid.cow_replace('-', "_").into_owned())
    }

    /// Build an id from arbitrary text, replacing every character that can't
    /// appear in an identifier with `_`
    pub fn normalized(raw: &str) -> Self {
        Self(
            raw.chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                .collect(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique name of the host wrapper for `function_name` inside a context
pub fn unique_py_function_name(function_name: &str, context_id: &ContextId) -> String {
    format!("{PY_FUNCTION_PREFIX}_{function_name}_{context_id}")
}

/// Global variable holding the export table of a context
pub fn unique_context_variable_name(context_id: &ContextId) -> String {
    format!("{CONTEXT_VARIABLE_PREFIX}_{context_id}")
}

/// DOM id of the hidden element marking where a context lives
pub fn unique_handle_name(context_id: &ContextId) -> String {
    format!("{HANDLE_PREFIX}_{context_id}")
}

/// Global variable holding a shared precompiled factory
pub fn precompiled_generator_name(context_id: &ContextId) -> String {
    format!("{GENERATOR_PREFIX}_{context_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_identifier(name: &str) -> bool {
        let mut chars = name.chars();
        chars
            .next()
            .is_some_and(|c| c == '_' || c.is_ascii_alphabetic())
            && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
    }

    #[test]
    fn test_generated_ids_are_identifier_fragments() {
        let id = ContextId::generate();
        assert!(!id.as_str().contains('-'));
        assert_eq!(id.as_str().len(), 36);
        assert!(is_identifier(&unique_context_variable_name(&id)));
        assert!(is_identifier(&unique_py_function_name("foo", &id)));
    }

    #[test]
    fn test_generated_ids_differ() {
        assert_ne!(ContextId::generate(), ContextId::generate());
    }

    #[test]
    fn test_normalized_replaces_separators() {
        let id = ContextId::normalized("ab-cd.ef 12");
        assert_eq!(id.as_str(), "ab_cd_ef_12");
    }

    #[test]
    fn test_names_are_deterministic() {
        let id = ContextId::normalized("c1");
        assert_eq!(
            unique_py_function_name("foo", &id),
            unique_py_function_name("foo", &id)
        );
        assert_eq!(unique_py_function_name("foo", &id), "__widgetscript_py_foo_c1");
        assert_eq!(unique_context_variable_name(&id), "__widgetscript_context_c1");
        assert_eq!(unique_handle_name(&id), "__widgetscript_handle_c1");
        assert_eq!(precompiled_generator_name(&id), "__widgetscript_generator_c1");
    }

    #[test]
    fn test_names_differ_across_contexts_and_roles() {
        let first = ContextId::normalized("c1");
        let second = ContextId::normalized("c2");
        assert_ne!(
            unique_py_function_name("foo", &first),
            unique_py_function_name("foo", &second)
        );

        let names = [
            unique_py_function_name("foo", &first),
            unique_context_variable_name(&first),
            unique_handle_name(&first),
            precompiled_generator_name(&first),
        ];
        for (i, a) in names.iter().enumerate() {
            for b in &names[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
