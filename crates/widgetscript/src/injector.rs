//! Binding compiled factories into the embedded environment
//!
//! An injection script calls a factory with `(contextId, data,
//! hostFunctionNames)` and binds the returned export table to the context
//! variable. [`AnonymousInjector`] inlines the factory text every time;
//! [`PrecompiledContext`] binds the factory once to a shared global and each
//! injection only calls that global.

use std::{fs, path::Path, rc::Rc, sync::Arc};

use log::{debug, warn};
use serde_json::Value;

use crate::{
    compiler::CompiledScript,
    error::{Result, WidgetError},
    host::HostBridge,
    names::{ContextId, precompiled_generator_name, unique_context_variable_name},
};

/// What a factory is called with, apart from the host function names
#[derive(Debug, Clone, PartialEq)]
pub struct ContextDescriptor {
    pub id: ContextId,
    pub data: Value,
}

impl ContextDescriptor {
    pub fn new(id: ContextId, data: Value) -> Self {
        Self { id, data }
    }
}

pub trait ContextInjector {
    /// Script binding a fresh export table to the context variable of `descriptor`
    fn inject_script(
        &self,
        descriptor: &ContextDescriptor,
        host_function_names: &[String],
    ) -> Result<String>;
}

/// Factory call arguments
///
/// Scripts end up inside `<script>` elements, so `</` in JSON text is escaped.
fn factory_arguments(
    descriptor: &ContextDescriptor,
    host_function_names: &[String],
) -> Result<String> {
    let id = serde_json::to_string(descriptor.id.as_str())?;
    let data = serde_json::to_string(&descriptor.data)?;
    let names = serde_json::to_string(host_function_names)?;
    Ok([id, data, names].join(",").replace("</", "<\\/"))
}

/// Inlines the factory text into every injection
#[derive(Debug, Clone)]
pub struct AnonymousInjector {
    script: Arc<CompiledScript>,
}

impl AnonymousInjector {
    pub fn new(script: Arc<CompiledScript>) -> Self {
        Self { script }
    }
}

impl ContextInjector for AnonymousInjector {
    fn inject_script(
        &self,
        descriptor: &ContextDescriptor,
        host_function_names: &[String],
    ) -> Result<String> {
        Ok(format!(
            "window.{} = ({})({});",
            unique_context_variable_name(&descriptor.id),
            self.script,
            factory_arguments(descriptor, host_function_names)?
        ))
    }
}

/// A compiled factory shared by many contexts through one global binding
///
/// Created, then injected at most once. Dropping an injected instance asks
/// the host to clear the global; failing to do so is only logged.
pub struct PrecompiledContext {
    script: Arc<CompiledScript>,
    id: ContextId,
    generator_name: String,
    host: Option<Rc<dyn HostBridge>>,
}

impl std::fmt::Debug for PrecompiledContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrecompiledContext")
            .field("id", &self.id)
            .field("generator_name", &self.generator_name)
            .field("injected", &self.is_injected())
            .finish_non_exhaustive()
    }
}

impl PrecompiledContext {
    pub fn new(script: Arc<CompiledScript>) -> Self {
        let id = ContextId::generate();
        let generator_name = precompiled_generator_name(&id);
        Self {
            script,
            id,
            generator_name,
            host: None,
        }
    }

    /// Restore a context saved with [`PrecompiledContext::save`]
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading precompiled context from {}", path.display());
        let text = fs::read_to_string(path)?;
        Ok(Self::new(Arc::new(CompiledScript::new(text))))
    }

    /// Write the factory text verbatim
    pub fn save(&self, path: &Path) -> Result<()> {
        debug!("Saving precompiled context to {}", path.display());
        fs::write(path, self.script.text())?;
        Ok(())
    }

    pub fn script(&self) -> &Arc<CompiledScript> {
        &self.script
    }

    pub fn id(&self) -> &ContextId {
        &self.id
    }

    /// Global the factory is bound to once injected
    pub fn generator_name(&self) -> &str {
        &self.generator_name
    }

    pub fn is_injected(&self) -> bool {
        self.host.is_some()
    }

    /// Script binding the factory to [`PrecompiledContext::generator_name`]
    pub fn definition_script(&self) -> String {
        format!("window.{} = {};", self.generator_name, self.script)
    }

    /// Bind the factory to its global through `host`
    pub fn inject(&mut self, host: Rc<dyn HostBridge>) -> Result<()> {
        if self.is_injected() {
            return Err(WidgetError::AlreadyInjected {
                id: self.id.to_string(),
            });
        }
        host.execute_script(&self.definition_script())?;
        debug!("Injected precompiled context {}", self.id);
        self.host = Some(host);
        Ok(())
    }
}

impl ContextInjector for PrecompiledContext {
    fn inject_script(
        &self,
        descriptor: &ContextDescriptor,
        host_function_names: &[String],
    ) -> Result<String> {
        Ok(format!(
            "window.{} = window.{}({});",
            unique_context_variable_name(&descriptor.id),
            self.generator_name,
            factory_arguments(descriptor, host_function_names)?
        ))
    }
}

impl Drop for PrecompiledContext {
    fn drop(&mut self) {
        let Some(host) = self.host.take() else {
            return;
        };
        let release = format!("window.{} = undefined;", self.generator_name);
        if let Err(e) = host.execute_script(&release) {
            warn!("Failed to release precompiled context {}: {e}", self.id);
        }
    }
}
