//! One live context: its source units, host functions and injection markup
//!
//! A [`Context`] collects units the way decorators would register them, and
//! owns a [`ContextId`] from which every name it exposes is derived.

use std::{cell::RefCell, rc::Rc, sync::Arc};

use log::debug;
use serde_json::Value;

use crate::{
    codec::{ArgumentCodec, Base64Codec},
    compiler::{CompiledScript, ContextCompiler},
    error::{Result, WidgetError},
    host::{HostBridge, HostFunction},
    injector::{AnonymousInjector, ContextDescriptor, ContextInjector, PrecompiledContext},
    names::{ContextId, unique_context_variable_name, unique_handle_name, unique_py_function_name},
    source::{FlatUnit, FunctionUnit, RawUnit, SourceUnit},
};

/// Host-side handle on a function exported by the embedded side
#[derive(Clone)]
pub struct JsFunction {
    name: String,
    context_variable: String,
    host: Rc<dyn HostBridge>,
    codec: &'static dyn ArgumentCodec,
}

impl std::fmt::Debug for JsFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsFunction")
            .field("name", &self.name)
            .field("context_variable", &self.context_variable)
            .finish_non_exhaustive()
    }
}

impl JsFunction {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Script calling the exported function with encoded `args`
    pub fn call_script(&self, args: &[Value]) -> Result<String> {
        let args = args
            .iter()
            .map(|arg| self.codec.encode_literal(arg))
            .collect::<Result<Vec<_>>>()?;
        Ok(format!(
            "{}.{}({});",
            self.context_variable,
            self.name,
            args.join(",")
        ))
    }

    /// Call the exported function; results are not sent back
    pub fn call(&self, args: &[Value]) -> Result<()> {
        let script = self.call_script(args)?;
        self.host.execute_script(&script)
    }
}

pub struct Context {
    id: ContextId,
    data: Value,
    host: Rc<dyn HostBridge>,
    codec: &'static dyn ArgumentCodec,
    units: Vec<SourceUnit>,
    initializers: Vec<FunctionUnit>,
    py_functions: Vec<String>,
    precompiled: Option<Rc<RefCell<PrecompiledContext>>>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("data", &self.data)
            .field("codec", &self.codec.name())
            .field("units", &self.units.len())
            .field("py_functions", &self.py_functions)
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Create a context; `host` is where wrapper functions and scripts go
    pub fn new(host: Option<Rc<dyn HostBridge>>, data: Value) -> Result<Self> {
        let host = host.ok_or(WidgetError::MissingHostContext)?;
        let id = ContextId::generate();
        debug!("Created context {id}");
        Ok(Self {
            id,
            data,
            host,
            codec: &Base64Codec,
            units: Vec::new(),
            initializers: Vec::new(),
            py_functions: Vec::new(),
            precompiled: None,
        })
    }

    /// Encode arguments with `codec`; it must match the compiler's
    #[must_use]
    pub fn with_codec(mut self, codec: &'static dyn ArgumentCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Reuse a factory shared with other contexts instead of compiling one
    #[must_use]
    pub fn with_precompiled(mut self, precompiled: Rc<RefCell<PrecompiledContext>>) -> Self {
        self.precompiled = Some(precompiled);
        self
    }

    pub fn id(&self) -> &ContextId {
        &self.id
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn units(&self) -> &[SourceUnit] {
        &self.units
    }

    /// Unique names of the registered host functions
    pub fn py_function_names(&self) -> &[String] {
        &self.py_functions
    }

    /// Register an embedded function
    pub fn js(&mut self, source: &str) -> Result<JsFunction> {
        let unit = FunctionUnit::new(source)?;
        let function = self.js_by_name(unit.name());
        self.units.push(unit.into());
        Ok(function)
    }

    /// Register an embedded function that also runs once when the context starts
    pub fn js_init(&mut self, source: &str) -> Result<JsFunction> {
        let unit = FunctionUnit::new(source)?;
        let function = self.js_by_name(unit.name());
        self.initializers.push(unit.clone());
        self.units.push(unit.into());
        Ok(function)
    }

    /// Register a parameterless function whose body is lifted to top level
    pub fn js_flat(&mut self, source: &str) -> Result<()> {
        self.units.push(FlatUnit::new(source)?.into());
        Ok(())
    }

    /// Insert JavaScript verbatim; marker calls inside it are not rewritten
    pub fn js_raw(&mut self, code: &str) {
        self.units.push(RawUnit::new(code).into());
    }

    /// Handle on an exported function defined by any unit, e.g. raw code
    pub fn js_by_name(&self, name: &str) -> JsFunction {
        JsFunction {
            name: name.to_owned(),
            context_variable: unique_context_variable_name(&self.id),
            host: Rc::clone(&self.host),
            codec: self.codec,
        }
    }

    /// Make `function` callable from embedded code as `pycall(name(...))`
    ///
    /// Returns the unique name the wrapper is registered under.
    pub fn py(&mut self, name: &str, function: HostFunction) -> String {
        let unique_name = unique_py_function_name(name, &self.id);
        self.host.register(&unique_name, function);
        self.py_functions.push(unique_name.clone());
        unique_name
    }

    fn compile_script(
        &self,
        compiler: &ContextCompiler,
        minify: bool,
    ) -> Result<Arc<CompiledScript>> {
        if compiler.codec().name() != self.codec.name() {
            return Err(WidgetError::Config(format!(
                "context encodes with `{}` but the compiler uses `{}`",
                self.codec.name(),
                compiler.codec().name()
            )));
        }
        compiler.compile_with_initializers(&self.units, &self.initializers, minify)
    }

    /// Compile into a factory other contexts can share
    pub fn compile(&self, compiler: &ContextCompiler, minify: bool) -> Result<PrecompiledContext> {
        Ok(PrecompiledContext::new(self.compile_script(compiler, minify)?))
    }

    /// Markup activating this context: a hidden handle element plus the
    /// injection script
    pub fn html(&self, compiler: &ContextCompiler) -> Result<String> {
        let descriptor = ContextDescriptor::new(self.id.clone(), self.data.clone());
        let script = match &self.precompiled {
            Some(precompiled) => {
                let mut precompiled = precompiled.borrow_mut();
                if !precompiled.is_injected() {
                    precompiled.inject(Rc::clone(&self.host))?;
                }
                precompiled.inject_script(&descriptor, &self.py_functions)?
            }
            None => AnonymousInjector::new(self.compile_script(compiler, true)?)
                .inject_script(&descriptor, &self.py_functions)?,
        };
        Ok(format!(
            "<div id=\"{}\" style=\"display: none;\"></div>\n<script>{script}</script>",
            unique_handle_name(&self.id)
        ))
    }
}
