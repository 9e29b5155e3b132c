//! Handler registration tables.
//!
//! Four independent tables (`methods`, `tools`, `signal_handlers`,
//! `stream_handlers`), each behind its own lock, the way the pending
//! table and stream sequence counters in the rest of this codebase are
//! each given their own lock rather than one big one.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::context::{RequestContext, SignalContext, ToolContext};
use crate::envelope::Signal;
use crate::error::{RegistryError, RuntimeError};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

type MethodFn = Arc<dyn Fn(RequestContext) -> BoxFuture<'static, Result<String, RuntimeError>> + Send + Sync>;
type ToolFn = Arc<dyn Fn(ToolContext) -> BoxFuture<'static, Result<String, RuntimeError>> + Send + Sync>;
type SignalFn = Arc<dyn Fn(SignalContext) -> BoxFuture<'static, ()> + Send + Sync>;
type StreamFn = Arc<dyn Fn(SignalContext) -> BoxFuture<'static, ()> + Send + Sync>;

struct MethodEntry {
    streaming: bool,
    handler: MethodFn,
}

/// Handler tables shared between the dispatcher, the stream layer, and
/// whatever registers handlers on startup.
#[derive(Default)]
pub struct HandlerRegistry {
    methods: Mutex<HashMap<String, MethodEntry>>,
    tools: Mutex<HashMap<u32, ToolFn>>,
    signal_handlers: Mutex<HashMap<Signal, Vec<SignalFn>>>,
    stream_handlers: Mutex<HashMap<u32, StreamFn>>,
}

impl HandlerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a `Custom` method handler. `streaming` must match the
    /// `RequestInfo` variant the host will send, or the request is
    /// rejected before the handler ever runs.
    ///
    /// Method names are unique: registering over an existing name is
    /// rejected rather than silently replacing the old handler.
    pub fn register_method<F, Fut>(
        &self,
        name: impl Into<String>,
        streaming: bool,
        handler: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, RuntimeError>> + Send + 'static,
    {
        let name = name.into();
        let mut methods = self.methods.lock();
        if methods.contains_key(&name) {
            return Err(RegistryError::MethodAlreadyRegistered(name));
        }
        let entry = MethodEntry {
            streaming,
            handler: Arc::new(move |ctx| Box::pin(handler(ctx))),
        };
        methods.insert(name, entry);
        Ok(())
    }

    pub fn unregister_method(&self, name: &str) {
        self.methods.lock().remove(name);
    }

    pub(crate) fn lookup_method(&self, name: &str) -> Option<(bool, MethodFn)> {
        self.methods
            .lock()
            .get(name)
            .map(|entry| (entry.streaming, entry.handler.clone()))
    }

    /// Registers a tool invocation handler under `tool_id`. Tool ids are
    /// unique: registering over an existing id is rejected rather than
    /// silently replacing the old handler.
    pub fn register_tool<F, Fut>(&self, tool_id: u32, handler: F) -> Result<(), RegistryError>
    where
        F: Fn(ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, RuntimeError>> + Send + 'static,
    {
        let mut tools = self.tools.lock();
        if tools.contains_key(&tool_id) {
            return Err(RegistryError::ToolAlreadyRegistered(tool_id));
        }
        tools.insert(tool_id, Arc::new(move |ctx| Box::pin(handler(ctx))));
        Ok(())
    }

    pub fn unregister_tool(&self, tool_id: u32) {
        self.tools.lock().remove(&tool_id);
    }

    pub(crate) fn lookup_tool(&self, tool_id: u32) -> Option<ToolFn> {
        self.tools.lock().get(&tool_id).cloned()
    }

    /// Registers a signal handler. Handlers for the same signal run in
    /// registration order.
    pub fn register_signal_handler<F, Fut>(&self, signal: Signal, handler: F)
    where
        F: Fn(SignalContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.signal_handlers
            .lock()
            .entry(signal)
            .or_default()
            .push(Arc::new(move |ctx| Box::pin(handler(ctx))));
    }

    pub(crate) fn signal_handlers(&self, signal: Signal) -> Vec<SignalFn> {
        self.signal_handlers
            .lock()
            .get(&signal)
            .cloned()
            .unwrap_or_default()
    }

    /// Registers a handler for stream events arriving on `stream_id`,
    /// overwriting whatever was registered there before.
    pub fn register_stream_handler<F, Fut>(&self, stream_id: u32, handler: F)
    where
        F: Fn(SignalContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.stream_handlers
            .lock()
            .insert(stream_id, Arc::new(move |ctx| Box::pin(handler(ctx))));
    }

    pub fn unregister_stream_handler(&self, stream_id: u32) {
        self.stream_handlers.lock().remove(&stream_id);
    }

    pub(crate) fn lookup_stream_handler(&self, stream_id: u32) -> Option<StreamFn> {
        self.stream_handlers.lock().get(&stream_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;

    #[test]
    fn duplicate_method_name_is_rejected() {
        let registry = HandlerRegistry::new();
        registry
            .register_method("echo", false, |ctx| async move { Ok(ctx.params) })
            .unwrap();

        let err = registry
            .register_method("echo", false, |ctx| async move { Ok(ctx.params) })
            .unwrap_err();
        assert_eq!(err, RegistryError::MethodAlreadyRegistered("echo".to_string()));
    }

    #[test]
    fn duplicate_tool_id_is_rejected() {
        let registry = HandlerRegistry::new();
        registry
            .register_tool(42, |_ctx| async move { Ok(String::new()) })
            .unwrap();

        let err = registry
            .register_tool(42, |_ctx| async move { Ok(String::new()) })
            .unwrap_err();
        assert_eq!(err, RegistryError::ToolAlreadyRegistered(42));
    }

    #[test]
    fn unregistering_a_method_allows_re_registration() {
        let registry = HandlerRegistry::new();
        registry
            .register_method("echo", false, |ctx| async move { Ok(ctx.params) })
            .unwrap();
        registry.unregister_method("echo");

        registry
            .register_method("echo", false, |ctx| async move { Ok(ctx.params) })
            .unwrap();
    }
}
