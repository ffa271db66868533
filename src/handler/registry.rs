//! Method registry for dispatching requests by name.
//!
//! Handlers are async functions taking the decoded arguments and returning
//! `Result<R, E>`. Each one is stored behind the object-safe [`Handler`]
//! trait so the server can dispatch any method through one signature.
//!
//! # Example
//!
//! ```
//! use textwire_rpc::handler::MethodRegistry;
//!
//! let mut registry = MethodRegistry::new();
//! registry
//!     .register("double", |n: i64| async move { Ok::<_, String>(n * 2) })
//!     .unwrap();
//!
//! assert!(registry.contains("double"));
//! assert!(registry.register("double", |n: i64| async move { Ok::<_, String>(n) }).is_err());
//! ```

use std::collections::HashMap;
use std::fmt::{self, Display};
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec;
use crate::error::{RpcError, Result};
use crate::protocol::{encode_payload, Payload};

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of a handler run: the encoded reply payload, or the error text.
pub type HandlerOutcome = std::result::Result<String, String>;

/// Trait for erased handler functions.
pub trait Handler: Send + Sync + 'static {
    /// Decode the argument payload and return the future running the call.
    fn prepare(&self, payload: &[u8]) -> Result<BoxFuture<'static, HandlerOutcome>>;
}

/// Wrapper that decodes the payload before calling the handler.
pub struct TypedHandler<F, A, R, E, Fut> {
    handler: F,
    _phantom: PhantomData<fn(A) -> (Fut, R, E)>,
}

impl<F, A, R, E, Fut> TypedHandler<F, A, R, E, Fut>
where
    F: Fn(A) -> Fut + Send + Sync + 'static,
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    E: Display + Send + 'static,
    Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
{
    /// Create a new typed handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, A, R, E, Fut> Handler for TypedHandler<F, A, R, E, Fut>
where
    F: Fn(A) -> Fut + Send + Sync + 'static,
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    E: Display + Send + 'static,
    Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
{
    fn prepare(&self, payload: &[u8]) -> Result<BoxFuture<'static, HandlerOutcome>> {
        let args = codec::decode_slice::<Payload<A>>(payload)?.into_inner();
        let fut = (self.handler)(args);

        Ok(Box::pin(async move {
            match fut.await {
                Ok(reply) => encode_payload(&reply).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            }
        }))
    }
}

/// Registry record for one method.
pub struct MethodDescriptor {
    name: String,
    args_shape: &'static str,
    reply_shape: &'static str,
    handler: Box<dyn Handler>,
}

impl MethodDescriptor {
    /// Registered name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type name of the argument.
    pub fn args_shape(&self) -> &'static str {
        self.args_shape
    }

    /// Type name of the reply.
    pub fn reply_shape(&self) -> &'static str {
        self.reply_shape
    }

    /// Decode `payload` as this method's arguments and bind them to the
    /// handler.
    ///
    /// # Errors
    ///
    /// [`RpcError::Decode`] if the payload does not decode into the argument
    /// type. The handler is not run in that case.
    pub fn prepare(&self, payload: &[u8]) -> Result<BoxFuture<'static, HandlerOutcome>> {
        self.handler.prepare(payload)
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("name", &self.name)
            .field("args_shape", &self.args_shape)
            .field("reply_shape", &self.reply_shape)
            .finish()
    }
}

/// Registry mapping method names to handlers.
#[derive(Debug, Default)]
pub struct MethodRegistry {
    methods: HashMap<String, MethodDescriptor>,
}

impl MethodRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method handler.
    ///
    /// # Errors
    ///
    /// [`RpcError::Registration`] for an empty name, a name containing `"`,
    /// or a name already registered. The registry is unchanged on error.
    pub fn register<F, A, R, E, Fut>(&mut self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        E: Display + Send + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    {
        if name.is_empty() {
            return Err(RpcError::Registration("method name is empty".into()));
        }
        if name.contains('"') {
            return Err(RpcError::Registration(format!(
                "method name {name:?} contains a quote"
            )));
        }
        if self.methods.contains_key(name) {
            return Err(RpcError::Registration(format!(
                "method {name:?} is already registered"
            )));
        }

        self.methods.insert(
            name.to_owned(),
            MethodDescriptor {
                name: name.to_owned(),
                args_shape: std::any::type_name::<A>(),
                reply_shape: std::any::type_name::<R>(),
                handler: Box::new(TypedHandler::new(handler)),
            },
        );
        tracing::debug!(method = name, "registered method");
        Ok(())
    }

    /// Get a method by name.
    pub fn get(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.get(name)
    }

    /// Check whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Number of registered methods.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
