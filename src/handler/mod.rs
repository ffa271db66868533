//! Handler module - method registration and dispatch.
//!
//! Provides [`MethodRegistry`], which maps method names to handlers behind
//! one erased signature.

mod registry;

pub use registry::{
    BoxFuture, Handler, HandlerOutcome, MethodDescriptor, MethodRegistry, TypedHandler,
};
