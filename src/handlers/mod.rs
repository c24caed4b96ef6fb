// src/handlers/mod.rs

pub mod configuration;
pub mod encrypt;
pub mod ping;

pub use configuration::ConfigurationHandler;
pub use encrypt::{CipherMode, EncryptHandler};
pub use ping::PingHandler;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::events::{
    dispatcher,
    model::{LogEvent, LogLevel, SystemEvent},
};
use crate::node::Node;
use crate::package::Package;

/// A pluggable consumer in a node's processing chain.
///
/// Handlers are offered each package in chain order. Returning `true`
/// means the package is fully handled and must not be offered to later
/// handlers; `false` passes it on. Handlers get the node so they can
/// send packages onward or inspect the node's configuration.
pub trait Handler: Send + Sync {
    fn consume(&self, package: &mut Package, node: &Node) -> bool;
}

/// Ordered list of handlers with short-circuit dispatch.
///
/// Dispatch iterates over a snapshot of the list, so a handler may
/// re-enter the chain (see [`HandlerChain::dispatch_after`]) without
/// holding any lock. A panic escaping a handler is contained here: it
/// is logged with the offending package id and the remaining handlers
/// are skipped for that package only.
pub struct HandlerChain {
    handlers: RwLock<Vec<Arc<dyn Handler>>>,
}

impl Default for HandlerChain {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerChain {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    pub fn push(&self, handler: Arc<dyn Handler>) {
        self.handlers.write().push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<dyn Handler>> {
        self.handlers.read().clone()
    }

    /// Offer the package to each handler in order until one consumes it
    /// or the list is exhausted.
    pub fn dispatch(&self, package: &mut Package, node: &Node) {
        for handler in self.snapshot() {
            if Self::consume_contained(&handler, package, node) {
                break;
            }
        }
    }

    /// Offer the package to the handlers *after* `current` only. Used
    /// by handlers that generate a stream of packages and want them
    /// processed downstream without re-entering the handlers before
    /// them.
    pub fn dispatch_after(&self, current: &dyn Handler, package: &mut Package, node: &Node) {
        let snapshot = self.snapshot();
        let current_ptr = current as *const dyn Handler as *const ();
        let Some(position) = snapshot
            .iter()
            .position(|handler| Arc::as_ptr(handler) as *const () == current_ptr)
        else {
            return;
        };
        for handler in &snapshot[position + 1..] {
            if Self::consume_contained(handler, package, node) {
                break;
            }
        }
    }

    /// Run one `consume` call with panics contained. Returns true when
    /// the chain must stop for this package: the handler consumed it,
    /// or it panicked and the remaining handlers are skipped.
    fn consume_contained(handler: &Arc<dyn Handler>, package: &mut Package, node: &Node) -> bool {
        match catch_unwind(AssertUnwindSafe(|| handler.consume(package, node))) {
            Ok(consumed) => consumed,
            Err(_) => {
                let mut meta = dispatcher::meta("handlers", LogLevel::Error);
                meta.corr_id = Some(dispatcher::correlation_id());
                dispatcher::emit(LogEvent::System(SystemEvent {
                    meta,
                    action: "handler_panicked".into(),
                    detail: Some(format!("package={}", package.id())),
                }));
                true
            }
        }
    }
}
