// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Listener registry for inbound messages.
//!
//! Every decoded message is handed to every registered listener in receipt
//! order. Listeners filter on `id`/`method` themselves. A listener that
//! returns an error is logged and skipped; the others still run.
//!
//! Listeners report failure through `Err`. A panic is only contained when
//! the build unwinds; release builds abort on panic.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, warn};

use super::protocol::Message;

/// Receives every inbound message from the read loop.
///
/// Called on the read loop's task; implementations should only take short
/// locks and never block on the UI thread.
pub trait MessageListener: Send + Sync {
    /// Handles one message.
    ///
    /// # Errors
    ///
    /// Errors are logged by the dispatcher and do not reach other listeners.
    fn on_message(&self, message: &Message) -> anyhow::Result<()>;
}

impl<F> MessageListener for F
where
    F: Fn(&Message) -> anyhow::Result<()> + Send + Sync,
{
    fn on_message(&self, message: &Message) -> anyhow::Result<()> {
        self(message)
    }
}

/// Handle returned by registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Shared, ordered set of listeners.
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    next_id: Arc<AtomicU64>,
    listeners: Arc<Mutex<Vec<(ListenerId, Arc<dyn MessageListener>)>>>,
}

impl ListenerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a listener; it sees every message dispatched from now on.
    pub fn register(&self, listener: Arc<dyn MessageListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    /// Removes a listener. Returns `false` if it was not registered.
    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hands `message` to every listener, isolating each failed invocation.
    pub fn dispatch(&self, message: &Message) {
        // Snapshot so a listener may (un)register without deadlocking.
        let snapshot: Vec<Arc<dyn MessageListener>> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        for listener in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener.on_message(message))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    "Listener failed on {}: {:#}",
                    message.method().unwrap_or("response"),
                    e
                ),
                Err(_) => error!(
                    "Listener panicked on {}",
                    message.method().unwrap_or("response")
                ),
            }
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::panic,
    reason = "Tests use unwrap/panic for clear failure messages"
)]
mod tests {
    use super::*;
    use crate::lsp::protocol::NotificationMessage;
    use anyhow::anyhow;

    fn notification(method: &str) -> Message {
        Message::Notification(NotificationMessage {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params: serde_json::Value::Null,
        })
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> Arc<dyn MessageListener> {
        let log = log.clone();
        Arc::new(move |message: &Message| -> anyhow::Result<()> {
            log.lock()
                .unwrap()
                .push(format!("{name}:{}", message.method().unwrap_or("-")));
            Ok(())
        })
    }

    #[test]
    fn test_dispatch_reaches_every_listener_in_order() {
        let registry = ListenerRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.register(recorder(&log, "a"));
        registry.register(recorder(&log, "b"));

        registry.dispatch(&notification("one"));
        registry.dispatch(&notification("two"));

        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:one", "b:one", "a:two", "b:two"]
        );
    }

    #[test]
    fn test_failing_listener_does_not_block_others() {
        let registry = ListenerRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.register(Arc::new(|_: &Message| -> anyhow::Result<()> {
            Err(anyhow!("bad state"))
        }));
        registry.register(Arc::new(|_: &Message| -> anyhow::Result<()> {
            panic!("listener bug")
        }));
        registry.register(recorder(&log, "ok"));

        registry.dispatch(&notification("textDocument/publishDiagnostics"));

        assert_eq!(
            *log.lock().unwrap(),
            vec!["ok:textDocument/publishDiagnostics"]
        );
    }

    #[test]
    fn test_unregister() {
        let registry = ListenerRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let id = registry.register(recorder(&log, "a"));
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert!(registry.is_empty());

        registry.dispatch(&notification("x"));
        assert!(log.lock().unwrap().is_empty());
    }
}
