//! Fire-and-forget status channel.
//!
//! Status messages are short human-readable progress lines ("Resolving User
//! ID for 'Priya'...") surfaced to the end user while a request runs. They
//! are not logs: delivery is best effort and a reporter must never fail the
//! operation that emits them.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Receives progress messages.
pub trait StatusReporter: Send + Sync {
    /// Deliver one message. Must not block or fail.
    fn report(&self, message: String);
}

/// Discards every message.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl StatusReporter for NoopReporter {
    fn report(&self, _message: String) {}
}

/// Keeps messages in order, optionally forwarding them to another reporter.
#[derive(Default)]
pub struct CollectingReporter {
    messages: Mutex<Vec<String>>,
    forward: Option<Arc<dyn StatusReporter>>,
}

impl CollectingReporter {
    /// Collector that forwards nowhere.
    pub fn new() -> Self {
        Self::default()
    }

    /// Collector that also forwards each message to `inner`.
    pub fn forwarding(inner: Arc<dyn StatusReporter>) -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            forward: Some(inner),
        }
    }

    /// Messages received so far.
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    /// Take the collected messages, leaving the collector empty.
    pub fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.messages.lock())
    }
}

impl fmt::Debug for CollectingReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectingReporter")
            .field("messages", &self.messages.lock().len())
            .field("forwarding", &self.forward.is_some())
            .finish()
    }
}

impl StatusReporter for CollectingReporter {
    fn report(&self, message: String) {
        if let Some(inner) = &self.forward {
            inner.report(message.clone());
        }
        self.messages.lock().push(message);
    }
}

/// Sends messages down an unbounded tokio channel.
///
/// A closed receiver is ignored.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    sender: UnboundedSender<String>,
}

impl ChannelReporter {
    /// Wrap a sender.
    pub fn new(sender: UnboundedSender<String>) -> Self {
        Self { sender }
    }
}

impl StatusReporter for ChannelReporter {
    fn report(&self, message: String) {
        let _ = self.sender.send(message);
    }
}

/// Adapts a callback into a reporter.
#[derive(Clone)]
pub struct FnReporter {
    callback: Arc<dyn Fn(String) + Send + Sync>,
}

impl FnReporter {
    /// Wrap a callback.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
        }
    }
}

impl fmt::Debug for FnReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnReporter").finish_non_exhaustive()
    }
}

impl StatusReporter for FnReporter {
    fn report(&self, message: String) {
        (self.callback)(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_collecting_keeps_order() {
        let reporter = CollectingReporter::new();
        reporter.report("one".to_string());
        reporter.report("two".to_string());
        assert_eq!(reporter.messages(), vec!["one", "two"]);
        assert_eq!(reporter.drain().len(), 2);
        assert!(reporter.messages().is_empty());
    }

    #[test]
    fn test_collecting_forwards() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let inner = Arc::new(FnReporter::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let reporter = CollectingReporter::forwarding(inner);
        reporter.report("hello".to_string());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(reporter.messages(), vec!["hello"]);
    }

    #[tokio::test]
    async fn test_channel_reporter_ignores_closed_receiver() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let reporter = ChannelReporter::new(tx);
        reporter.report("first".to_string());
        assert_eq!(rx.recv().await.as_deref(), Some("first"));
        drop(rx);
        reporter.report("lost".to_string());
    }
}
