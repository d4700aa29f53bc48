//! Ordered console log with broadcast + history.

use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock},
};

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{LogEntry, LogLevel};

/// Default history size limit (entries).
pub const DEFAULT_HISTORY_LIMIT: usize = 10_000;

const CHANNEL_CAPACITY: usize = 1024;

/// Change notification published by a [`LogStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum LogUpdate {
    Appended(LogEntry),
    Cleared,
}

struct Inner {
    history: VecDeque<LogEntry>,
    limit: usize,
}

/// Append-only console log, newest entry last.
///
/// Late subscribers get the retained history followed by live updates.
pub struct LogStore {
    inner: RwLock<Inner>,
    sender: broadcast::Sender<LogUpdate>,
}

impl Default for LogStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LogStore {
    /// Create a log store with the default history limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_HISTORY_LIMIT)
    }

    /// Create a log store retaining at most `limit` entries.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: RwLock::new(Inner {
                history: VecDeque::with_capacity(64),
                limit: limit.max(1),
            }),
            sender,
        }
    }

    /// Create an entry and append it.
    pub fn append(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        node_id: Option<String>,
    ) -> LogEntry {
        let entry = LogEntry::new(level, message, node_id);
        self.push(entry.clone());
        entry
    }

    /// Append an existing entry to both history and live listeners.
    pub fn push(&self, entry: LogEntry) {
        {
            let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            while inner.history.len() >= inner.limit {
                inner.history.pop_front();
            }
            inner.history.push_back(entry.clone());
        }
        let _ = self.sender.send(LogUpdate::Appended(entry));
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .clear();
        let _ = self.sender.send(LogUpdate::Cleared);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all retained entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<LogEntry> {
        self.filtered(|_| true)
    }

    /// Entries attached to one node.
    #[must_use]
    pub fn entries_for_node(&self, node_id: &str) -> Vec<LogEntry> {
        self.filtered(|e| e.node_id.as_deref() == Some(node_id))
    }

    /// Entries of one level.
    #[must_use]
    pub fn entries_at_level(&self, level: LogLevel) -> Vec<LogEntry> {
        self.filtered(|e| e.level == level)
    }

    fn filtered(&self, keep: impl Fn(&LogEntry) -> bool) -> Vec<LogEntry> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .iter()
            .filter(|e| keep(e))
            .cloned()
            .collect()
    }

    /// Get a receiver for live updates.
    #[must_use]
    pub fn get_receiver(&self) -> broadcast::Receiver<LogUpdate> {
        self.sender.subscribe()
    }

    /// Stream that yields history first, then live updates.
    ///
    /// Lagged live updates are skipped.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, LogUpdate> {
        let (history, rx) = {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            let history: Vec<LogEntry> = inner.history.iter().cloned().collect();
            (history, self.sender.subscribe())
        };

        let hist = futures::stream::iter(history.into_iter().map(LogUpdate::Appended));
        let live = BroadcastStream::new(rx).filter_map(|res| async move { res.ok() });

        Box::pin(hist.chain(live))
    }

    /// Stream of entries for a single node (history, then live).
    #[must_use]
    pub fn node_stream(&self, node_id: String) -> futures::stream::BoxStream<'static, LogEntry> {
        self.history_plus_stream()
            .filter_map(move |update| {
                let entry = match update {
                    LogUpdate::Appended(entry)
                        if entry.node_id.as_deref() == Some(node_id.as_str()) =>
                    {
                        Some(entry)
                    }
                    _ => None,
                };
                futures::future::ready(entry)
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_keeps_order_newest_last() {
        let store = LogStore::new();
        store.append(LogLevel::Info, "first", None);
        store.append(LogLevel::Warn, "second", None);

        let messages: Vec<_> = store.entries().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["first", "second"]);
    }

    #[test]
    fn test_history_limit_evicts_oldest() {
        let store = LogStore::with_limit(2);
        store.append(LogLevel::Info, "a", None);
        store.append(LogLevel::Info, "b", None);
        store.append(LogLevel::Info, "c", None);

        let messages: Vec<_> = store.entries().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["b", "c"]);
    }

    #[test]
    fn test_filters() {
        let store = LogStore::new();
        store.append(LogLevel::Info, "a", Some("n1".into()));
        store.append(LogLevel::Error, "b", Some("n2".into()));
        store.append(LogLevel::Error, "c", Some("n1".into()));

        assert_eq!(store.entries_for_node("n1").len(), 2);
        assert_eq!(store.entries_at_level(LogLevel::Error).len(), 2);
        assert!(store.entries_for_node("n3").is_empty());
    }

    #[test]
    fn test_clear_empties_and_notifies() {
        let store = LogStore::new();
        let mut rx = store.get_receiver();
        store.append(LogLevel::Info, "a", None);
        store.clear();

        assert!(store.is_empty());
        assert!(matches!(rx.try_recv(), Ok(LogUpdate::Appended(_))));
        assert_eq!(rx.try_recv().ok(), Some(LogUpdate::Cleared));
    }

    #[tokio::test]
    async fn test_history_plus_stream_replays_then_follows() {
        let store = LogStore::new();
        store.append(LogLevel::Info, "old", None);

        let mut stream = store.history_plus_stream();
        store.append(LogLevel::Info, "new", None);

        let first = stream.next().await;
        let second = stream.next().await;
        assert!(matches!(first, Some(LogUpdate::Appended(e)) if e.message == "old"));
        assert!(matches!(second, Some(LogUpdate::Appended(e)) if e.message == "new"));
    }

    #[tokio::test]
    async fn test_node_stream_filters_by_node() {
        let store = LogStore::new();
        store.append(LogLevel::Info, "other", Some("b".into()));
        store.append(LogLevel::Output, "mine", Some("a".into()));

        let mut stream = store.node_stream("a".into());
        let entry = stream.next().await.unwrap();
        assert_eq!(entry.message, "mine");
    }
}
