//! Transport-agnostic console output

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

const DEFAULT_BACKLOG: usize = 1000;

/// Concatenated response stream shared by the compile stream and every uploader.
///
/// Lines are broadcast to live subscribers and kept in a bounded backlog for
/// late readers.
#[derive(Debug, Clone)]
pub struct ResponseStream {
    tx: broadcast::Sender<String>,
    backlog: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl ResponseStream {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self {
            tx,
            backlog: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Publish text; it is split into lines
    pub fn publish(&self, text: &str) {
        for line in text.lines() {
            self.push_line(line.to_string());
        }
    }

    fn push_line(&self, line: String) {
        if let Ok(mut backlog) = self.backlog.lock() {
            if backlog.len() == self.capacity {
                backlog.pop_front();
            }
            backlog.push_back(line.clone());
        }
        let _ = self.tx.send(line);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    pub fn lines(&self) -> Vec<String> {
        self.backlog
            .lock()
            .map(|backlog| backlog.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut backlog) = self.backlog.lock() {
            backlog.clear();
        }
    }
}

impl Default for ResponseStream {
    fn default() -> Self {
        Self::new(DEFAULT_BACKLOG)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backlog_is_bounded() {
        let console = ResponseStream::new(2);
        console.publish("a\nb\nc");
        assert_eq!(console.lines(), vec!["b".to_string(), "c".to_string()]);
        console.clear();
        assert!(console.lines().is_empty());
    }

    #[tokio::test]
    async fn test_subscribers_receive_lines() {
        let console = ResponseStream::default();
        let mut rx = console.subscribe();
        console.publish("Uploading...");
        assert_eq!(rx.recv().await.unwrap(), "Uploading...");
    }
}
