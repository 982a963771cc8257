//! Bounded FIFO of validated inbound messages.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde_json::Value;
use synapse_types::{Result, SynapseError};

use crate::message::Message;

/// Capacity settings for a [`MessageQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

/// Only well-formed messages are ever stored; validation happens in
/// [`MessageQueue::push_raw`] before the lock is taken.
#[derive(Debug)]
pub struct MessageQueue {
    inner: Mutex<VecDeque<Message>>,
    capacity: usize,
}

impl MessageQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            capacity: config.capacity.max(1),
        }
    }

    /// Validate `raw` and append it to the back of the queue.
    pub fn push_raw(&self, raw: Value) -> Result<()> {
        let message = Message::from_value(raw)?;
        self.push(message)
    }

    /// Append an already-typed message after re-checking it.
    pub fn push(&self, message: Message) -> Result<()> {
        message.check()?;
        let mut queue = self.lock()?;
        if queue.len() >= self.capacity {
            return Err(SynapseError::QueueFull {
                capacity: self.capacity,
            });
        }
        queue.push_back(message);
        Ok(())
    }

    pub fn pop(&self) -> Option<Message> {
        self.lock().ok()?.pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        if let Ok(mut q) = self.lock() {
            q.clear();
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, VecDeque<Message>>> {
        self.inner
            .lock()
            .map_err(|_| SynapseError::Other("message queue lock poisoned".into()))
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageType, CANVAS_AGENT};
    use serde_json::json;

    fn status(n: u32) -> Value {
        json!({
            "id": format!("msg_{n}"),
            "agent": "execution-engine",
            "version": "1.0",
            "timestamp": "2024-05-01T10:00:00Z",
            "type": "status",
            "payload": { "status": "running", "message": format!("step {n}") }
        })
    }

    #[test]
    fn fifo_order() {
        let q = MessageQueue::default();
        for n in 0..3 {
            q.push_raw(status(n)).unwrap();
        }
        let ids: Vec<String> = std::iter::from_fn(|| q.pop()).map(|m| m.id).collect();
        assert_eq!(ids, vec!["msg_0", "msg_1", "msg_2"]);
        assert!(q.is_empty());
    }

    #[test]
    fn malformed_message_never_enters() {
        let q = MessageQueue::default();
        q.push_raw(status(1)).unwrap();

        let mut bad = status(2);
        bad.as_object_mut().unwrap().remove("payload");
        let err = q.push_raw(bad).unwrap_err();

        assert!(matches!(err, SynapseError::MalformedMessage(_)));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn full_queue_rejects() {
        let q = MessageQueue::new(QueueConfig { capacity: 2 });
        q.push_raw(status(1)).unwrap();
        q.push_raw(status(2)).unwrap();
        let err = q.push_raw(status(3)).unwrap_err();
        assert!(matches!(err, SynapseError::QueueFull { capacity: 2 }));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn typed_push_is_rechecked() {
        let q = MessageQueue::default();
        let mut msg = Message::new(MessageType::Heartbeat, CANVAS_AGENT, json!({}));
        msg.agent.clear();
        assert!(q.push(msg).is_err());
        assert!(q.is_empty());
    }
}
