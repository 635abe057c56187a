use std::collections::{HashMap, VecDeque};

use crate::communication::protocol::{MessageId, Op, OutboundMessage};

pub const DEFAULT_SENT_CAPACITY: usize = 100;

/// What we remember about a message we sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentRecord {
    pub op: Op,
    pub key: String,
}

/// Assigns message ids and remembers the most recent ones we sent.
///
/// The memory is FIFO-bounded by send order: once an id falls out, frames
/// carrying it are treated as external.
#[derive(Debug)]
pub struct MessageCorrelator {
    next_id: MessageId,
    capacity: usize,
    order: VecDeque<MessageId>,
    sent: HashMap<MessageId, SentRecord>,
}

impl Default for MessageCorrelator {
    fn default() -> Self {
        Self::new(DEFAULT_SENT_CAPACITY)
    }
}

impl MessageCorrelator {
    pub fn new(capacity: usize) -> Self {
        Self {
            next_id: 1,
            capacity: capacity.max(1),
            order: VecDeque::with_capacity(capacity),
            sent: HashMap::with_capacity(capacity),
        }
    }

    /// Builds an outbound message carrying a fresh id. Ids are never reused.
    pub fn tag(
        &mut self,
        op: Op,
        key: impl Into<String>,
        value: impl Into<String>,
        timestamp: u64,
    ) -> OutboundMessage {
        let message_id = self.next_id;
        self.next_id += 1;
        OutboundMessage {
            op,
            key: key.into(),
            value: value.into(),
            timestamp,
            message_id,
        }
    }

    /// Remember a message once it has been handed to the channel.
    pub fn record_sent(&mut self, msg: &OutboundMessage) {
        if self.sent.contains_key(&msg.message_id) {
            return;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.sent.remove(&oldest);
            }
        }
        self.order.push_back(msg.message_id);
        self.sent.insert(
            msg.message_id,
            SentRecord {
                op: msg.op,
                key: msg.key.clone(),
            },
        );
    }

    pub fn is_self_originated(&self, id: MessageId) -> bool {
        self.sent.contains_key(&id)
    }

    pub fn lookup(&self, id: MessageId) -> Option<&SentRecord> {
        self.sent.get(&id)
    }

    pub fn has_sent(&self) -> bool {
        !self.order.is_empty()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
