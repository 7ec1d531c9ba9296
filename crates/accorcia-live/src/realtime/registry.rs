//! Topic registry: desired set, active handles, consumer sinks.
//!
//! Owned by the multiplexer actor; never shared.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::mpsc;

use super::state::MultiplexerStats;
use crate::transport::SubscriptionHandle;

pub(crate) type Sink = mpsc::UnboundedSender<Value>;

struct TopicEntry {
    consumers: usize,
    sinks: Vec<Sink>,
    active: Option<SubscriptionHandle>,
}

/// Outcome of releasing one consumer reference.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Release {
    /// Topic was not registered.
    Unknown,
    /// Other consumers still hold the topic.
    Retained(usize),
    /// Last consumer left; the entry is gone. Carries its live handle, if any.
    Removed(Option<SubscriptionHandle>),
}

/// Outcome of routing one inbound message.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Delivery {
    Delivered(usize),
    /// Topic unknown or the frame came from a handle that is no longer current.
    Stale,
}

#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    topics: HashMap<String, TopicEntry>,
}

impl SubscriptionRegistry {
    /// Add a consumer. Returns `true` if the topic is new to the desired set.
    pub fn attach(&mut self, topic: &str, sink: Sink) -> bool {
        if let Some(entry) = self.topics.get_mut(topic) {
            entry.consumers += 1;
            entry.sinks.push(sink);
            return false;
        }
        self.topics.insert(
            topic.to_string(),
            TopicEntry {
                consumers: 1,
                sinks: vec![sink],
                active: None,
            },
        );
        true
    }

    /// Release one consumer reference.
    pub fn release(&mut self, topic: &str) -> Release {
        let Some(entry) = self.topics.get_mut(topic) else {
            return Release::Unknown;
        };
        entry.consumers = entry.consumers.saturating_sub(1);
        if entry.consumers > 0 {
            return Release::Retained(entry.consumers);
        }
        let active = self.topics.remove(topic).and_then(|e| e.active);
        Release::Removed(active)
    }

    /// Drop every entry, ending all streams. Returns the live handles.
    pub fn clear(&mut self) -> Vec<SubscriptionHandle> {
        self.topics.drain().filter_map(|(_, e)| e.active).collect()
    }

    pub fn desired_topics(&self) -> Vec<String> {
        self.topics.keys().cloned().collect()
    }

    pub fn set_active(&mut self, topic: &str, handle: SubscriptionHandle) {
        if let Some(entry) = self.topics.get_mut(topic) {
            entry.active = Some(handle);
        }
    }

    /// Forget every live handle, keeping the desired set. Returns them.
    pub fn deactivate_all(&mut self) -> Vec<SubscriptionHandle> {
        self.topics
            .values_mut()
            .filter_map(|e| e.active.take())
            .collect()
    }

    /// Push `payload` to every consumer of `topic` if `handle` is its current one.
    pub fn deliver(&mut self, handle: &SubscriptionHandle, topic: &str, payload: &Value) -> Delivery {
        let Some(entry) = self.topics.get_mut(topic) else {
            return Delivery::Stale;
        };
        if entry.active.as_ref() != Some(handle) {
            return Delivery::Stale;
        }
        entry.sinks.retain(|sink| sink.send(payload.clone()).is_ok());
        Delivery::Delivered(entry.sinks.len())
    }

    pub fn stats(&self) -> MultiplexerStats {
        MultiplexerStats {
            desired_topics: self.topics.len(),
            active_topics: self.topics.values().filter(|e| e.active.is_some()).count(),
            consumers: self.topics.values().map(|e| e.consumers).sum(),
        }
    }
}
