//! Routing of inbound messages to subscriber sinks.

use parking_lot::Mutex;
use std::collections::HashMap;
use thingshadow_protocol::{topic_matches, Shadow};
use tokio::sync::mpsc;

/// Sending half of a subscriber's message channel.
pub type MessageSink = mpsc::UnboundedSender<Shadow>;

/// Identifies one sink attached to a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(u64);

impl SinkId {
    /// Returns the raw id.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Default)]
struct RouterState {
    next_id: u64,
    routes: HashMap<String, Vec<(SinkId, MessageSink)>>,
}

/// Maps topic filters to the sinks that receive matching messages.
///
/// Dispatch never blocks: sinks are unbounded, and a sink whose receiver has
/// been dropped is pruned on the next message it would have received.
#[derive(Debug, Default)]
pub struct SubscriptionRouter {
    state: Mutex<RouterState>,
}

impl SubscriptionRouter {
    /// Creates an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a sink to a filter.
    ///
    /// Returns the sink id and whether this is the first sink on the filter.
    pub fn attach(&self, filter: &str, sink: MessageSink) -> (SinkId, bool) {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = SinkId(state.next_id);

        let sinks = state.routes.entry(filter.to_string()).or_default();
        let first = sinks.is_empty();
        sinks.push((id, sink));
        (id, first)
    }

    /// Detaches one sink. Returns true if this emptied the filter.
    ///
    /// A filter whose sinks were all pruned by dispatch is also reported
    /// as emptied, so the caller still releases it upstream.
    pub fn detach(&self, filter: &str, id: SinkId) -> bool {
        let mut state = self.state.lock();
        let Some(sinks) = state.routes.get_mut(filter) else {
            return false;
        };

        sinks.retain(|(sink_id, _)| *sink_id != id);
        if sinks.is_empty() {
            state.routes.remove(filter);
            true
        } else {
            false
        }
    }

    /// Detaches every sink on a filter. Returns how many were removed.
    pub fn detach_all(&self, filter: &str) -> usize {
        self.state
            .lock()
            .routes
            .remove(filter)
            .map(|sinks| sinks.len())
            .unwrap_or(0)
    }

    /// Delivers a message to every sink whose filter matches the topic.
    ///
    /// Returns the number of sinks that received it.
    pub fn dispatch(&self, topic: &str, payload: &Shadow) -> usize {
        let mut state = self.state.lock();
        let mut delivered = 0;

        for (filter, sinks) in state.routes.iter_mut() {
            if !topic_matches(filter, topic) {
                continue;
            }
            sinks.retain(|(_, sink)| match sink.send(payload.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => false,
            });
        }

        // Filters stay registered with the broker until released, even if
        // every receiver has gone away.
        delivered
    }

    /// Returns every filter that has at least one sink attached.
    pub fn filters(&self) -> Vec<String> {
        self.state
            .lock()
            .routes
            .iter()
            .filter(|(_, sinks)| !sinks.is_empty())
            .map(|(filter, _)| filter.clone())
            .collect()
    }

    /// Returns the number of sinks attached to a filter.
    pub fn sink_count(&self, filter: &str) -> usize {
        self.state
            .lock()
            .routes
            .get(filter)
            .map(|sinks| sinks.len())
            .unwrap_or(0)
    }

    /// Returns the total number of attached sinks.
    pub fn total_sinks(&self) -> usize {
        self.state.lock().routes.values().map(Vec::len).sum()
    }

    /// Drops every sink, closing their channels.
    pub fn clear(&self) {
        self.state.lock().routes.clear();
    }
}
