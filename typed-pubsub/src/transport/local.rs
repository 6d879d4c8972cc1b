use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use tracing::trace;

use super::{Publish, Receiver};
use crate::{envelope::Envelope, error::TransportError};

type Receivers = Vec<Arc<dyn Receiver>>;

/// In-process bus. A send runs every receiver subscribed to the channel on the
/// sending thread, in subscription order, before returning.
#[derive(Clone, Default)]
pub struct LocalBus {
    channels: Arc<RwLock<HashMap<String, Receivers>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publisher(&self, channel: impl Into<String>) -> LocalPublisher {
        LocalPublisher {
            channel: channel.into(),
            bus: self.clone(),
        }
    }

    pub fn subscribe(&self, channel: impl Into<String>, receiver: Arc<dyn Receiver>) {
        self.channels
            .write()
            .entry(channel.into())
            .or_default()
            .push(receiver);
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels.read().get(channel).map_or(0, Vec::len)
    }

    fn deliver(&self, channel: &str, envelope: Envelope) {
        // Snapshot so receivers may subscribe while being called.
        let receivers = self.channels.read().get(channel).cloned().unwrap_or_default();
        trace!(channel, receivers = receivers.len(), "delivering envelope");

        for receiver in receivers {
            receiver.receive(envelope.clone());
        }
    }
}

#[derive(Clone)]
pub struct LocalPublisher {
    channel: String,
    bus: LocalBus,
}

impl Publish for LocalPublisher {
    fn channel(&self) -> &str {
        &self.channel
    }

    fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        self.bus.deliver(&self.channel, envelope);
        Ok(())
    }
}
