//! Receiving side: turns inbound envelopes back into structured objects and
//! hands them to the application.
//!
//! [`TypedSubscriber`] owns a [`TypeRegistry`] and a [`DispatchingReceiver`].
//! The receiver is what gets attached to a transport; for every envelope it
//!
//! 1. reads the type tag, dropping untagged envelopes,
//! 2. resolves the tag, dropping tags nobody registered,
//! 3. builds an empty object and parses the payload into it, logging and
//!    dropping envelopes that fail to parse,
//! 4. calls [`TypedHandler::receive_object`] with the object and the envelope.
//!
//! Nothing escapes the receiver, so one bad producer cannot stall delivery of
//! later envelopes.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use tracing::{error, trace, warn};

use crate::{
    envelope::Envelope,
    error::{Error, Result},
    object::{StructuredObject, short_type_name},
    registry::{ObjectFactory, TypeRegistry},
    transport::Receiver,
};

pub trait TypedHandler: Send + Sync + 'static {
    fn receive_object(&self, object: Box<dyn StructuredObject>, envelope: &Envelope);
}

impl<F> TypedHandler for F
where
    F: Fn(Box<dyn StructuredObject>, &Envelope) + Send + Sync + 'static,
{
    fn receive_object(&self, object: Box<dyn StructuredObject>, envelope: &Envelope) {
        self(object, envelope)
    }
}

#[derive(Debug, Default)]
pub struct DispatchStats {
    dispatched: AtomicU64,
    untagged: AtomicU64,
    unknown_tag: AtomicU64,
    malformed: AtomicU64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchCounts {
        DispatchCounts {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            untagged: self.untagged.load(Ordering::Relaxed),
            unknown_tag: self.unknown_tag.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchCounts {
    pub dispatched: u64,
    pub untagged: u64,
    pub unknown_tag: u64,
    pub malformed: u64,
}

enum Decoded {
    Untagged,
    UnknownTag,
    Object(Box<dyn StructuredObject>),
}

/// Wraps a [`TypedHandler`] so it can sit behind a raw [`Receiver`].
pub struct DispatchingReceiver {
    channel: String,
    registry: Arc<TypeRegistry>,
    handler: Arc<dyn TypedHandler>,
    stats: DispatchStats,
}

impl DispatchingReceiver {
    pub fn new(
        channel: impl Into<String>,
        registry: Arc<TypeRegistry>,
        handler: Arc<dyn TypedHandler>,
    ) -> Self {
        Self {
            channel: channel.into(),
            registry,
            handler,
            stats: DispatchStats::default(),
        }
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    fn decode(&self, envelope: &Envelope) -> Result<Decoded> {
        let Some(tag) = envelope.type_tag() else {
            return Ok(Decoded::Untagged);
        };
        let Some(factory) = self.registry.resolve(tag) else {
            return Ok(Decoded::UnknownTag);
        };

        let mut object = factory();
        object
            .merge_from_bytes(envelope.payload())
            .map_err(|source| Error::Parse {
                tag: tag.to_string(),
                len: envelope.payload().len(),
                source,
            })?;
        Ok(Decoded::Object(object))
    }

    fn dispatch(&self, envelope: Envelope) {
        match self.decode(&envelope) {
            Ok(Decoded::Object(object)) => {
                DispatchStats::bump(&self.stats.dispatched);
                self.handler.receive_object(object, &envelope);
            }
            Ok(Decoded::Untagged) => {
                DispatchStats::bump(&self.stats.untagged);
                trace!(channel = %self.channel, "ignoring untagged envelope");
            }
            Ok(Decoded::UnknownTag) => {
                DispatchStats::bump(&self.stats.unknown_tag);
                warn!(
                    channel = %self.channel,
                    tag = envelope.type_tag().unwrap_or_default(),
                    "received type with no registered decoder"
                );
            }
            Err(err) => {
                DispatchStats::bump(&self.stats.malformed);
                error!(channel = %self.channel, error = ?err, "dropping undecodable envelope");
            }
        }
    }
}

impl Receiver for DispatchingReceiver {
    fn receive(&self, envelope: Envelope) {
        self.dispatch(envelope);
    }
}

/// A subscriber that decodes tagged envelopes into structured objects.
///
/// Attach [`receiver`](Self::receiver) to a transport for the same channel.
pub struct TypedSubscriber {
    channel: String,
    registry: Arc<TypeRegistry>,
    receiver: Arc<DispatchingReceiver>,
}

impl TypedSubscriber {
    pub fn new<H: TypedHandler>(channel: impl Into<String>, handler: H) -> Self {
        let channel = channel.into();
        let registry = Arc::new(TypeRegistry::new());
        let receiver = Arc::new(DispatchingReceiver::new(
            channel.clone(),
            Arc::clone(&registry),
            Arc::new(handler),
        ));

        Self {
            channel,
            registry,
            receiver,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn receiver(&self) -> Arc<dyn Receiver> {
        self.receiver.clone()
    }

    pub fn register_type(&self, tag: impl Into<String>, factory: ObjectFactory) -> Result<()> {
        self.registry.register(tag, factory)
    }

    pub fn register_as<T>(&self, tag: impl Into<String>) -> Result<()>
    where
        T: StructuredObject + Default,
    {
        self.registry.register_default::<T>(tag)
    }

    /// Registers `T` under its short type name, matching
    /// [`TypedPublisher::send`](crate::publisher::TypedPublisher::send).
    pub fn register<T>(&self) -> Result<()>
    where
        T: StructuredObject + Default,
    {
        self.register_as::<T>(short_type_name::<T>())
    }

    pub fn type_of<'a>(&self, envelope: &'a Envelope) -> Option<&'a str> {
        envelope.type_tag()
    }

    /// Decodes without dispatching. Untagged envelopes and unknown tags yield
    /// `Ok(None)`.
    pub fn decode(&self, envelope: &Envelope) -> Result<Option<Box<dyn StructuredObject>>> {
        match self.receiver.decode(envelope)? {
            Decoded::Object(object) => Ok(Some(object)),
            Decoded::Untagged | Decoded::UnknownTag => Ok(None),
        }
    }

    /// Runs the dispatch path for one envelope, as a transport would.
    pub fn receive(&self, envelope: Envelope) {
        self.receiver.dispatch(envelope);
    }

    pub fn stats(&self) -> DispatchCounts {
        self.receiver.stats().snapshot()
    }
}
