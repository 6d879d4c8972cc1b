//! Typed publish/subscribe on top of a raw envelope transport.
//!
//! A publisher serializes a structured object, stores a type tag under the
//! reserved metadata key [`envelope::TYPE_META_KEY`], and hands the envelope
//! to the transport. A subscriber reads the tag back, looks up the decoder
//! registered for it, rebuilds the object and passes it to the application
//! together with the envelope.
//!
//! - [`envelope`] is the payload plus metadata unit moved by transports.
//! - [`object`] defines [`StructuredObject`], implemented for all `serde` types.
//! - [`registry`] maps type tags to object factories.
//! - [`publisher`] encodes objects and sends them.
//! - [`subscriber`] decodes and dispatches inbound envelopes.
//! - [`transport`] is the seam to the messaging runtime, with an in-process
//!   bus and a TCP relay.
//! - [`wire`], [`cli`] and [`chat`] back the relay and the demo binary.

pub mod chat;
pub mod cli;
pub mod envelope;
pub mod error;
pub mod object;
pub mod publisher;
pub mod registry;
pub mod subscriber;
pub mod transport;
pub mod wire;

pub use envelope::{Envelope, TYPE_META_KEY};
pub use error::{Error, Result, TransportError};
pub use object::StructuredObject;
pub use publisher::{TypedPublisher, encode, encode_into};
pub use registry::{ObjectFactory, TypeRegistry};
pub use subscriber::{DispatchCounts, TypedHandler, TypedSubscriber};
