//! The seam between the typed adapter and the messaging runtime underneath.
//!
//! A transport only has to move [`Envelope`]s: [`Publish`] hands one to the
//! runtime, and the runtime calls a [`Receiver`] once per inbound envelope.
//! Two transports live in this crate:
//!
//! - [`local`] delivers synchronously inside one process.
//! - [`relay`] forwards envelopes through a TCP broker.

use crate::{envelope::Envelope, error::TransportError};

pub mod local;
pub mod relay;

pub trait Publish: Send + Sync {
    fn channel(&self) -> &str;

    /// Hands the envelope to the runtime without waiting for delivery.
    fn send(&self, envelope: Envelope) -> Result<(), TransportError>;
}

pub trait Receiver: Send + Sync + 'static {
    fn receive(&self, envelope: Envelope);
}

impl<F> Receiver for F
where
    F: Fn(Envelope) + Send + Sync + 'static,
{
    fn receive(&self, envelope: Envelope) {
        self(envelope)
    }
}
