use tracing::trace;

use crate::{
    envelope::{Envelope, TYPE_META_KEY},
    error::{Error, Result},
    object::{StructuredObject, short_type_name},
    transport::Publish,
};

/// Serializes `object` into a new envelope tagged with `tag`.
pub fn encode<T>(tag: &str, object: &T) -> Result<Envelope>
where
    T: StructuredObject + ?Sized,
{
    let mut envelope = Envelope::default();
    encode_into(&mut envelope, tag, object)?;
    Ok(envelope)
}

/// Serializes `object` into `envelope`, replacing its payload and type tag and
/// keeping all other metadata. The envelope is untouched if serialization
/// fails.
pub fn encode_into<T>(envelope: &mut Envelope, tag: &str, object: &T) -> Result<()>
where
    T: StructuredObject + ?Sized,
{
    if tag.is_empty() {
        return Err(Error::EmptyTag);
    }

    let payload = object.to_bytes().map_err(|source| Error::Serialize {
        tag: tag.to_string(),
        source,
    })?;
    envelope.set_payload(payload);
    envelope.put_meta(TYPE_META_KEY, tag);
    Ok(())
}

/// Publishes structured objects over any [`Publish`] transport.
pub struct TypedPublisher<P> {
    inner: P,
}

impl<P: Publish> TypedPublisher<P> {
    pub fn new(inner: P) -> Self {
        Self { inner }
    }

    pub fn channel(&self) -> &str {
        self.inner.channel()
    }

    /// Nothing reaches the transport unless `object` serializes.
    pub fn send_object<T>(&self, tag: &str, object: &T) -> Result<()>
    where
        T: StructuredObject + ?Sized,
    {
        let envelope = encode(tag, object)?;
        self.send_envelope(envelope)
    }

    /// Like [`send_object`](Self::send_object), but keeps the metadata already
    /// present on `envelope` (a correlation id, for example).
    pub fn send_object_in<T>(&self, mut envelope: Envelope, tag: &str, object: &T) -> Result<()>
    where
        T: StructuredObject + ?Sized,
    {
        encode_into(&mut envelope, tag, object)?;
        self.send_envelope(envelope)
    }

    /// Sends `object` tagged with its short type name.
    pub fn send<T: StructuredObject>(&self, object: &T) -> Result<()> {
        self.send_object(short_type_name::<T>(), object)
    }

    pub fn send_envelope(&self, envelope: Envelope) -> Result<()> {
        trace!(
            channel = self.channel(),
            tag = envelope.type_tag().unwrap_or_default(),
            bytes = envelope.payload().len(),
            "sending envelope"
        );
        self.inner.send(envelope)?;
        Ok(())
    }
}
