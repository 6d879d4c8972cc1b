//! Structured objects: application types that can be turned into payload bytes
//! and rebuilt from them.
//!
//! Every `serde` type gets [`StructuredObject`] for free, with JSON as the
//! payload encoding. Decoded objects travel as `Box<dyn StructuredObject>` and
//! are recovered with [`downcast_ref`](trait.StructuredObject.html#method.downcast_ref)
//! or [`downcast`](trait.StructuredObject.html#method.downcast).

use std::{
    any::{self, Any},
    fmt,
};

use serde::{Serialize, de::DeserializeOwned};

pub trait StructuredObject: Any + fmt::Debug + Send + Sync {
    fn to_bytes(&self) -> serde_json::Result<Vec<u8>>;

    /// Replaces the contents of `self` with the object encoded in `bytes`.
    /// On error `self` is left as it was.
    fn merge_from_bytes(&mut self, bytes: &[u8]) -> serde_json::Result<()>;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<T> StructuredObject for T
where
    T: Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static,
{
    fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    fn merge_from_bytes(&mut self, bytes: &[u8]) -> serde_json::Result<()> {
        *self = serde_json::from_slice(bytes)?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

impl dyn StructuredObject {
    pub fn is<T: Any>(&self) -> bool {
        self.as_any().is::<T>()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast<T: Any>(self: Box<Self>) -> Option<Box<T>> {
        self.into_any().downcast::<T>().ok()
    }
}

/// Last path segment of `T`'s type name with generic arguments removed,
/// e.g. `ChatMsg` for `my_app::chat::ChatMsg`.
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
