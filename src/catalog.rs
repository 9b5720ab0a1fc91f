//! The object catalog boundary.
//!
//! The protocol engine never interprets payload bytes itself; it resolves a
//! 32-bit object id against a catalog implemented by the caller, and asks the
//! resolved instance to pack or unpack its own data. This module defines that
//! seam: [`ObjectCatalog`] for lookup/creation and [`DataObject`] for the
//! opaque per-object marshalling.

use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CatalogError {
    #[error("unknown object id {0:#010X}")]
    UnknownObject(u32),

    #[error("object {object_id:#010X} has no instance {instance_id}")]
    UnknownInstance { object_id: u32, instance_id: u16 },

    #[error("object {0:#010X} is a metadata-only entry and carries no instance data")]
    NotADataObject(u32),

    #[error("payload does not match the object's byte layout")]
    LayoutMismatch,
}

/// Fixed per-type metadata the engine needs for framing decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectMeta {
    pub object_id: u32,
    /// Fixed serialized size of one instance, in bytes.
    pub num_bytes: usize,
    /// Single-instance objects only ever have instance 0; addressing all
    /// instances of one is normalized to instance 0 on transmit.
    pub single_instance: bool,
}

/// One addressable instance of a catalog object.
///
/// Handles are shared across the receive and transmit paths, so `unpack`
/// takes `&self` and implementations synchronize their own field storage.
pub trait DataObject: Send + Sync {
    /// Serializes the instance into `buf`, returning the number of bytes
    /// written. Writing zero bytes for a non-empty layout is a pack failure.
    fn pack(&self, buf: &mut [u8]) -> Result<usize, CatalogError>;

    /// Replaces the instance's data from a received payload.
    fn unpack(&self, data: &[u8]) -> Result<(), CatalogError>;
}

/// Keyed store mapping object ids to metadata and instances.
///
/// The engine only ever consults this trait; how objects are registered and
/// stored is the caller's business.
pub trait ObjectCatalog {
    /// Resolves an object id to its metadata. `None` means the id is unknown
    /// and any frame addressing it is discarded.
    fn lookup(&self, object_id: u32) -> Option<ObjectMeta>;

    /// Resolves one numbered instance.
    fn lookup_instance(&self, object_id: u32, instance_id: u16) -> Option<Arc<dyn DataObject>>;

    /// Creates (and registers) a missing instance so a received update can be
    /// unpacked into it. Fails with [`CatalogError::NotADataObject`] when the
    /// entry is metadata-only and cannot hold instance data.
    fn create_instance(
        &self,
        object_id: u32,
        instance_id: u16,
    ) -> Result<Arc<dyn DataObject>, CatalogError>;

    /// Number of registered instances, used to fan out an all-instances send.
    fn num_instances(&self, object_id: u32) -> u16;
}

impl<C: ObjectCatalog + ?Sized> ObjectCatalog for &C {
    fn lookup(&self, object_id: u32) -> Option<ObjectMeta> {
        (**self).lookup(object_id)
    }

    fn lookup_instance(&self, object_id: u32, instance_id: u16) -> Option<Arc<dyn DataObject>> {
        (**self).lookup_instance(object_id, instance_id)
    }

    fn create_instance(
        &self,
        object_id: u32,
        instance_id: u16,
    ) -> Result<Arc<dyn DataObject>, CatalogError> {
        (**self).create_instance(object_id, instance_id)
    }

    fn num_instances(&self, object_id: u32) -> u16 {
        (**self).num_instances(object_id)
    }
}

impl<C: ObjectCatalog + ?Sized> ObjectCatalog for Arc<C> {
    fn lookup(&self, object_id: u32) -> Option<ObjectMeta> {
        (**self).lookup(object_id)
    }

    fn lookup_instance(&self, object_id: u32, instance_id: u16) -> Option<Arc<dyn DataObject>> {
        (**self).lookup_instance(object_id, instance_id)
    }

    fn create_instance(
        &self,
        object_id: u32,
        instance_id: u16,
    ) -> Result<Arc<dyn DataObject>, CatalogError> {
        (**self).create_instance(object_id, instance_id)
    }

    fn num_instances(&self, object_id: u32) -> u16 {
        (**self).num_instances(object_id)
    }
}
