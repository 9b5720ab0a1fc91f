//! Transaction bookkeeping for acked sends and object requests.
//!
//! Sending an ObjectRequest or ObjectAck frame records an expectation of a
//! specific reply type for a specific `(object id, instance id)` key. The
//! table here is plain data; the engine wraps it in one mutex so lookup,
//! open and close are atomic with respect to each other, and delivers
//! listener notifications strictly outside that lock.

use std::collections::HashMap;

use crate::frame::{FrameType, ALL_INSTANCES};

/// One outstanding expectation of a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    /// Reply type that completes this transaction: `Object` for a sent
    /// ObjectRequest, `Ack` for a sent ObjectAck.
    pub resp_type: FrameType,
    pub object_id: u32,
    /// Instance key as sent, which may be [`ALL_INSTANCES`].
    pub instance_id: u16,
}

/// Pending transactions keyed by `(object id, instance id)`.
#[derive(Debug, Default)]
pub struct TransactionTable {
    pending: HashMap<(u32, u16), Transaction>,
}

impl TransactionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finds the pending transaction for a key. A reply addressed to a
    /// concrete instance also matches an in-flight all-instances transaction
    /// for the same object.
    pub fn find(&self, object_id: u32, instance_id: u16) -> Option<Transaction> {
        self.pending
            .get(&(object_id, instance_id))
            .or_else(|| self.pending.get(&(object_id, ALL_INSTANCES)))
            .copied()
    }

    /// Opens a transaction expecting the reply that matches `sent_type`.
    /// Opening a second transaction for the same key silently replaces the
    /// first: last write wins.
    pub fn open(&mut self, sent_type: FrameType, object_id: u32, instance_id: u16) {
        let resp_type = if sent_type == FrameType::ObjectRequest {
            FrameType::Object
        } else {
            FrameType::Ack
        };
        self.pending.insert(
            (object_id, instance_id),
            Transaction {
                resp_type,
                object_id,
                instance_id,
            },
        );
    }

    /// Removes a transaction by its exact key, returning it if one existed.
    pub fn close(&mut self, object_id: u32, instance_id: u16) -> Option<Transaction> {
        self.pending.remove(&(object_id, instance_id))
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Receives completion notifications for transactions.
///
/// `transaction_succeeded` fires when a matching reply closes the
/// transaction. Note that a Nack also resolves the transaction through the
/// success path, exactly like the reference implementation: the caller tells
/// the outcomes apart by the frame it received, not by which callback ran.
/// `transaction_failed` fires only for explicit cancellation.
pub trait TransactionListener: Send + Sync {
    fn transaction_succeeded(&self, object_id: u32, instance_id: u16);
    fn transaction_failed(&self, object_id: u32, instance_id: u16);
}

impl<L: TransactionListener + ?Sized> TransactionListener for std::sync::Arc<L> {
    fn transaction_succeeded(&self, object_id: u32, instance_id: u16) {
        (**self).transaction_succeeded(object_id, instance_id)
    }

    fn transaction_failed(&self, object_id: u32, instance_id: u16) {
        (**self).transaction_failed(object_id, instance_id)
    }
}
