//! The UAVTalk protocol engine.
//!
//! [`Uavtalk`] ties the pieces together: it drives the receive state machine
//! one byte at a time, dispatches validated frames into the object catalog,
//! answers requests and acked updates, tracks outstanding transactions, and
//! serializes outbound objects through the frame codec.
//!
//! Thread model: one dedicated reader drives [`Uavtalk::process_byte`];
//! transmit operations may be called concurrently from other threads. The
//! transaction table sits behind a single mutex covering lookup, open and
//! close atomically, and listener callbacks always run outside that lock.

use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use log::{debug, error, trace, warn};
use thiserror::Error;

use crate::catalog::{CatalogError, ObjectCatalog};
use crate::frame::{
    build_frame, EncodeError, Frame, FrameType, ALL_INSTANCES, MAX_PAYLOAD_LENGTH,
};
use crate::rx::{DiscardReason, FrameOutcome, RxMachine};
use crate::transaction::{TransactionListener, TransactionTable};

/// A transmit-side operation failed. Receive-side problems never surface
/// here; they are counted and the stream self-heals.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("unknown object id {0:#010X}")]
    UnknownObject(u32),

    #[error("all-instances addressing is not valid for {0} frames")]
    AllInstancesNotAllowed(FrameType),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("object {0:#010X} packed no bytes")]
    EmptyPack(u32),

    #[error("writing frame to the transport failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Snapshot of the engine's monotonic I/O counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComStats {
    pub tx_bytes: u32,
    pub tx_object_bytes: u32,
    pub tx_objects: u32,
    pub tx_errors: u32,
    pub rx_bytes: u32,
    pub rx_object_bytes: u32,
    pub rx_objects: u32,
    pub rx_errors: u32,
}

#[derive(Debug, Default)]
struct AtomicStats {
    tx_bytes: AtomicU32,
    tx_object_bytes: AtomicU32,
    tx_objects: AtomicU32,
    tx_errors: AtomicU32,
    rx_bytes: AtomicU32,
    rx_object_bytes: AtomicU32,
    rx_objects: AtomicU32,
    rx_errors: AtomicU32,
}

impl AtomicStats {
    fn snapshot(&self) -> ComStats {
        ComStats {
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            tx_object_bytes: self.tx_object_bytes.load(Ordering::Relaxed),
            tx_objects: self.tx_objects.load(Ordering::Relaxed),
            tx_errors: self.tx_errors.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            rx_object_bytes: self.rx_object_bytes.load(Ordering::Relaxed),
            rx_objects: self.rx_objects.load(Ordering::Relaxed),
            rx_errors: self.rx_errors.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.tx_bytes.store(0, Ordering::Relaxed);
        self.tx_object_bytes.store(0, Ordering::Relaxed);
        self.tx_objects.store(0, Ordering::Relaxed);
        self.tx_errors.store(0, Ordering::Relaxed);
        self.rx_bytes.store(0, Ordering::Relaxed);
        self.rx_object_bytes.store(0, Ordering::Relaxed);
        self.rx_objects.store(0, Ordering::Relaxed);
        self.rx_errors.store(0, Ordering::Relaxed);
    }
}

/// Observer invoked after every successfully unpacked object update.
///
/// Pure observability: replaces the reference implementation's habit of
/// appending every decoded object to a flat file, without coupling dispatch
/// correctness to it.
pub trait ObjectObserver: Send + Sync {
    fn object_updated(&self, object_id: u32, instance_id: u16);
}

impl<O: ObjectObserver + ?Sized> ObjectObserver for std::sync::Arc<O> {
    fn object_updated(&self, object_id: u32, instance_id: u16) {
        (**self).object_updated(object_id, instance_id)
    }
}

/// The UAVTalk protocol engine.
///
/// Generic over the object catalog it resolves ids against and the byte sink
/// frames are written to. Share it across threads through `Arc`; the receive
/// scratch state and the sink carry their own interior locks.
pub struct Uavtalk<C, W> {
    catalog: C,
    sink: Mutex<W>,
    rx: Mutex<RxMachine>,
    transactions: Mutex<TransactionTable>,
    stats: AtomicStats,
    listener: Option<Box<dyn TransactionListener>>,
    observer: Option<Box<dyn ObjectObserver>>,
}

impl<C: ObjectCatalog, W: Write> Uavtalk<C, W> {
    pub fn new(catalog: C, sink: W) -> Self {
        Self {
            catalog,
            sink: Mutex::new(sink),
            rx: Mutex::new(RxMachine::new()),
            transactions: Mutex::new(TransactionTable::new()),
            stats: AtomicStats::default(),
            listener: None,
            observer: None,
        }
    }

    /// Registers the transaction completion listener. Set this up before the
    /// engine is shared with the receive and transmit threads.
    pub fn set_transaction_listener(&mut self, listener: Box<dyn TransactionListener>) {
        self.listener = Some(listener);
    }

    /// Registers the optional object update observer.
    pub fn set_object_observer(&mut self, observer: Box<dyn ObjectObserver>) {
        self.observer = Some(observer);
    }

    pub fn stats(&self) -> ComStats {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Advances the receive state machine by one byte without dispatching.
    ///
    /// Every byte counts toward `rx_bytes`; discards other than plain sync
    /// search noise count toward `rx_errors`.
    pub fn feed_byte(&self, byte: u8) -> FrameOutcome {
        self.stats.rx_bytes.fetch_add(1, Ordering::Relaxed);

        let outcome = lock(&self.rx).feed(byte, &self.catalog);
        if let FrameOutcome::Discarded(reason) = &outcome {
            if !matches!(reason, DiscardReason::SyncSearch) {
                warn!("rx frame discarded: {}", reason);
                self.stats.rx_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
        outcome
    }

    /// Feeds one byte and, once a full frame is assembled, dispatches it:
    /// updates the catalog, answers requests and acked sends, and completes
    /// matching transactions.
    pub fn process_byte(&self, byte: u8) -> FrameOutcome {
        let outcome = self.feed_byte(byte);
        if let FrameOutcome::FramedOk(frame) = &outcome {
            self.stats
                .rx_object_bytes
                .fetch_add(frame.payload.len() as u32, Ordering::Relaxed);
            self.stats.rx_objects.fetch_add(1, Ordering::Relaxed);
            self.dispatch(frame);
        }
        outcome
    }

    /// Sends an object update. `acked` selects ObjectAck and opens a
    /// transaction expecting an Ack once the transmit succeeded.
    pub fn send_object(
        &self,
        object_id: u32,
        instance_id: u16,
        acked: bool,
        all_instances: bool,
    ) -> Result<(), SendError> {
        let instance_id = if all_instances { ALL_INSTANCES } else { instance_id };
        let frame_type = if acked {
            FrameType::ObjectAck
        } else {
            FrameType::Object
        };
        self.object_transaction(frame_type, object_id, instance_id)
    }

    /// Requests an object update from the remote end, opening a transaction
    /// that an incoming Object (or Nack) for the same key will complete.
    pub fn send_request(
        &self,
        object_id: u32,
        instance_id: u16,
        all_instances: bool,
    ) -> Result<(), SendError> {
        let instance_id = if all_instances { ALL_INSTANCES } else { instance_id };
        self.object_transaction(FrameType::ObjectRequest, object_id, instance_id)
    }

    /// Gives up on a pending transaction, typically from a caller-owned
    /// timeout. Returns whether one was pending; if so the failure
    /// notification fires (outside the table lock).
    pub fn cancel_transaction(&self, object_id: u32, instance_id: u16) -> bool {
        let canceled = {
            let mut table = lock(&self.transactions);
            table
                .find(object_id, instance_id)
                .and_then(|trans| table.close(trans.object_id, trans.instance_id))
        };

        match canceled {
            Some(trans) => {
                debug!("canceled transaction for object {:08X}", trans.object_id);
                if let Some(listener) = &self.listener {
                    listener.transaction_failed(trans.object_id, trans.instance_id);
                }
                true
            }
            None => false,
        }
    }

    fn object_transaction(
        &self,
        frame_type: FrameType,
        object_id: u32,
        instance_id: u16,
    ) -> Result<(), SendError> {
        self.transmit_object(frame_type, object_id, instance_id)?;

        // The transaction opens only after the bytes went out; a failed
        // transmit leaves no dangling expectation.
        if frame_type.expected_reply().is_some() {
            lock(&self.transactions).open(frame_type, object_id, instance_id);
        }
        Ok(())
    }

    fn dispatch(&self, frame: &Frame) {
        trace!(
            "received {} for object {:08X} instance {}",
            frame.frame_type,
            frame.object_id,
            frame.instance_id
        );

        let all_instances = frame.is_all_instances();
        let error = match frame.frame_type {
            FrameType::Object => {
                // All-instances addressing is not allowed for Object frames.
                if all_instances {
                    true
                } else {
                    match self.update_object(frame) {
                        Ok(()) => {
                            // Any Object frame can complete a pending request
                            // for this key, even one that was not sent as a
                            // reply.
                            self.complete_transaction(
                                FrameType::Object,
                                frame.object_id,
                                frame.instance_id,
                            );
                            false
                        }
                        Err(e) => {
                            warn!("failed to update object {:08X}: {}", frame.object_id, e);
                            true
                        }
                    }
                }
            }

            FrameType::ObjectAck => {
                if all_instances {
                    true
                } else {
                    match self.update_object(frame) {
                        Ok(()) => self
                            .transmit_single(FrameType::Ack, frame.object_id, frame.instance_id)
                            .is_err(),
                        Err(e) => {
                            warn!("failed to update object {:08X}: {}", frame.object_id, e);
                            true
                        }
                    }
                }
            }

            FrameType::ObjectRequest => {
                match self.transmit_object(FrameType::Object, frame.object_id, frame.instance_id) {
                    Ok(()) => false,
                    Err(e) => {
                        debug!(
                            "cannot serve request for object {:08X} instance {}: {}",
                            frame.object_id, frame.instance_id, e
                        );
                        if let Err(e) =
                            self.transmit_single(FrameType::Nack, frame.object_id, frame.instance_id)
                        {
                            error!("failed to transmit nack: {}", e);
                        }
                        true
                    }
                }
            }

            FrameType::Ack => {
                if all_instances {
                    false
                } else if self
                    .catalog
                    .lookup_instance(frame.object_id, frame.instance_id)
                    .is_some()
                {
                    self.complete_transaction(FrameType::Ack, frame.object_id, frame.instance_id);
                    false
                } else {
                    true
                }
            }

            FrameType::Nack => {
                if all_instances {
                    false
                } else if self
                    .catalog
                    .lookup_instance(frame.object_id, frame.instance_id)
                    .is_some()
                {
                    self.resolve_nack(frame.object_id, frame.instance_id);
                    false
                } else {
                    true
                }
            }
        };

        if error {
            self.stats.rx_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Unpacks a received payload into the target instance, creating it in
    /// the catalog first if this is the first time the instance is seen.
    fn update_object(&self, frame: &Frame) -> Result<(), CatalogError> {
        let handle = match self
            .catalog
            .lookup_instance(frame.object_id, frame.instance_id)
        {
            Some(handle) => handle,
            None => {
                debug!(
                    "creating instance {} of object {:08X}",
                    frame.instance_id, frame.object_id
                );
                self.catalog
                    .create_instance(frame.object_id, frame.instance_id)?
            }
        };
        handle.unpack(&frame.payload)?;

        if let Some(observer) = &self.observer {
            observer.object_updated(frame.object_id, frame.instance_id);
        }
        Ok(())
    }

    /// Completes a pending transaction if `reply` is the type it expects.
    ///
    /// For an all-instances transaction only the ack for instance 0 closes
    /// it: instances are transmitted in descending order, so instance 0
    /// signals that every instance has been delivered.
    fn complete_transaction(&self, reply: FrameType, object_id: u32, instance_id: u16) {
        let closed = {
            let mut table = lock(&self.transactions);
            match table.find(object_id, instance_id) {
                Some(trans) if trans.resp_type == reply => {
                    if trans.instance_id == ALL_INSTANCES && instance_id != 0 {
                        None
                    } else {
                        table.close(trans.object_id, trans.instance_id)
                    }
                }
                _ => None,
            }
        };

        if let Some(trans) = closed {
            debug!("transaction completed for object {:08X}", trans.object_id);
            if let Some(listener) = &self.listener {
                listener.transaction_succeeded(trans.object_id, trans.instance_id);
            }
        }
    }

    /// Resolves a pending transaction with a negative reply. The table
    /// mutation happens under the lock, the notification after releasing it;
    /// holding the lock across the callback could deadlock against a
    /// caller-side timeout canceling the same key from another thread.
    fn resolve_nack(&self, object_id: u32, instance_id: u16) {
        let closed = {
            let mut table = lock(&self.transactions);
            table
                .find(object_id, instance_id)
                .and_then(|trans| table.close(trans.object_id, trans.instance_id))
        };

        if let Some(trans) = closed {
            debug!("transaction nacked for object {:08X}", trans.object_id);
            if let Some(listener) = &self.listener {
                listener.transaction_succeeded(trans.object_id, trans.instance_id);
            }
        }
    }

    /// Transmits an object, fanning out all-instances sends.
    ///
    /// All-instances addressing of a single-instance object is normalized to
    /// instance 0. Broadcasts run in descending instance order ending at 0,
    /// so the receiver can treat "instance 0 seen" as "all instances
    /// delivered". This ordering is a protocol contract. A broadcast stops
    /// at the first instance that fails to transmit.
    fn transmit_object(
        &self,
        frame_type: FrameType,
        object_id: u32,
        mut instance_id: u16,
    ) -> Result<(), SendError> {
        let meta = self
            .catalog
            .lookup(object_id)
            .ok_or(SendError::UnknownObject(object_id))?;

        if instance_id == ALL_INSTANCES && meta.single_instance {
            instance_id = 0;
        }
        let all_instances = instance_id == ALL_INSTANCES;

        trace!(
            "transmitting {} for object {:08X} instance {}",
            frame_type,
            object_id,
            instance_id
        );

        match frame_type {
            FrameType::Object | FrameType::ObjectAck if all_instances => {
                let count = self.catalog.num_instances(object_id);
                for instance in (0..count).rev() {
                    self.transmit_single(frame_type, object_id, instance)?;
                }
                Ok(())
            }
            FrameType::Ack if all_instances => {
                Err(SendError::AllInstancesNotAllowed(FrameType::Ack))
            }
            _ => self.transmit_single(frame_type, object_id, instance_id),
        }
    }

    /// Builds and writes exactly one frame, updating transmit statistics.
    fn transmit_single(
        &self,
        frame_type: FrameType,
        object_id: u32,
        instance_id: u16,
    ) -> Result<(), SendError> {
        match self.try_transmit_single(frame_type, object_id, instance_id) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.stats.tx_errors.fetch_add(1, Ordering::Relaxed);
                error!(
                    "failed transmitting {} for object {:08X} instance {}: {}",
                    frame_type, object_id, instance_id, e
                );
                Err(e)
            }
        }
    }

    fn try_transmit_single(
        &self,
        frame_type: FrameType,
        object_id: u32,
        instance_id: u16,
    ) -> Result<(), SendError> {
        let length = if frame_type.carries_payload() {
            self.catalog
                .lookup(object_id)
                .ok_or(SendError::UnknownObject(object_id))?
                .num_bytes
        } else {
            0
        };

        if length >= MAX_PAYLOAD_LENGTH {
            return Err(EncodeError::PayloadTooLarge(length).into());
        }

        let mut payload = vec![0u8; length];
        if length > 0 {
            let handle = self
                .catalog
                .lookup_instance(object_id, instance_id)
                .ok_or(CatalogError::UnknownInstance {
                    object_id,
                    instance_id,
                })?;
            if handle.pack(&mut payload)? == 0 {
                return Err(SendError::EmptyPack(object_id));
            }
        }

        let encoded = build_frame(frame_type, object_id, instance_id, &payload)?;

        {
            let mut sink = lock(&self.sink);
            sink.write_all(&encoded)?;
            sink.flush()?;
        }

        self.stats
            .tx_bytes
            .fetch_add(encoded.len() as u32, Ordering::Relaxed);
        self.stats
            .tx_object_bytes
            .fetch_add(length as u32, Ordering::Relaxed);
        self.stats.tx_objects.fetch_add(1, Ordering::Relaxed);

        Ok(())
    }
}

/// Locks a mutex, continuing through poison: the protected state is counters
/// and bookkeeping that stay consistent even if another thread panicked.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
