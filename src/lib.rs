//! Crate implementing the UAVTalk telemetry protocol.
//!
//! UAVTalk frames typed data objects (flight-controller state, commands,
//! settings) onto a byte stream and reconstructs them on the receiving end.
//! The crate is structured around two layers: the stateless frame codec
//! ([`crc`], [`frame`]) and the stateful protocol engine
//! ([`engine::Uavtalk`]), which owns the byte-at-a-time receive state
//! machine, the request/acknowledge transaction table and the statistics
//! counters.
//!
//! What the payload bytes mean is not this crate's business: object layout,
//! storage and marshalling live behind the [`catalog::ObjectCatalog`] and
//! [`catalog::DataObject`] traits implemented by the caller, and transport
//! acquisition (serial port, socket, log file) is equally external: the
//! engine reads single bytes and writes to any [`std::io::Write`] sink.

pub mod catalog;
pub mod crc;
pub mod engine;
pub mod frame;
pub mod rx;
pub mod transaction;

pub use catalog::{CatalogError, DataObject, ObjectCatalog, ObjectMeta};
pub use engine::{ComStats, ObjectObserver, SendError, Uavtalk};
pub use frame::{build_frame, EncodeError, Frame, FrameType, ALL_INSTANCES};
pub use rx::{DiscardReason, FrameOutcome, FramingError, RxMachine};
pub use transaction::TransactionListener;
