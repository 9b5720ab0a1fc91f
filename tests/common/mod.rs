//! Shared fixtures for the engine integration tests: an in-memory object
//! catalog, a recording transaction listener, and a byte sink that can be
//! inspected after the engine wrote to it.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, Once};

use uavtalk::engine::ObjectObserver;
use uavtalk::{
    CatalogError, DataObject, Frame, FrameOutcome, ObjectCatalog, ObjectMeta, RxMachine,
    TransactionListener,
};

static LOGGER: Once = Once::new();

pub fn init_logging() {
    LOGGER.call_once(|| {
        let _ = simplelog::SimpleLogger::init(
            simplelog::LevelFilter::Debug,
            simplelog::Config::default(),
        );
    });
}

/// One fixed-size instance holding raw bytes.
pub struct TestInstance {
    data: Mutex<Vec<u8>>,
}

impl TestInstance {
    fn new(data: Vec<u8>) -> Self {
        Self {
            data: Mutex::new(data),
        }
    }
}

impl DataObject for TestInstance {
    fn pack(&self, buf: &mut [u8]) -> Result<usize, CatalogError> {
        let data = self.data.lock().unwrap();
        if buf.len() < data.len() {
            return Err(CatalogError::LayoutMismatch);
        }
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }

    fn unpack(&self, incoming: &[u8]) -> Result<(), CatalogError> {
        let mut data = self.data.lock().unwrap();
        if incoming.len() != data.len() {
            return Err(CatalogError::LayoutMismatch);
        }
        data.copy_from_slice(incoming);
        Ok(())
    }
}

struct Entry {
    meta: ObjectMeta,
    /// Metadata-only entries describe an object type but cannot hold data.
    data_capable: bool,
    instances: HashMap<u16, Arc<TestInstance>>,
}

/// In-memory object catalog.
#[derive(Default)]
pub struct TestCatalog {
    entries: Mutex<HashMap<u32, Entry>>,
}

impl TestCatalog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, object_id: u32, num_bytes: usize, single_instance: bool) {
        self.entries.lock().unwrap().insert(
            object_id,
            Entry {
                meta: ObjectMeta {
                    object_id,
                    num_bytes,
                    single_instance,
                },
                data_capable: true,
                instances: HashMap::new(),
            },
        );
    }

    pub fn register_metadata_only(&self, object_id: u32, num_bytes: usize) {
        self.register(object_id, num_bytes, true);
        self.entries
            .lock()
            .unwrap()
            .get_mut(&object_id)
            .unwrap()
            .data_capable = false;
    }

    pub fn add_instance(&self, object_id: u32, instance_id: u16, data: Vec<u8>) {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.get_mut(&object_id).expect("object not registered");
        assert_eq!(data.len(), entry.meta.num_bytes);
        entry
            .instances
            .insert(instance_id, Arc::new(TestInstance::new(data)));
    }

    pub fn instance_data(&self, object_id: u32, instance_id: u16) -> Option<Vec<u8>> {
        let entries = self.entries.lock().unwrap();
        let instance = entries.get(&object_id)?.instances.get(&instance_id)?;
        let data = instance.data.lock().unwrap().clone();
        Some(data)
    }
}

impl ObjectCatalog for TestCatalog {
    fn lookup(&self, object_id: u32) -> Option<ObjectMeta> {
        self.entries
            .lock()
            .unwrap()
            .get(&object_id)
            .map(|entry| entry.meta)
    }

    fn lookup_instance(&self, object_id: u32, instance_id: u16) -> Option<Arc<dyn DataObject>> {
        let entries = self.entries.lock().unwrap();
        let instance = entries.get(&object_id)?.instances.get(&instance_id)?;
        Some(Arc::clone(instance) as Arc<dyn DataObject>)
    }

    fn create_instance(
        &self,
        object_id: u32,
        instance_id: u16,
    ) -> Result<Arc<dyn DataObject>, CatalogError> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .get_mut(&object_id)
            .ok_or(CatalogError::UnknownObject(object_id))?;
        if !entry.data_capable {
            return Err(CatalogError::NotADataObject(object_id));
        }
        let instance = Arc::new(TestInstance::new(vec![0; entry.meta.num_bytes]));
        entry.instances.insert(instance_id, Arc::clone(&instance));
        Ok(instance as Arc<dyn DataObject>)
    }

    fn num_instances(&self, object_id: u32) -> u16 {
        self.entries
            .lock()
            .unwrap()
            .get(&object_id)
            .map(|entry| entry.instances.len() as u16)
            .unwrap_or(0)
    }
}

/// Byte sink shared between the engine and the test body.
#[derive(Clone, Default)]
pub struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl SharedSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains everything written so far.
    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut self.0.lock().unwrap())
    }
}

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Reassembles the frames an engine wrote to its sink, using the same
/// receive machine the engine itself uses for inbound traffic.
pub fn parse_frames<C: ObjectCatalog>(bytes: &[u8], catalog: &C) -> Vec<Frame> {
    let mut machine = RxMachine::new();
    let mut frames = Vec::new();
    for &byte in bytes {
        match machine.feed(byte, catalog) {
            FrameOutcome::FramedOk(frame) => frames.push(frame),
            FrameOutcome::Discarded(reason) => panic!("sink held a corrupt frame: {reason}"),
            FrameOutcome::AwaitingMore => {}
        }
    }
    frames
}

/// Listener that records every notification.
#[derive(Default)]
pub struct RecordingListener {
    pub succeeded: Mutex<Vec<(u32, u16)>>,
    pub failed: Mutex<Vec<(u32, u16)>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn succeeded(&self) -> Vec<(u32, u16)> {
        self.succeeded.lock().unwrap().clone()
    }

    pub fn failed(&self) -> Vec<(u32, u16)> {
        self.failed.lock().unwrap().clone()
    }
}

impl TransactionListener for RecordingListener {
    fn transaction_succeeded(&self, object_id: u32, instance_id: u16) {
        self.succeeded.lock().unwrap().push((object_id, instance_id));
    }

    fn transaction_failed(&self, object_id: u32, instance_id: u16) {
        self.failed.lock().unwrap().push((object_id, instance_id));
    }
}

/// Observer that records every successful object update.
#[derive(Default)]
pub struct RecordingObserver {
    pub updates: Mutex<Vec<(u32, u16)>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn updates(&self) -> Vec<(u32, u16)> {
        self.updates.lock().unwrap().clone()
    }
}

impl ObjectObserver for RecordingObserver {
    fn object_updated(&self, object_id: u32, instance_id: u16) {
        self.updates.lock().unwrap().push((object_id, instance_id));
    }
}
