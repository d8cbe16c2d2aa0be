#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use keyindex_api::definition::utf8;
use keyindex_api::{
    ExtractionError, ExtractionInput, ExtractionResult, FileObject, FileSystem, IndexDefinition,
    MemoryFileSystem,
};
use keyindex_core::{IndexManager, IndexingConfig};

pub const WORD_INDEX: &str = "word_index";
pub const EXT_INDEX: &str = "ext_index";
pub const FAILING_INDEX: &str = "failing_index";

pub fn test_config() -> IndexingConfig {
    IndexingConfig {
        extraction_parallelism: 2,
        writer_poll_interval_ms: 10,
        drain_timeout_ms: 5_000,
        ..IndexingConfig::default()
    }
}

pub fn open_manager(dir: &Path, fs: &MemoryFileSystem, config: IndexingConfig) -> IndexManager {
    let fs: Arc<dyn FileSystem> = Arc::new(fs.clone());
    IndexManager::open(dir, fs, config).unwrap()
}

fn text(file: &dyn FileObject, input: &ExtractionInput) -> ExtractionResult<String> {
    let bytes = input.bytes_or_read(file)?;
    utf8::decode(&bytes)
}

/// Keys every identifier following `class `; the value is the file path.
pub struct WordIndex {
    version: u32,
    calls: Arc<AtomicUsize>,
}

impl WordIndex {
    pub fn new(version: u32) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                version,
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }
}

impl IndexDefinition for WordIndex {
    type Value = String;

    fn id(&self) -> &str {
        WORD_INDEX
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn supports(&self, file: &dyn FileObject) -> bool {
        matches!(file.extension(), Some("java") | Some("txt"))
    }

    fn map(
        &self,
        file: &dyn FileObject,
        input: &ExtractionInput,
    ) -> ExtractionResult<HashMap<String, String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let content = text(file, input)?;
        let mut words = content.split_whitespace();
        let mut entries = HashMap::new();
        while let Some(word) = words.next() {
            if word == "class" {
                if let Some(name) = words.next() {
                    entries.insert(name.to_string(), file.path().to_string());
                }
            }
        }
        Ok(entries)
    }

    fn serialize_value(&self, value: &String) -> ExtractionResult<Vec<u8>> {
        Ok(utf8::encode(value))
    }

    fn deserialize_value(&self, bytes: &[u8]) -> ExtractionResult<String> {
        utf8::decode(bytes)
    }
}

/// Keys each file by its extension; the value is the content length.
pub struct ExtensionIndex {
    calls: Arc<AtomicUsize>,
}

impl ExtensionIndex {
    pub fn new() -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }
}

impl IndexDefinition for ExtensionIndex {
    type Value = u64;

    fn id(&self) -> &str {
        EXT_INDEX
    }

    fn version(&self) -> u32 {
        1
    }

    fn supports(&self, file: &dyn FileObject) -> bool {
        file.extension().is_some()
    }

    fn map(
        &self,
        file: &dyn FileObject,
        _input: &ExtractionInput,
    ) -> ExtractionResult<HashMap<String, u64>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let length = file
            .length()
            .map_err(|e| ExtractionError::io(file.path(), e))?;
        let extension = file.extension().unwrap_or_default().to_string();
        Ok(HashMap::from([(extension, length)]))
    }

    fn serialize_value(&self, value: &u64) -> ExtractionResult<Vec<u8>> {
        Ok(value.to_be_bytes().to_vec())
    }

    fn deserialize_value(&self, bytes: &[u8]) -> ExtractionResult<u64> {
        let raw: [u8; 8] = bytes
            .try_into()
            .map_err(|_| ExtractionError::Codec(format!("expected 8 bytes, got {}", bytes.len())))?;
        Ok(u64::from_be_bytes(raw))
    }
}

/// Fails on any `.txt` file mentioning `broken`, otherwise keys the file
/// name.
pub struct FailingIndex {
    calls: Arc<AtomicUsize>,
}

impl FailingIndex {
    pub fn new() -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }
}

impl IndexDefinition for FailingIndex {
    type Value = String;

    fn id(&self) -> &str {
        FAILING_INDEX
    }

    fn version(&self) -> u32 {
        1
    }

    fn supports(&self, file: &dyn FileObject) -> bool {
        file.extension() == Some("txt")
    }

    fn map(
        &self,
        file: &dyn FileObject,
        input: &ExtractionInput,
    ) -> ExtractionResult<HashMap<String, String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let content = text(file, input)?;
        if content.contains("broken") {
            return Err(ExtractionError::Malformed(format!("{} is broken", file.path())));
        }
        Ok(HashMap::from([(file.name().to_string(), content)]))
    }

    fn serialize_value(&self, value: &String) -> ExtractionResult<Vec<u8>> {
        Ok(utf8::encode(value))
    }

    fn deserialize_value(&self, bytes: &[u8]) -> ExtractionResult<String> {
        utf8::decode(bytes)
    }
}

/// Holds the writer inside extraction of any `.gate` file until released,
/// so tests can pile up work behind it.
pub struct GateIndex {
    started: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
}

pub struct Gate {
    started: Receiver<()>,
    release: Sender<()>,
}

impl Gate {
    pub fn wait_until_blocked(&self) {
        self.started
            .recv_timeout(Duration::from_secs(10))
            .expect("writer never reached the gate");
    }

    pub fn open(&self) {
        let _ = self.release.send(());
    }
}

pub fn gate() -> (GateIndex, Gate) {
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    (
        GateIndex {
            started: Mutex::new(started_tx),
            release: Mutex::new(release_rx),
        },
        Gate {
            started: started_rx,
            release: release_tx,
        },
    )
}

impl IndexDefinition for GateIndex {
    type Value = String;

    fn id(&self) -> &str {
        "gate_index"
    }

    fn version(&self) -> u32 {
        1
    }

    fn supports(&self, file: &dyn FileObject) -> bool {
        file.extension() == Some("gate")
    }

    fn map(
        &self,
        file: &dyn FileObject,
        _input: &ExtractionInput,
    ) -> ExtractionResult<HashMap<String, String>> {
        let _ = self.started.lock().expect("lock poisoned").send(());
        let _ = self
            .release
            .lock()
            .expect("lock poisoned")
            .recv_timeout(Duration::from_secs(10));
        Ok(HashMap::from([("gate".to_string(), file.path().to_string())]))
    }

    fn serialize_value(&self, value: &String) -> ExtractionResult<Vec<u8>> {
        Ok(utf8::encode(value))
    }

    fn deserialize_value(&self, bytes: &[u8]) -> ExtractionResult<String> {
        utf8::decode(bytes)
    }
}

pub fn sorted(mut values: Vec<String>) -> Vec<String> {
    values.sort();
    values
}
