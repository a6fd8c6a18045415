//! In-process content store.
//!
//! References are `bafkr` + BLAKE3 hex of the bytes, so identical bytes
//! always map to the same reference. Faults can be injected to exercise the
//! retry and soft-failure paths.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use mp_proto::ContentRef;

use crate::backend::{AddedContent, ContentBackend};
use crate::error::ContentError;

#[derive(Default)]
struct Faults {
    failing_adds: u32,
    failing_cats: u32,
    failing_pins: u32,
    offline: bool,
}

#[derive(Default)]
pub struct MemoryBackend {
    blobs: Mutex<HashMap<ContentRef, Vec<u8>>>,
    pinned: Mutex<HashSet<ContentRef>>,
    faults: Mutex<Faults>,
    add_calls: AtomicU32,
    cat_calls: AtomicU32,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reference_for(bytes: &[u8]) -> Result<ContentRef, ContentError> {
        Ok(ContentRef::new(format!("bafkr{}", blake3::hash(bytes).to_hex()))?)
    }

    /// The next `n` adds fail with `UploadTransient`.
    pub fn fail_next_adds(&self, n: u32) {
        self.faults.lock().failing_adds = n;
    }

    /// The next `n` cats fail with `NetworkUnavailable`.
    pub fn fail_next_cats(&self, n: u32) {
        self.faults.lock().failing_cats = n;
    }

    /// The next `n` pin attempts (inline or explicit) fail.
    pub fn fail_next_pins(&self, n: u32) {
        self.faults.lock().failing_pins = n;
    }

    pub fn set_offline(&self, offline: bool) {
        self.faults.lock().offline = offline;
    }

    /// Drop content, as garbage collection of an unpinned blob would.
    pub fn evict(&self, reference: &ContentRef) {
        self.blobs.lock().remove(reference);
        self.pinned.lock().remove(reference);
    }

    /// Overwrite stored bytes without changing the reference.
    pub fn corrupt(&self, reference: &ContentRef, bytes: Vec<u8>) {
        self.blobs.lock().insert(reference.clone(), bytes);
    }

    pub fn is_pinned(&self, reference: &ContentRef) -> bool {
        self.pinned.lock().contains(reference)
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn add_calls(&self) -> u32 {
        self.add_calls.load(Ordering::SeqCst)
    }

    pub fn cat_calls(&self) -> u32 {
        self.cat_calls.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<(), ContentError> {
        if self.faults.lock().offline {
            return Err(ContentError::NetworkUnavailable("memory backend offline".into()));
        }
        Ok(())
    }

    fn take_pin_fault(&self) -> bool {
        let mut faults = self.faults.lock();
        if faults.failing_pins > 0 {
            faults.failing_pins -= 1;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl ContentBackend for MemoryBackend {
    async fn add(&self, bytes: Vec<u8>, pin: bool) -> Result<AddedContent, ContentError> {
        self.add_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        {
            let mut faults = self.faults.lock();
            if faults.failing_adds > 0 {
                faults.failing_adds -= 1;
                return Err(ContentError::UploadTransient("injected add failure".into()));
            }
        }

        let reference = Self::reference_for(&bytes)?;
        let size = bytes.len() as u64;
        self.blobs.lock().insert(reference.clone(), bytes);

        let pinned = pin && !self.take_pin_fault();
        if pinned {
            self.pinned.lock().insert(reference.clone());
        }
        Ok(AddedContent { reference, size, pinned })
    }

    async fn cat(&self, reference: &ContentRef) -> Result<Vec<u8>, ContentError> {
        self.cat_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        {
            let mut faults = self.faults.lock();
            if faults.failing_cats > 0 {
                faults.failing_cats -= 1;
                return Err(ContentError::NetworkUnavailable("injected cat failure".into()));
            }
        }
        self.blobs
            .lock()
            .get(reference)
            .cloned()
            .ok_or_else(|| ContentError::NotFound(reference.to_string()))
    }

    async fn pin(&self, reference: &ContentRef) -> Result<(), ContentError> {
        self.check_online()?;
        if !self.blobs.lock().contains_key(reference) {
            return Err(ContentError::NotFound(reference.to_string()));
        }
        if self.take_pin_fault() {
            return Err(ContentError::PinFailed("injected pin failure".into()));
        }
        self.pinned.lock().insert(reference.clone());
        Ok(())
    }

    async fn ping(&self) -> bool {
        !self.faults.lock().offline
    }
}
