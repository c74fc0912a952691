// Fakes for the broker's seams

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::cache::{CacheEntry, CacheStore, Fingerprint};
use crate::error::{CacheError, GenerationError, RetrievalError};
use crate::generation::{Generation, GenerationRequest, Generator, Passage, RetrievalIndex};

// Replays scripted outcomes, then keeps answering with fallback
pub struct FakeGenerator {
    script: Mutex<VecDeque<Result<String, GenerationError>>>,
    fallback: String,
    delay: Option<Duration>,
    calls: AtomicUsize,
    last_request: Mutex<Option<GenerationRequest>>,
}

impl FakeGenerator {
    pub fn answering(text: &str) -> Self {
        Self::scripted(Vec::new(), text)
    }

    pub fn scripted(outcomes: Vec<Result<String, GenerationError>>, fallback: &str) -> Self {
        Self {
            script: Mutex::new(outcomes.into()),
            fallback: fallback.to_string(),
            delay: None,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for FakeGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        let text = match next {
            Some(outcome) => outcome?,
            None => self.fallback.clone(),
        };
        Ok(Generation {
            text,
            model_id: request.model_id.clone(),
        })
    }
}

pub struct FakeIndex {
    passages: Option<Vec<Passage>>,
    calls: AtomicUsize,
}

impl FakeIndex {
    pub fn with_passages(texts: &[&str]) -> Self {
        Self {
            passages: Some(texts.iter().map(|t| Passage::new(*t)).collect()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            passages: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RetrievalIndex for FakeIndex {
    async fn retrieve(&self, _question: &str, _limit: usize) -> Result<Vec<Passage>, RetrievalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.passages
            .clone()
            .ok_or_else(|| RetrievalError("index offline".to_string()))
    }
}

#[derive(Default)]
pub struct FakeCache {
    entries: DashMap<String, CacheEntry>,
    fail_reads: bool,
    fail_writes: bool,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl FakeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_reads() -> Self {
        Self {
            fail_reads: true,
            ..Self::default()
        }
    }

    pub fn failing_writes() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    pub fn seed(&self, fingerprint: &Fingerprint, entry: CacheEntry) {
        self.entries.insert(fingerprint.as_str().to_string(), entry);
    }

    pub fn entry(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        self.entries.get(fingerprint.as_str()).map(|e| e.clone())
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheStore for FakeCache {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>, CacheError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads {
            return Err(CacheError::Backend("read refused".to_string()));
        }
        Ok(self.entry(fingerprint))
    }

    async fn put(&self, fingerprint: &Fingerprint, entry: &CacheEntry) -> Result<(), CacheError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes {
            return Err(CacheError::Backend("write refused".to_string()));
        }
        self.seed(fingerprint, entry.clone());
        Ok(())
    }
}
