//! Mock capabilities shared by the unit tests

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use docent_ai::{GenerateRequest, Generator};
use parking_lot::Mutex;

use crate::agents::{AgentContext, AgentKind, AgentReply, StepAgent};
use crate::capability::{
    CollectionStats, InMemoryStore, Metadata, RetrievalStore, RetrievedMatch, SearchHit, WebSearch,
};
use crate::error::{Error, Result};

type Responder = dyn Fn(&GenerateRequest) -> docent_ai::Result<String> + Send + Sync;

/// Generator that answers through a closure and records every request
pub struct ScriptedGenerator {
    responder: Box<Responder>,
    pub calls: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedGenerator {
    pub fn new(
        responder: impl Fn(&GenerateRequest) -> docent_ai::Result<String> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Always answer with the same text
    pub fn fixed(text: &str) -> Arc<Self> {
        let text = text.to_string();
        Self::new(move |_| Ok(text.clone()))
    }

    /// Always fail
    pub fn failing() -> Arc<Self> {
        Self::new(|_| Err(docent_ai::Error::api("unavailable", "model offline")))
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &GenerateRequest) -> docent_ai::Result<String> {
        self.calls.lock().push(request.clone());
        (self.responder)(request)
    }
}

/// Search backend that records queries
#[derive(Default)]
pub struct RecordingSearch {
    pub queries: Mutex<Vec<(String, usize)>>,
    pub fail: bool,
}

#[async_trait]
impl WebSearch for RecordingSearch {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        self.queries.lock().push((query.to_string(), k));
        if self.fail {
            return Err(Error::capability("search offline"));
        }
        Ok((0..k)
            .map(|i| SearchHit {
                title: format!("Result {i}"),
                link: format!("https://example.com/{i}"),
                snippet: format!("snippet about {query}"),
            })
            .collect())
    }
}

/// Retrieval store whose every call fails
pub struct BrokenStore;

#[async_trait]
impl RetrievalStore for BrokenStore {
    async fn store(&self, _content: &str, _metadata: Metadata) -> Result<String> {
        Err(Error::capability("store offline"))
    }

    async fn query(
        &self,
        _text: &str,
        _k: usize,
        _filter: Option<&Metadata>,
    ) -> Result<Vec<RetrievedMatch>> {
        Err(Error::capability("store offline"))
    }

    async fn stats(&self) -> Result<CollectionStats> {
        Err(Error::capability("store offline"))
    }

    async fn delete_where(&self, _filter: &Metadata) -> Result<usize> {
        Err(Error::capability("store offline"))
    }
}

/// In-memory store that rejects every second `store` call
#[derive(Default)]
pub struct HalfBrokenStore {
    pub inner: InMemoryStore,
    stores: AtomicU32,
}

#[async_trait]
impl RetrievalStore for HalfBrokenStore {
    async fn store(&self, content: &str, metadata: Metadata) -> Result<String> {
        if self.stores.fetch_add(1, Ordering::SeqCst) % 2 == 1 {
            return Err(Error::capability("store hiccup"));
        }
        self.inner.store(content, metadata).await
    }

    async fn query(
        &self,
        text: &str,
        k: usize,
        filter: Option<&Metadata>,
    ) -> Result<Vec<RetrievedMatch>> {
        self.inner.query(text, k, filter).await
    }

    async fn stats(&self) -> Result<CollectionStats> {
        self.inner.stats().await
    }

    async fn delete_where(&self, filter: &Metadata) -> Result<usize> {
        self.inner.delete_where(filter).await
    }
}

/// In-memory store pre-filled with `(source, content)` pairs
pub async fn seeded_store(docs: &[(&str, &str)]) -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    for (source, content) in docs {
        let mut meta = Metadata::new();
        meta.insert("source".into(), (*source).into());
        store.store(content, meta).await.unwrap();
    }
    store
}

/// Step agent that fails a fixed number of times before succeeding
pub struct FlakyAgent {
    pub kind: AgentKind,
    pub failures: u32,
    pub calls: AtomicU32,
    pub delay_ms: u64,
}

impl FlakyAgent {
    pub fn new(kind: AgentKind, failures: u32) -> Arc<Self> {
        Arc::new(Self {
            kind,
            failures,
            calls: AtomicU32::new(0),
            delay_ms: 0,
        })
    }

    /// Always succeeds, after sleeping `delay_ms`
    pub fn slow(kind: AgentKind, delay_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            kind,
            failures: 0,
            calls: AtomicU32::new(0),
            delay_ms,
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StepAgent for FlakyAgent {
    fn kind(&self) -> AgentKind {
        self.kind
    }

    async fn handle_message(&self, instruction: &str, _context: &AgentContext) -> AgentReply {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        if n < self.failures {
            AgentReply::failure(self.kind.name(), format!("attempt {} failed", n + 1))
        } else {
            AgentReply::success(self.kind.name(), format!("done: {instruction}"))
        }
    }
}
