//! In-process backend for exercising the client, classifiers and orchestrator
//! without a network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::llm_client::{CompletionBackend, LlmError, StructuredPrompt, StructuredResponse};
use crate::models::DocumentId;

type Responder = Box<dyn Fn(&StructuredPrompt) -> Result<StructuredResponse, LlmError> + Send + Sync>;

enum Script {
    Queue(Mutex<VecDeque<Result<StructuredResponse, LlmError>>>),
    Responder(Responder),
}

pub struct ScriptedBackend {
    script: Script,
    latency: Mutex<VecDeque<Duration>>,
    calls: AtomicUsize,
    call_times: Mutex<Vec<Instant>>,
    prompts: Mutex<Vec<StructuredPrompt>>,
}

impl ScriptedBackend {
    /// Replays the given results in order; panics if called more often.
    pub fn queue(results: Vec<Result<StructuredResponse, LlmError>>) -> Self {
        Self::with_script(Script::Queue(Mutex::new(results.into())))
    }

    /// Answers every call by running `f` over the prompt.
    pub fn responder<F>(f: F) -> Self
    where
        F: Fn(&StructuredPrompt) -> Result<StructuredResponse, LlmError> + Send + Sync + 'static,
    {
        Self::with_script(Script::Responder(Box::new(f)))
    }

    /// Per-call artificial latency, consumed in order.
    pub fn with_latency(self, latency: Vec<Duration>) -> Self {
        *self.latency.lock().unwrap() = latency.into();
        self
    }

    fn with_script(script: Script) -> Self {
        Self {
            script,
            latency: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            call_times: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().unwrap().clone()
    }

    pub fn prompts(&self) -> Vec<StructuredPrompt> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn complete(&self, request: &StructuredPrompt) -> Result<StructuredResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_times.lock().unwrap().push(Instant::now());
        self.prompts.lock().unwrap().push(request.clone());

        let delay = self.latency.lock().unwrap().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match &self.script {
            Script::Queue(queue) => queue
                .lock()
                .unwrap()
                .pop_front()
                .expect("ScriptedBackend queue exhausted"),
            Script::Responder(f) => f(request),
        }
    }
}

/// Document ids embedded in a rendered batch prompt, in prompt order.
pub fn document_ids_in(prompt: &str) -> Vec<DocumentId> {
    const KEY: &str = "\"document_id\": \"";
    let mut ids = Vec::new();
    let mut rest = prompt;
    while let Some(pos) = rest.find(KEY) {
        rest = &rest[pos + KEY.len()..];
        if let Some(end) = rest.find('"') {
            if let Ok(id) = rest[..end].parse::<DocumentId>() {
                ids.push(id);
            }
        }
    }
    ids
}
