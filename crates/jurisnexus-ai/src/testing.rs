//! Scripted backend for driving pipelines in tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::CallError;
use crate::backend::{ModelBackend, ModelRequest};

#[derive(Debug, Clone)]
enum Step {
    Reply(String),
    Fail(CallError),
    Delay(Duration, Box<Step>),
}

/// Plays back a queue of replies and failures, then repeats its fallback.
///
/// Every prompt it receives is kept for later inspection.
#[derive(Default)]
pub struct ScriptedBackend {
    steps: Mutex<VecDeque<Step>>,
    fallback: Option<Step>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every call with `text`.
    pub fn always(text: impl Into<String>) -> Self {
        Self {
            fallback: Some(Step::Reply(text.into())),
            ..Self::default()
        }
    }

    /// Fail every call with `error`.
    pub fn always_failing(error: CallError) -> Self {
        Self {
            fallback: Some(Step::Fail(error)),
            ..Self::default()
        }
    }

    pub fn reply(self, text: impl Into<String>) -> Self {
        self.push(Step::Reply(text.into()))
    }

    pub fn fail(self, error: CallError) -> Self {
        self.push(Step::Fail(error))
    }

    /// Reply with `text` after sleeping for `delay`.
    pub fn delayed_reply(self, delay: Duration, text: impl Into<String>) -> Self {
        self.push(Step::Delay(delay, Box::new(Step::Reply(text.into()))))
    }

    fn push(self, step: Step) -> Self {
        if let Ok(mut steps) = self.steps.lock() {
            steps.push_back(step);
        }
        self
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &ModelRequest) -> Result<String, CallError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(request.prompt.clone());
        }
        let next = self
            .steps
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .or_else(|| self.fallback.clone());
        let mut step = next.unwrap_or_else(|| {
            Step::Fail(CallError::UpstreamRejection("script exhausted".into()))
        });
        loop {
            match step {
                Step::Reply(text) => return Ok(text),
                Step::Fail(error) => return Err(error),
                Step::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    step = *inner;
                }
            }
        }
    }
}
