use async_trait::async_trait;
use bytes::Bytes;
use comet_core::backend::{ByteStream, GenerationBackend};
use comet_core::error::StreamError;
use comet_core::wire::GenerationRequest;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::Mutex;

/// One step of a canned transport body.
pub enum Step {
    Chunk(&'static str),
    Fail(StreamError),
    /// Stop producing without closing the body.
    Hang,
}

/// Serves canned byte bodies, one script per `open` call.
#[derive(Default)]
pub struct ScriptedBackend {
    scripts: Mutex<VecDeque<Vec<Step>>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedBackend {
    pub fn new(scripts: Vec<Vec<Step>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().expect("requests").clone()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn open(&self, request: GenerationRequest) -> Result<ByteStream, StreamError> {
        self.requests.lock().expect("requests").push(request);
        let steps = self
            .scripts
            .lock()
            .expect("scripts")
            .pop_front()
            .unwrap_or_default();
        let hang = steps.iter().any(|step| matches!(step, Step::Hang));
        let items: Vec<Result<Bytes, StreamError>> = steps
            .into_iter()
            .map_while(|step| match step {
                Step::Chunk(text) => Some(Ok(Bytes::from_static(text.as_bytes()))),
                Step::Fail(err) => Some(Err(err)),
                Step::Hang => None,
            })
            .collect();
        let body = stream::iter(items);
        Ok(if hang {
            body.chain(stream::pending()).boxed()
        } else {
            body.boxed()
        })
    }
}

/// Split `text` into single-byte chunks to exercise record reassembly.
pub fn bytewise(text: &'static str) -> Vec<Step> {
    (0..text.len())
        .map(|idx| Step::Chunk(&text[idx..idx + 1]))
        .collect()
}
