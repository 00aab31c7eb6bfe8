use std::collections::VecDeque;
use std::sync::Mutex;

use futures::future::BoxFuture;

use weft_core::error::{Result, WeftError};
use weft_core::traits::{LlmExecutor, LlmOptions, LlmResponse};

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Chunks(Vec<String>),
    Failure(String),
    Error(String),
}

/// What a `MockLlm` was asked.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub streaming: bool,
}

/// Scripted `LlmExecutor`. Replies are consumed in order; once the script
/// runs out the prompt is echoed back.
#[derive(Default)]
pub struct MockLlm {
    replies: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, content: impl Into<String>) -> Self {
        self.push(Reply::Text(content.into()))
    }

    /// Reply streamed as the given deltas; the final content is their
    /// concatenation.
    pub fn with_chunks(self, chunks: &[&str]) -> Self {
        self.push(Reply::Chunks(chunks.iter().map(|c| c.to_string()).collect()))
    }

    /// A provider-level failure (`success = false`).
    pub fn with_failure(self, error: impl Into<String>) -> Self {
        self.push(Reply::Failure(error.into()))
    }

    /// A transport error returned as `Err`.
    pub fn with_error(self, error: impl Into<String>) -> Self {
        self.push(Reply::Error(error.into()))
    }

    fn push(self, reply: Reply) -> Self {
        self.replies.lock().unwrap().push_back(reply);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl LlmExecutor for MockLlm {
    fn invoke(&self, prompt: String, options: LlmOptions) -> BoxFuture<'_, Result<LlmResponse>> {
        self.calls.lock().unwrap().push(RecordedCall {
            prompt: prompt.clone(),
            system_prompt: options.system_prompt.clone(),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            streaming: options.streaming,
        });
        let reply = self.replies.lock().unwrap().pop_front();

        Box::pin(async move {
            match reply {
                None => Ok(LlmResponse::ok(prompt)),
                Some(Reply::Text(text)) => {
                    if let (true, Some(cb)) = (options.streaming, &options.on_stream) {
                        cb(&text);
                    }
                    Ok(LlmResponse::ok(text))
                }
                Some(Reply::Chunks(chunks)) => {
                    if let (true, Some(cb)) = (options.streaming, &options.on_stream) {
                        for chunk in &chunks {
                            cb(chunk);
                            tokio::task::yield_now().await;
                        }
                    }
                    Ok(LlmResponse::ok(chunks.concat()))
                }
                Some(Reply::Failure(e)) => Ok(LlmResponse::failed(e)),
                Some(Reply::Error(e)) => Err(WeftError::Llm(e)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn replies_in_order_then_echo() {
        let llm = MockLlm::new().with_response("one").with_failure("down");
        let first = llm.invoke("a".into(), LlmOptions::default()).await.unwrap();
        assert_eq!(first.content, "one");
        let second = llm.invoke("b".into(), LlmOptions::default()).await.unwrap();
        assert!(!second.success);
        let third = llm.invoke("c".into(), LlmOptions::default()).await.unwrap();
        assert_eq!(third.content, "c");
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn chunks_stream_through_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let options = LlmOptions {
            streaming: true,
            on_stream: Some(Arc::new(move |d: &str| sink.lock().unwrap().push(d.to_string()))),
            ..Default::default()
        };
        let llm = MockLlm::new().with_chunks(&["he", "llo"]);
        let resp = llm.invoke("p".into(), options).await.unwrap();
        assert_eq!(resp.content, "hello");
        assert_eq!(*seen.lock().unwrap(), vec!["he", "llo"]);
    }
}
