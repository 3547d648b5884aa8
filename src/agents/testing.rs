use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::client::{AgentError, ChatClient, ChatCompletion, ChatRequest, ChunkStream};

/// Replays canned completions in order and records every request.
pub struct ScriptedChatClient {
    replies: Mutex<VecDeque<Result<ChatCompletion, String>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedChatClient {
    pub fn new(replies: Vec<ChatCompletion>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(Ok).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn replying<const N: usize>(texts: [&str; N]) -> Self {
        Self::new(
            texts
                .iter()
                .map(|t| ChatCompletion {
                    content: (*t).to_string(),
                    model: "scripted".to_string(),
                    ..ChatCompletion::default()
                })
                .collect(),
        )
    }

    pub fn failing(message: &str) -> Self {
        Self {
            replies: Mutex::new(VecDeque::from([Err(message.to_string())])),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn last_request(&self) -> Option<ChatRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    fn next(&self, request: ChatRequest) -> Result<ChatCompletion, AgentError> {
        self.requests.lock().unwrap().push(request);
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(completion)) => Ok(completion),
            Some(Err(message)) => Err(AgentError::Api {
                status: 500,
                message,
            }),
            None => Err(AgentError::InvalidResponse("script exhausted".to_string())),
        }
    }
}

#[async_trait]
impl ChatClient for ScriptedChatClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatCompletion, AgentError> {
        self.next(request)
    }

    async fn stream(&self, request: ChatRequest) -> Result<ChunkStream, AgentError> {
        let completion = self.next(request)?;
        let chunks: Vec<Result<String, AgentError>> = completion
            .content
            .split_inclusive(' ')
            .map(|c| Ok(c.to_string()))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}
