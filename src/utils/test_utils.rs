//! Shared fixtures for client, session, and integration tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::api::client::{GenerationTransport, ServiceReply, TransportError};
use crate::api::GenerateRequest;

/// Default body handed out when the script runs dry, so multi-send tests
/// don't have to enqueue a reply per call.
const DEFAULT_REPLY_BODY: &str = r#"{"text":"Scripted response"}"#;

enum ScriptedReply {
    Reply { status: u16, body: String },
    NetworkError(String),
    Hang,
}

/// Generation transport that replays a scripted sequence of replies and
/// records every request it sees.
pub struct ScriptTransport {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl ScriptTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Enqueue a 200 reply carrying the given text.
    pub fn push_text(&self, text: &str) {
        self.push_status(
            200,
            &serde_json::json!({ "text": text }).to_string(),
        );
    }

    /// Enqueue a reply with an arbitrary status and raw body.
    pub fn push_status(&self, status: u16, body: &str) {
        self.lock_replies().push_back(ScriptedReply::Reply {
            status,
            body: body.to_string(),
        });
    }

    /// Enqueue a transport-level failure.
    pub fn push_network_error(&self, message: &str) {
        self.lock_replies()
            .push_back(ScriptedReply::NetworkError(message.to_string()));
    }

    /// Enqueue an attempt that never settles (exercises timeout/cancel).
    pub fn push_hang(&self) {
        self.lock_replies().push_back(ScriptedReply::Hang);
    }

    /// Number of attempts the transport has served.
    pub fn calls(&self) -> usize {
        self.lock_requests().len()
    }

    /// Copies of every request seen, in order.
    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.lock_requests().clone()
    }

    fn lock_replies(&self) -> std::sync::MutexGuard<'_, VecDeque<ScriptedReply>> {
        self.replies.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_requests(&self) -> std::sync::MutexGuard<'_, Vec<GenerateRequest>> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl GenerationTransport for ScriptTransport {
    async fn execute(&self, request: &GenerateRequest) -> Result<ServiceReply, TransportError> {
        self.lock_requests().push(request.clone());
        let next = self.lock_replies().pop_front();
        match next {
            Some(ScriptedReply::Reply { status, body }) => Ok(ServiceReply { status, body }),
            Some(ScriptedReply::NetworkError(message)) => Err(TransportError { message }),
            Some(ScriptedReply::Hang) => std::future::pending().await,
            None => Ok(ServiceReply {
                status: 200,
                body: DEFAULT_REPLY_BODY.to_string(),
            }),
        }
    }
}
