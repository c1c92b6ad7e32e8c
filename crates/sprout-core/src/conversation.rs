//! Conversation bridge: one remote call per user turn.
//!
//! The service receives the utterance plus profile, routine context, recent
//! history, and a time-of-day bucket, and returns a reply with two derived
//! signals (progress, frustration). Any non-success response is a failure;
//! the controller degrades to a spoken fallback, never a hard error.

use crate::error::{CoreError, CoreResult};
use crate::profile::ChildProfile;
use crate::routine::Routine;
use async_trait::async_trait;
use chrono::{DateTime, Local, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Who said a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// One entry in the conversation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn now(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Wall-clock bucket sent with every request and used for the sleepy avatar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeOfDay {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeOfDay {
    /// Bucket for a wall-clock hour (0-23).
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            5..=11 => TimeOfDay::Morning,
            12..=16 => TimeOfDay::Afternoon,
            17..=20 => TimeOfDay::Evening,
            _ => TimeOfDay::Night,
        }
    }

    /// Bucket for the current local time.
    pub fn now() -> Self {
        Self::from_hour(Local::now().hour())
    }
}

/// Request sent to the conversation service.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRequest {
    pub user_utterance: String,
    pub profile: ChildProfile,
    pub active_routine: Option<Routine>,
    pub current_step_index: usize,
    /// At most the last 10 messages; the controller truncates before sending.
    pub recent_history: Vec<Message>,
    pub time_of_day: TimeOfDay,
}

/// Reply from the conversation service. Progress and frustration are
/// independent booleans and may both be set.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationReply {
    pub message: String,
    #[serde(default)]
    pub indicates_progress: bool,
    #[serde(default)]
    pub indicates_frustration: bool,
}

/// Backend for one conversation turn. Implement for the remote service or a
/// scripted double.
#[async_trait]
pub trait ConversationBackend: Send + Sync {
    /// One turn: utterance in, reply + signals out. Errors mean the remote
    /// path is unavailable (network, non-2xx, parse).
    async fn respond(&self, request: ConversationRequest) -> CoreResult<ConversationReply>;
}

/// Production backend: POSTs to `{base}/chat` with a camelCase JSON body.
pub struct CompanionBridge {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl CompanionBridge {
    /// Create a bridge. The client timeout is generous on purpose — it must
    /// never be shorter than the service's own.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.into(),
            api_key,
            client,
        }
    }
}

#[async_trait]
impl ConversationBackend for CompanionBridge {
    async fn respond(&self, request: ConversationRequest) -> CoreResult<ConversationReply> {
        let url = format!("{}/chat", self.base_url.trim_end_matches('/'));
        let mut builder = self.client.post(&url).json(&request);
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }
        let res = builder
            .send()
            .await
            .map_err(|e| CoreError::Conversation(format!("request failed: {}", e)))?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(CoreError::Conversation(format!(
                "conversation API error {}: {}",
                status, body
            )));
        }

        let reply: ConversationReply = res
            .json()
            .await
            .map_err(|e| CoreError::Conversation(format!("response parse failed: {}", e)))?;
        Ok(reply)
    }
}

/// Scripted backend: pops prepared replies in order. Records every request it
/// receives, for asserting call order and single-flight behavior.
pub struct ScriptedBackend {
    replies: std::sync::Mutex<std::collections::VecDeque<CoreResult<ConversationReply>>>,
    seen: std::sync::Mutex<Vec<ConversationRequest>>,
    in_flight: std::sync::atomic::AtomicUsize,
    max_in_flight: std::sync::atomic::AtomicUsize,
    /// Simulated service latency per call.
    pub delay: Duration,
}

impl ScriptedBackend {
    pub fn new(replies: Vec<CoreResult<ConversationReply>>) -> Self {
        Self {
            replies: std::sync::Mutex::new(replies.into_iter().collect()),
            seen: std::sync::Mutex::new(Vec::new()),
            in_flight: std::sync::atomic::AtomicUsize::new(0),
            max_in_flight: std::sync::atomic::AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    /// Convenience: a backend that always replies with the same message.
    pub fn always(message: &str) -> Self {
        let reply = ConversationReply {
            message: message.to_string(),
            indicates_progress: false,
            indicates_frustration: false,
        };
        let mut s = Self::new(Vec::new());
        *s.replies.lock().unwrap() = std::iter::repeat_with(|| Ok(reply.clone()))
            .take(64)
            .collect();
        s
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Utterances received so far, in call order.
    pub fn seen_utterances(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.user_utterance.clone())
            .collect()
    }

    /// Full requests received so far.
    pub fn seen_requests(&self) -> Vec<ConversationRequest> {
        self.seen.lock().unwrap().clone()
    }

    /// Highest number of concurrently executing calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl ConversationBackend for ScriptedBackend {
    async fn respond(&self, request: ConversationRequest) -> CoreResult<ConversationReply> {
        use std::sync::atomic::Ordering;
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        self.seen.lock().unwrap().push(request);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(CoreError::Conversation("script exhausted".to_string())));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        reply
    }
}
