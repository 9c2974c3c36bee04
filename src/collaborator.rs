use crate::errors::{AppError, AppResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout, Duration};

pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_QUEUE_DEPTH: usize = 16;

// Wire shape is `{ "action": "checkNow", ... }`, matching what the poller
// process expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum CollaboratorRequest {
    CheckNow,
    UpdateAlarm { interval: u32 },
    TestNotification,
    TestSound,
    TestTelegram,
    ClearHistory,
    DebugFetch,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CheckNowReply {
    pub success: bool,
    pub new_jobs: u32,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AckReply {
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DebugFetchReply {
    pub success: bool,
    pub length: u64,
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct RequestEnvelope {
    pub request: CollaboratorRequest,
    pub reply: oneshot::Sender<Value>,
}

pub type CollaboratorEndpoint = mpsc::Receiver<RequestEnvelope>;

// One-shot request/response toward the external poller. Delivery is never
// assumed: a closed channel, a dropped reply slot, and an elapsed timeout
// all surface as COLLABORATOR_UNREACHABLE, which callers keep separate from
// a delivered `success: false`.
#[derive(Clone)]
pub struct CollaboratorClient {
    requests: mpsc::Sender<RequestEnvelope>,
    reply_timeout: Duration,
}

impl CollaboratorClient {
    pub fn channel() -> (Self, CollaboratorEndpoint) {
        Self::channel_with_timeout(DEFAULT_REPLY_TIMEOUT)
    }

    pub fn channel_with_timeout(reply_timeout: Duration) -> (Self, CollaboratorEndpoint) {
        let (requests, endpoint) = mpsc::channel(REQUEST_QUEUE_DEPTH);
        (
            Self {
                requests,
                reply_timeout,
            },
            endpoint,
        )
    }

    pub async fn check_now(&self) -> AppResult<CheckNowReply> {
        parse_reply(self.send(CollaboratorRequest::CheckNow).await?)
    }

    pub async fn update_alarm(&self, interval: u32) -> AppResult<AckReply> {
        parse_reply(self.send(CollaboratorRequest::UpdateAlarm { interval }).await?)
    }

    pub async fn test_notification(&self) -> AppResult<AckReply> {
        parse_reply(self.send(CollaboratorRequest::TestNotification).await?)
    }

    pub async fn test_sound(&self) -> AppResult<AckReply> {
        parse_reply(self.send(CollaboratorRequest::TestSound).await?)
    }

    pub async fn test_telegram(&self) -> AppResult<AckReply> {
        parse_reply(self.send(CollaboratorRequest::TestTelegram).await?)
    }

    pub async fn clear_history(&self) -> AppResult<AckReply> {
        parse_reply(self.send(CollaboratorRequest::ClearHistory).await?)
    }

    pub async fn debug_fetch(&self) -> AppResult<DebugFetchReply> {
        parse_reply(self.send(CollaboratorRequest::DebugFetch).await?)
    }

    async fn send(&self, request: CollaboratorRequest) -> AppResult<Value> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(RequestEnvelope { request, reply })
            .await
            .map_err(|_| unreachable_error("the background collaborator is not running"))?;
        match timeout(self.reply_timeout, response).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(unreachable_error(
                "the background collaborator dropped the request",
            )),
            Err(_) => Err(unreachable_error(
                "the background collaborator did not reply in time",
            )),
        }
    }
}

fn parse_reply<T: DeserializeOwned>(value: Value) -> AppResult<T> {
    serde_json::from_value(value)
        .map_err(|error| AppError::Internal(format!("malformed collaborator reply: {error}")))
}

fn unreachable_error(message: &str) -> AppError {
    AppError::CollaboratorUnreachable(message.to_string())
}
