//! Debug tap: a broadcast of per-stage events, streamed as SSE at `/_debug/tap`.

use std::{collections::HashSet, str::FromStr, time::Duration};

use axum::response::sse::{Event, KeepAlive};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};
use tracing::warn;

const CHANNEL_CAPACITY: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Resolver,
    Publish,
    Domain,
    Verify,
    Storage,
}

impl StageKind {
    pub const ALL: [StageKind; 5] = [
        StageKind::Resolver,
        StageKind::Publish,
        StageKind::Domain,
        StageKind::Verify,
        StageKind::Storage,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Resolver => "resolver",
            StageKind::Publish => "publish",
            StageKind::Domain => "domain",
            StageKind::Verify => "verify",
            StageKind::Storage => "storage",
        }
    }
}

impl FromStr for StageKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == wanted)
            .ok_or_else(|| format!("unknown stage '{wanted}'"))
    }
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct StageMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StageMetadata {
    fn is_empty(&self) -> bool {
        self.host.is_none()
            && self.user_id.is_none()
            && self.latency_ms.is_none()
            && self.message.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageEvent {
    pub ts: DateTime<Utc>,
    pub stage: StageKind,
    #[serde(skip_serializing_if = "StageMetadata::is_empty")]
    pub meta: StageMetadata,
    pub out: Value,
}

impl StageEvent {
    pub fn new(ts: DateTime<Utc>, stage: StageKind, meta: StageMetadata, out: Value) -> Self {
        Self {
            ts,
            stage,
            meta,
            out,
        }
    }

    /// Synthetic storage-stage event, used for the dev heartbeat and in tests.
    pub fn mock(message: &str) -> Self {
        Self::new(
            Utc::now(),
            StageKind::Storage,
            StageMetadata {
                message: Some(message.to_string()),
                ..StageMetadata::default()
            },
            json!({ "message": message }),
        )
    }

    fn into_sse_event(self) -> Result<Event, serde_json::Error> {
        let data = serde_json::to_string(&self)?;
        Ok(Event::default().event(self.stage.as_str()).data(data))
    }
}

#[derive(Clone)]
pub struct TapHub {
    sender: broadcast::Sender<StageEvent>,
}

impl TapHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Events published while nobody is subscribed are dropped.
    pub fn publish(&self, event: StageEvent) {
        if self.sender.receiver_count() == 0 {
            return;
        }
        if let Err(err) = self.sender.send(event) {
            warn!(stage = "tap", error = %err, "failed to broadcast tap event");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StageEvent> {
        self.sender.subscribe()
    }

    pub fn spawn_mock_publisher(&self) {
        let hub = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(10));
            loop {
                interval.tick().await;
                hub.publish(StageEvent::mock("tap.dev.heartbeat"));
            }
        });
    }
}

impl Default for TapHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscriber-side narrowing. Empty criteria match everything.
#[derive(Debug, Clone, Default)]
pub struct TapFilter {
    stages: Option<HashSet<StageKind>>,
    host: Option<String>,
    user_id: Option<String>,
}

impl TapFilter {
    pub fn from_query(
        stages: Option<&str>,
        host: Option<String>,
        user_id: Option<String>,
    ) -> Result<Self, String> {
        Ok(Self {
            stages: parse_stage_list(stages)?,
            host: host
                .map(|value| value.trim().to_ascii_lowercase())
                .filter(|value| !value.is_empty()),
            user_id: user_id.filter(|value| !value.trim().is_empty()),
        })
    }

    pub fn matches(&self, event: &StageEvent) -> bool {
        if let Some(stages) = &self.stages {
            if !stages.contains(&event.stage) {
                return false;
            }
        }
        if let Some(host) = &self.host {
            if event.meta.host.as_deref() != Some(host.as_str()) {
                return false;
            }
        }
        if let Some(user_id) = &self.user_id {
            if event.meta.user_id.as_deref() != Some(user_id.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Lagged receivers skip the missed events rather than closing the stream.
pub fn tap_stream(
    hub: TapHub,
    filter: TapFilter,
) -> impl Stream<Item = Result<Event, serde_json::Error>> + Send + 'static {
    BroadcastStream::new(hub.subscribe()).filter_map(move |result| match result {
        Ok(event) if filter.matches(&event) => Some(event.into_sse_event()),
        _ => None,
    })
}

pub fn tap_keep_alive() -> KeepAlive {
    KeepAlive::new()
        .interval(Duration::from_secs(20))
        .text("heartbeat")
}

/// Comma separated stage names; `None` when the list is absent or blank.
pub fn parse_stage_list(value: Option<&str>) -> Result<Option<HashSet<StageKind>>, String> {
    let stages = value
        .unwrap_or_default()
        .split(',')
        .filter(|item| !item.trim().is_empty())
        .map(StageKind::from_str)
        .collect::<Result<HashSet<_>, _>>()?;

    Ok((!stages.is_empty()).then_some(stages))
}
