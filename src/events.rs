//! Chat event admission: payload validity, idempotent delivery, and caller
//! authorization, checked in that order before a question enters the
//! pipeline.

use crate::assistant::Assistant;
use crate::error::{AssistantError, Result};
use crate::slack::Transport;
use lru::LruCache;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// How many processed event ids to remember for de-duplication. Slack
/// redelivers within minutes, so a bounded window is enough.
pub const SEEN_EVENTS_CAPACITY: usize = 4096;

const MAINTENANCE_REPLY: &str = "Under maintenance.";

#[derive(Debug, Clone, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub challenge: Option<String>,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub event: Option<MessageEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageEvent {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub ts: Option<String>,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
}

impl MessageEvent {
    /// Human-authored message events only; everything else (bot echoes,
    /// reactions, edits) is ignored.
    pub fn is_user_message(&self) -> bool {
        self.kind == "message" && self.bot_id.is_none()
    }

    /// The thread this message belongs to: its parent, or itself when it
    /// starts a new thread.
    pub fn thread_anchor(&self) -> Option<&str> {
        self.thread_ts.as_deref().or(self.ts.as_deref())
    }
}

/// Process-lifetime admission state: the allow-list of callers (read-only
/// after startup) and a bounded, least-recently-used set of already
/// handled event ids.
pub struct AdmissionGuard {
    seen: Mutex<LruCache<String, ()>>,
    authorized: HashSet<String>,
}

impl AdmissionGuard {
    pub fn new(authorized: impl IntoIterator<Item = String>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            seen: Mutex::new(LruCache::new(capacity)),
            authorized: authorized.into_iter().collect(),
        }
    }

    /// Record `event_id` as handled. Returns false when it was already
    /// seen (a redelivery that must be dropped).
    pub async fn mark_seen(&self, event_id: &str) -> bool {
        let mut seen = self.seen.lock().await;
        if seen.contains(event_id) {
            return false;
        }
        seen.put(event_id.to_string(), ());
        true
    }

    pub fn authorize(&self, user: &str) -> Result<()> {
        if self.authorized.contains(user) {
            Ok(())
        } else {
            Err(AssistantError::Unauthorized(user.to_string()))
        }
    }
}

/// Entry point for one delivered chat event.
pub struct EventHandler {
    guard: AdmissionGuard,
    assistant: Arc<Assistant>,
    transport: Arc<dyn Transport>,
}

impl EventHandler {
    pub fn new(
        guard: AdmissionGuard,
        assistant: Arc<Assistant>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            guard,
            assistant,
            transport,
        }
    }

    /// Validate, deduplicate, authorize, then hand the question to the
    /// pipeline. Inadmissible events are dropped quietly.
    pub async fn handle(&self, body: Value) {
        let envelope: EventEnvelope = match serde_json::from_value(body) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "malformed event payload");
                return;
            }
        };

        let event = match envelope.event {
            Some(event) => event,
            None => {
                debug!("envelope without event");
                return;
            }
        };
        if !event.is_user_message() {
            debug!("ignoring non-user event");
            return;
        }

        let event_id = match envelope.event_id {
            Some(id) => id,
            None => {
                warn!("event without id, dropping");
                return;
            }
        };
        if !self.guard.mark_seen(&event_id).await {
            warn!(%event_id, "duplicate event");
            return;
        }

        let (user, channel) = match (event.user.as_deref(), event.channel.as_deref()) {
            (Some(user), Some(channel)) => (user, channel),
            _ => {
                warn!(%event_id, "event missing user or channel");
                return;
            }
        };
        let thread_ts = match event.thread_anchor() {
            Some(ts) => ts.to_string(),
            None => {
                warn!(%event_id, "event missing timestamp");
                return;
            }
        };
        let text = match event.text.as_deref().filter(|t| !t.trim().is_empty()) {
            Some(text) => text,
            None => {
                debug!("empty message (edited or deleted)");
                return;
            }
        };

        if let Err(e) = self.guard.authorize(user) {
            warn!(error = %e, "caller rejected");
            if let Err(send_err) = self
                .transport
                .send_message(channel, MAINTENANCE_REPLY, Some(&thread_ts))
                .await
            {
                warn!(error = %send_err, "could not deliver maintenance reply");
            }
            return;
        }

        info!(%user, %channel, %event_id, "event admitted");
        self.assistant
            .handle_question(channel, &thread_ts, text)
            .await;
    }
}
