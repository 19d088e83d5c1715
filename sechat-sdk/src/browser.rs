//! The transport port: login, raw message POSTs and room activity streams.
//!
//! The SDK treats the network layer as an opaque capability. Anything that
//! can run the site login dance, POST a message form and surface room
//! activity snapshots may back a session; tests and demos use
//! [`crate::testing::ScriptedBrowser`].

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ChatError;

/// One raw activity snapshot as delivered by the server.
///
/// Keyed by `r<room_id>`, each entry holding an `e` list of raw event
/// records. See [`crate::event::room_events`].
pub type ActivityBlob = serde_json::Value;

/// Credentials for the network's OpenID login flow.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// The known chat networks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatSite {
    StackExchange,
    StackOverflow,
    MetaStackExchange,
}

impl ChatSite {
    /// Parse a site identifier.
    ///
    /// `"MSO"` is accepted as a deprecated alias for `"MSE"` with a
    /// warning; anything outside the known set is an error.
    pub fn parse(name: &str) -> Result<Self, ChatError> {
        match name {
            "SE" => Ok(Self::StackExchange),
            "SO" => Ok(Self::StackOverflow),
            "MSE" => Ok(Self::MetaStackExchange),
            "MSO" => {
                tracing::warn!("'MSO' should no longer be used, use 'MSE' instead");
                Ok(Self::MetaStackExchange)
            }
            other => Err(ChatError::UnknownSite(other.to_string())),
        }
    }
}

/// Response to a message POST.
///
/// The service answers either with a structured JSON payload — whose `id`
/// is null when the message collided with its duplicate suppression — or
/// with a plain-text body (the throttle sentence, or an opaque error page).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostResponse {
    Payload { id: Option<u64> },
    Raw(String),
}

/// Opaque transport capability consumed by the SDK.
#[async_trait]
pub trait Browser: Send + Sync {
    /// Run the site-specific login sequence.
    async fn login(&self, site: ChatSite, credentials: &Credentials) -> Result<()>;

    /// POST one message to a room and return the raw response.
    async fn post_message(&self, room_id: u64, text: &str) -> Result<PostResponse>;

    /// Join a room so the account can post and listen there.
    async fn join_room(&self, room_id: u64) -> Result<()>;

    /// Subscribe to a room's activity by polling every `interval`.
    async fn watch_room(
        &self,
        room_id: u64,
        interval: Duration,
    ) -> Result<mpsc::Receiver<ActivityBlob>>;

    /// Subscribe to a room's activity over the push socket.
    async fn watch_room_socket(&self, room_id: u64) -> Result<mpsc::Receiver<ActivityBlob>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_sites() {
        assert_eq!(ChatSite::parse("SE").unwrap(), ChatSite::StackExchange);
        assert_eq!(ChatSite::parse("SO").unwrap(), ChatSite::StackOverflow);
        assert_eq!(ChatSite::parse("MSE").unwrap(), ChatSite::MetaStackExchange);
    }

    #[test]
    fn mso_is_a_deprecated_alias_for_mse() {
        assert_eq!(ChatSite::parse("MSO").unwrap(), ChatSite::MetaStackExchange);
    }

    #[test]
    fn unknown_site_is_rejected_with_the_offending_name() {
        let err = ChatSite::parse("SuperUser").unwrap_err();
        assert!(err.to_string().contains("SuperUser"));
    }
}
