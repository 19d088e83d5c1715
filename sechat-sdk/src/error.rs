//! Typed errors for the SDK surface.
//!
//! Protocol-level trouble (rate limits, duplicate collisions, opaque
//! rejections) never shows up here; the send worker absorbs those and
//! retries. These errors cover caller misuse and malformed upstream data.

use thiserror::Error;

/// Errors returned by [`crate::Session`] and the event classifier.
#[derive(Debug, Error)]
pub enum ChatError {
    /// `login` was called on a session that is already logged in.
    #[error("already logged in")]
    AlreadyLoggedIn,

    /// An operation that needs a live session was called before `login`
    /// or after `logout`.
    #[error("not logged in")]
    NotLoggedIn,

    /// The site identifier is not one of the known chat networks.
    #[error("unknown chat site {0:?} (expected SE, SO or MSE)")]
    UnknownSite(String),

    /// An event record is missing a field its type requires, or the field
    /// has the wrong shape. The upstream feed broke its contract.
    #[error("event record field `{0}` missing or malformed")]
    MissingField(&'static str),

    /// The browser transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] anyhow::Error),
}
