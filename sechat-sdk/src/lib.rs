//! Client SDK for Stack-Exchange-style chat networks.
//!
//! The SDK manages a single authenticated chat session. Outbound sends
//! are serialized through one background worker that absorbs rate limits
//! and duplicate-message collisions with backoff, and inbound room
//! activity is classified into typed [`event::Event`]s delivered to
//! caller-supplied handlers.
//!
//! The HTTP/websocket transport and the login flow live behind the
//! [`browser::Browser`] port; the SDK never talks to the network
//! directly. [`testing::ScriptedBrowser`] backs tests and demos.

pub mod browser;
pub mod client;
pub mod error;
pub mod event;
pub mod sender;
pub mod testing;

pub use browser::{ActivityBlob, Browser, ChatSite, Credentials, PostResponse};
pub use client::{Session, SessionHandle};
pub use error::ChatError;
pub use event::{Event, EventKind, EventType};
pub use sender::{BackoffConfig, SendOutcome};
