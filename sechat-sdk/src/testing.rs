//! Testing utilities: a scripted in-memory browser.
//!
//! Lets tests and demos drive a full session without a network. POST
//! responses are scripted up front, every call is recorded for
//! assertions, and activity blobs are injected by hand into watch
//! streams.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::browser::{ActivityBlob, Browser, ChatSite, Credentials, PostResponse};

/// Record of one call made to the scripted browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserCall {
    Login { site: ChatSite },
    PostMessage { room_id: u64, text: String },
    JoinRoom { room_id: u64 },
    WatchRoom { room_id: u64 },
    WatchRoomSocket { room_id: u64 },
}

/// A [`Browser`] whose POST responses are scripted up front.
///
/// Scripted responses are consumed in order; once the script is
/// exhausted, every further POST is accepted with a fresh id.
#[derive(Default)]
pub struct ScriptedBrowser {
    responses: Mutex<VecDeque<PostResponse>>,
    calls: Mutex<Vec<BrowserCall>>,
    activity_txs: Mutex<Vec<mpsc::Sender<ActivityBlob>>>,
    next_id: AtomicU64,
}

impl ScriptedBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next POST response.
    pub fn with_response(self, response: PostResponse) -> Self {
        self.responses.lock().unwrap().push_back(response);
        self
    }

    /// Everything the SDK has asked of this browser, in call order.
    pub fn calls(&self) -> Vec<BrowserCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Just the POSTed messages, in wire order.
    pub fn posts(&self) -> Vec<(u64, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                BrowserCall::PostMessage { room_id, text } => Some((room_id, text)),
                _ => None,
            })
            .collect()
    }

    /// Deliver an activity blob to every open watch stream.
    pub async fn push_activity(&self, activity: ActivityBlob) {
        let txs = self.activity_txs.lock().unwrap().clone();
        for tx in txs {
            let _ = tx.send(activity.clone()).await;
        }
    }

    /// Close all watch streams, ending their watcher tasks.
    pub fn close_activity(&self) {
        self.activity_txs.lock().unwrap().clear();
    }

    fn record(&self, call: BrowserCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn open_stream(&self) -> mpsc::Receiver<ActivityBlob> {
        let (tx, rx) = mpsc::channel(64);
        self.activity_txs.lock().unwrap().push(tx);
        rx
    }
}

#[async_trait]
impl Browser for ScriptedBrowser {
    async fn login(&self, site: ChatSite, _credentials: &Credentials) -> Result<()> {
        self.record(BrowserCall::Login { site });
        Ok(())
    }

    async fn post_message(&self, room_id: u64, text: &str) -> Result<PostResponse> {
        self.record(BrowserCall::PostMessage {
            room_id,
            text: text.to_string(),
        });
        let scripted = self.responses.lock().unwrap().pop_front();
        Ok(scripted.unwrap_or_else(|| PostResponse::Payload {
            id: Some(self.next_id.fetch_add(1, Ordering::SeqCst) + 1),
        }))
    }

    async fn join_room(&self, room_id: u64) -> Result<()> {
        self.record(BrowserCall::JoinRoom { room_id });
        Ok(())
    }

    async fn watch_room(
        &self,
        room_id: u64,
        _interval: Duration,
    ) -> Result<mpsc::Receiver<ActivityBlob>> {
        self.record(BrowserCall::WatchRoom { room_id });
        Ok(self.open_stream())
    }

    async fn watch_room_socket(&self, room_id: u64) -> Result<mpsc::Receiver<ActivityBlob>> {
        self.record(BrowserCall::WatchRoomSocket { room_id });
        Ok(self.open_stream())
    }
}

/// Build an activity blob carrying `records` for one room.
pub fn activity_for(room_id: u64, records: Vec<Value>) -> ActivityBlob {
    let mut room = serde_json::Map::new();
    room.insert("e".to_string(), Value::Array(records));
    let mut blob = serde_json::Map::new();
    blob.insert(format!("r{room_id}"), Value::Object(room));
    Value::Object(blob)
}
