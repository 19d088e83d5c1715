//! Session façade: lifecycle, queued sends and room watching.
//!
//! A [`Session`] composes the browser port, the dispatch queue and the
//! event classifier. `login` starts the send worker, `logout` stops it;
//! everything between is fire-and-forget sends and per-room event
//! subscriptions.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::browser::{ActivityBlob, Browser, ChatSite, Credentials};
use crate::error::ChatError;
use crate::event::{self, Event};
use crate::sender::{BackoffConfig, PendingMessage, QueueItem, Worker};

/// One authenticated chat session.
///
/// Dropping a session that is still logged in panics: silent teardown
/// used to mask lost messages, so it is surfaced as a programmer error.
pub struct Session {
    browser: Arc<dyn Browser>,
    config: BackoffConfig,
    logged_in: Arc<AtomicBool>,
    queue_depth: Arc<AtomicUsize>,
    queue_tx: Option<mpsc::UnboundedSender<QueueItem>>,
    worker: Option<JoinHandle<()>>,
}

impl Session {
    /// Create a session over a browser transport with the default backoff
    /// tuning.
    pub fn new(browser: Arc<dyn Browser>) -> Self {
        Self::with_config(browser, BackoffConfig::default())
    }

    pub fn with_config(browser: Arc<dyn Browser>, config: BackoffConfig) -> Self {
        Self {
            browser,
            config,
            logged_in: Arc::new(AtomicBool::new(false)),
            queue_depth: Arc::new(AtomicUsize::new(0)),
            queue_tx: None,
            worker: None,
        }
    }

    /// Log in to a site (`"SE"`, `"SO"` or `"MSE"`) and start the send
    /// worker. Logging in twice is a caller error.
    pub async fn login(
        &mut self,
        site: &str,
        credentials: &Credentials,
    ) -> Result<(), ChatError> {
        if self.queue_tx.is_some() {
            return Err(ChatError::AlreadyLoggedIn);
        }
        let site = ChatSite::parse(site)?;
        tracing::info!(?site, "logging in");
        self.browser.login(site, credentials).await?;

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let worker = Worker::new(
            Arc::clone(&self.browser),
            queue_rx,
            Arc::clone(&self.queue_depth),
            self.config.clone(),
        );
        self.queue_tx = Some(queue_tx);
        self.worker = Some(tokio::spawn(worker.run()));
        self.logged_in.store(true, Ordering::SeqCst);
        tracing::info!("logged in");
        Ok(())
    }

    /// Push the stop marker and end the session.
    ///
    /// The worker finishes any delivery already in flight, then exits
    /// without draining later items. The returned handle resolves once it
    /// has; awaiting it is optional. Logging out twice is a caller error.
    pub fn logout(&mut self) -> Result<JoinHandle<()>, ChatError> {
        let (Some(queue_tx), Some(worker)) = (self.queue_tx.take(), self.worker.take()) else {
            return Err(ChatError::NotLoggedIn);
        };
        self.logged_in.store(false, Ordering::SeqCst);
        let _ = queue_tx.send(QueueItem::Stop);
        tracing::info!("logged out");
        Ok(worker)
    }

    /// Queue a message for `room_id` and return immediately.
    ///
    /// Delivery is fire-and-forget: the worker retries until the service
    /// accepts, and failures along the way are visible only in the logs.
    pub fn send_message(&self, room_id: u64, text: &str) -> Result<(), ChatError> {
        let Some(queue_tx) = &self.queue_tx else {
            return Err(ChatError::NotLoggedIn);
        };
        enqueue(queue_tx, &self.queue_depth, room_id, text)
    }

    /// Join a room so the account can post and listen there.
    pub async fn join_room(&self, room_id: u64) -> Result<(), ChatError> {
        self.browser.join_room(room_id).await?;
        Ok(())
    }

    /// A cheap clonable handle for sending from inside event handlers.
    pub fn handle(&self) -> Result<SessionHandle, ChatError> {
        let Some(queue_tx) = &self.queue_tx else {
            return Err(ChatError::NotLoggedIn);
        };
        Ok(SessionHandle {
            queue_tx: queue_tx.clone(),
            queue_depth: Arc::clone(&self.queue_depth),
            logged_in: Arc::clone(&self.logged_in),
        })
    }

    /// Poll `room_id`'s activity every `interval`, classify each delivery
    /// and invoke `handler` once per event, in order.
    ///
    /// The returned handle resolves when the activity stream ends. A
    /// record that violates the feed contract (missing field on a
    /// recognized type) ends the watch loudly with that error.
    pub async fn watch_room<F>(
        &self,
        room_id: u64,
        handler: F,
        interval: Duration,
    ) -> Result<JoinHandle<Result<(), ChatError>>, ChatError>
    where
        F: FnMut(Event, &SessionHandle) + Send + 'static,
    {
        let activity_rx = self.browser.watch_room(room_id, interval).await?;
        self.spawn_watcher(room_id, activity_rx, handler)
    }

    /// Like [`Session::watch_room`], but over the push socket.
    pub async fn watch_room_socket<F>(
        &self,
        room_id: u64,
        handler: F,
    ) -> Result<JoinHandle<Result<(), ChatError>>, ChatError>
    where
        F: FnMut(Event, &SessionHandle) + Send + 'static,
    {
        let activity_rx = self.browser.watch_room_socket(room_id).await?;
        self.spawn_watcher(room_id, activity_rx, handler)
    }

    fn spawn_watcher<F>(
        &self,
        room_id: u64,
        mut activity_rx: mpsc::Receiver<ActivityBlob>,
        mut handler: F,
    ) -> Result<JoinHandle<Result<(), ChatError>>, ChatError>
    where
        F: FnMut(Event, &SessionHandle) + Send + 'static,
    {
        let handle = self.handle()?;
        Ok(tokio::spawn(async move {
            while let Some(activity) = activity_rx.recv().await {
                let events = match event::room_events(&activity, room_id) {
                    Ok(events) => events,
                    Err(error) => {
                        tracing::error!(
                            room_id,
                            error = %error,
                            "activity record violates the feed contract; stopping watch"
                        );
                        return Err(error);
                    }
                };
                for event in events {
                    handler(event, &handle);
                }
            }
            tracing::debug!(room_id, "activity stream ended");
            Ok(())
        }))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Going away while logged in would strand whatever the queue
        // still holds. Not tolerated outside an existing unwind.
        if self.queue_tx.is_some() && !std::thread::panicking() {
            panic!("Session dropped while still logged in; call logout() first");
        }
    }
}

/// Clonable sending handle passed to event handlers.
///
/// Enqueueing through a handle obeys the same precondition as
/// [`Session::send_message`]: once the session logs out, sends fail.
#[derive(Clone)]
pub struct SessionHandle {
    queue_tx: mpsc::UnboundedSender<QueueItem>,
    queue_depth: Arc<AtomicUsize>,
    logged_in: Arc<AtomicBool>,
}

impl SessionHandle {
    pub fn send_message(&self, room_id: u64, text: &str) -> Result<(), ChatError> {
        if !self.logged_in.load(Ordering::SeqCst) {
            return Err(ChatError::NotLoggedIn);
        }
        enqueue(&self.queue_tx, &self.queue_depth, room_id, text)
    }
}

fn enqueue(
    queue_tx: &mpsc::UnboundedSender<QueueItem>,
    queue_depth: &AtomicUsize,
    room_id: u64,
    text: &str,
) -> Result<(), ChatError> {
    let message = PendingMessage {
        room_id,
        text: text.to_string(),
    };
    if queue_tx.send(QueueItem::Message(message)).is_err() {
        // Receiver gone: the worker already consumed its stop marker.
        return Err(ChatError::NotLoggedIn);
    }
    let depth = queue_depth.fetch_add(1, Ordering::SeqCst) + 1;
    tracing::info!(room_id, text, queue_len = depth, "queued message");
    Ok(())
}
