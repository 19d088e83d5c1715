//! The serialized send pipeline.
//!
//! One worker per session drains a FIFO queue and retries each message
//! until the service accepts it. Rate limits, duplicate collisions and
//! opaque rejections are absorbed here; callers of
//! [`crate::Session::send_message`] never see them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::mpsc;

use crate::browser::{Browser, PostResponse};

/// The throttle sentence the service answers with when posting too fast.
static TOO_FAST_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"You can perform this action again in (\d+) seconds").unwrap());

/// A message waiting in the dispatch queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub room_id: u64,
    pub text: String,
}

/// Queue items consumed by the worker.
///
/// `Stop` terminates the worker without draining anything enqueued after
/// it; a delivery already in flight still runs to acceptance first.
#[derive(Debug)]
pub(crate) enum QueueItem {
    Message(PendingMessage),
    Stop,
}

/// Per-attempt outcome derived from the transport response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Accepted,
    RateLimited(u64),
    Duplicate,
    UnknownFailure(String),
}

impl SendOutcome {
    /// Classify a raw POST response.
    ///
    /// A structured payload with a null `id` is how the service flags a
    /// duplicate collision, so it does not count as accepted.
    pub fn from_response(response: &PostResponse) -> Self {
        match response {
            PostResponse::Payload { id: Some(_) } => Self::Accepted,
            PostResponse::Payload { id: None } => Self::Duplicate,
            PostResponse::Raw(text) => match TOO_FAST_RE
                .captures(text)
                .and_then(|caps| caps[1].parse().ok())
            {
                Some(seconds) => Self::RateLimited(seconds),
                None => Self::UnknownFailure(text.clone()),
            },
        }
    }
}

/// Wait tuning for the retry loop. `Default` matches the live service.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Throttle waits from the service are multiplied by this.
    pub multiplier: u64,
    /// Flat wait added to every throttle retry, and the whole wait for
    /// retries that carry no timing hint.
    pub adder: Duration,
    /// Cooldown after an accepted message before the next queue item.
    pub base_wait: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            multiplier: 2,
            adder: Duration::from_secs(5),
            base_wait: Duration::from_secs(5),
        }
    }
}

/// What the worker does after one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Sleep, then POST again (the text may have been perturbed).
    RetryAfter(Duration),
    /// The service took the message; cool down before the next item.
    Delivered { cooldown: Duration },
}

/// Retry state for a single message.
///
/// Tracks the text as the duplicate rules perturb it, and the attempt
/// counter. Pure: the worker owns the sleeping and the POSTs.
#[derive(Debug)]
pub struct Delivery {
    text: String,
    attempt: u32,
    config: BackoffConfig,
}

impl Delivery {
    /// Start a delivery. `previous` is the text of the last successfully
    /// sent message; an exact byte-for-byte repeat gets one leading space
    /// so the service does not collapse it.
    pub fn new(text: String, previous: Option<&str>, config: BackoffConfig) -> Self {
        let text = if previous == Some(text.as_str()) {
            format!(" {text}")
        } else {
            text
        };
        Self {
            text,
            attempt: 0,
            config,
        }
    }

    /// The text the next POST will carry.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Bump and return the attempt number. The first call returns 1.
    pub fn start_attempt(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }

    /// Decide what to do after an attempt produced `outcome`.
    ///
    /// A duplicate collision appends one trailing space to the text — a
    /// markdown no-op that defeats the service's duplicate suppression
    /// while rendering identically.
    pub fn next_step(&mut self, outcome: &SendOutcome) -> Step {
        match outcome {
            SendOutcome::Accepted => Step::Delivered {
                cooldown: self.config.base_wait,
            },
            SendOutcome::RateLimited(seconds) => Step::RetryAfter(
                self.config
                    .adder
                    .saturating_add(Duration::from_secs(seconds.saturating_mul(self.config.multiplier))),
            ),
            SendOutcome::Duplicate => {
                self.text.push(' ');
                Step::RetryAfter(self.config.adder)
            }
            SendOutcome::UnknownFailure(_) => Step::RetryAfter(self.config.adder),
        }
    }
}

/// The queue consumer. Exactly one per logged-in session.
pub(crate) struct Worker {
    browser: Arc<dyn Browser>,
    queue_rx: mpsc::UnboundedReceiver<QueueItem>,
    queue_depth: Arc<AtomicUsize>,
    config: BackoffConfig,
    last_sent_text: Option<String>,
    sent_count: u64,
}

impl Worker {
    pub(crate) fn new(
        browser: Arc<dyn Browser>,
        queue_rx: mpsc::UnboundedReceiver<QueueItem>,
        queue_depth: Arc<AtomicUsize>,
        config: BackoffConfig,
    ) -> Self {
        Self {
            browser,
            queue_rx,
            queue_depth,
            config,
            last_sent_text: None,
            sent_count: 0,
        }
    }

    pub(crate) async fn run(mut self) {
        tracing::info!("send worker reporting for duty");
        while let Some(item) = self.queue_rx.recv().await {
            match item {
                QueueItem::Stop => {
                    tracing::info!(sent = self.sent_count, "send worker exits");
                    return;
                }
                QueueItem::Message(message) => {
                    self.queue_depth.fetch_sub(1, Ordering::SeqCst);
                    self.sent_count += 1;
                    tracing::info!(
                        serving = self.sent_count,
                        room_id = message.room_id,
                        text = %message.text,
                        "now serving"
                    );
                    self.deliver(message).await;
                }
            }
        }
    }

    /// Retry until the service accepts, record the sent text for the
    /// repeat guard, then cool down before the next queue item.
    async fn deliver(&mut self, message: PendingMessage) {
        let PendingMessage { room_id, text } = message;
        let mut delivery = Delivery::new(text, self.last_sent_text.as_deref(), self.config.clone());
        loop {
            let attempt = delivery.start_attempt();
            tracing::debug!(attempt, room_id, "attempt start");
            let outcome = match self.browser.post_message(room_id, delivery.text()).await {
                Ok(response) => SendOutcome::from_response(&response),
                Err(error) => SendOutcome::UnknownFailure(error.to_string()),
            };
            match delivery.next_step(&outcome) {
                Step::RetryAfter(wait) => {
                    match &outcome {
                        SendOutcome::RateLimited(seconds) => tracing::debug!(
                            attempt,
                            throttle_secs = seconds,
                            wait_secs = wait.as_secs_f64(),
                            "denied: throttled"
                        ),
                        SendOutcome::Duplicate => tracing::debug!(
                            attempt,
                            wait_secs = wait.as_secs_f64(),
                            "denied: duplicate"
                        ),
                        SendOutcome::UnknownFailure(raw) => tracing::error!(
                            attempt,
                            raw = %raw,
                            wait_secs = wait.as_secs_f64(),
                            "denied: unknown reason"
                        ),
                        SendOutcome::Accepted => {}
                    }
                    tokio::time::sleep(wait).await;
                }
                Step::Delivered { cooldown } => {
                    tracing::debug!(attempt, cooldown_secs = cooldown.as_secs_f64(), "accepted");
                    self.last_sent_text = Some(delivery.text().to_string());
                    tokio::time::sleep(cooldown).await;
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> BackoffConfig {
        BackoffConfig {
            multiplier: 2,
            adder: Duration::from_secs(5),
            base_wait: Duration::from_secs(5),
        }
    }

    #[test]
    fn classifies_payload_responses() {
        let accepted = PostResponse::Payload { id: Some(41) };
        let collided = PostResponse::Payload { id: None };
        assert_eq!(SendOutcome::from_response(&accepted), SendOutcome::Accepted);
        assert_eq!(SendOutcome::from_response(&collided), SendOutcome::Duplicate);
    }

    #[test]
    fn parses_the_throttle_sentence() {
        let raw = PostResponse::Raw("You can perform this action again in 17 seconds".into());
        assert_eq!(
            SendOutcome::from_response(&raw),
            SendOutcome::RateLimited(17)
        );
    }

    #[test]
    fn anything_else_is_an_unknown_failure() {
        let raw = PostResponse::Raw("<html>502 Bad Gateway</html>".into());
        assert_eq!(
            SendOutcome::from_response(&raw),
            SendOutcome::UnknownFailure("<html>502 Bad Gateway</html>".into())
        );
    }

    #[test]
    fn throttle_wait_is_doubled_plus_adder() {
        let mut delivery = Delivery::new("hello".into(), None, fast_config());
        delivery.start_attempt();
        let step = delivery.next_step(&SendOutcome::RateLimited(3));
        assert_eq!(step, Step::RetryAfter(Duration::from_secs(11)));
        assert_eq!(delivery.text(), "hello");
    }

    #[test]
    fn duplicate_appends_a_trailing_space_and_waits_the_adder() {
        let mut delivery = Delivery::new("hello".into(), None, fast_config());
        delivery.start_attempt();
        let step = delivery.next_step(&SendOutcome::Duplicate);
        assert_eq!(step, Step::RetryAfter(Duration::from_secs(5)));
        assert_eq!(delivery.text(), "hello ");
    }

    #[test]
    fn unknown_failure_retries_the_identical_text() {
        let mut delivery = Delivery::new("hello".into(), None, fast_config());
        delivery.start_attempt();
        let step = delivery.next_step(&SendOutcome::UnknownFailure("oops".into()));
        assert_eq!(step, Step::RetryAfter(Duration::from_secs(5)));
        assert_eq!(delivery.text(), "hello");
    }

    #[test]
    fn accepted_cools_down_for_base_wait() {
        let mut delivery = Delivery::new("hello".into(), None, fast_config());
        delivery.start_attempt();
        let step = delivery.next_step(&SendOutcome::Accepted);
        assert_eq!(
            step,
            Step::Delivered {
                cooldown: Duration::from_secs(5)
            }
        );
    }

    #[test]
    fn repeating_the_previous_send_gets_one_leading_space() {
        let delivery = Delivery::new("hello".into(), Some("hello"), fast_config());
        assert_eq!(delivery.text(), " hello");

        let different = Delivery::new("hello".into(), Some("Hello"), fast_config());
        assert_eq!(different.text(), "hello");
    }

    #[test]
    fn repeat_guard_and_duplicate_perturbation_compose() {
        // A message equal to the previous send is space-prefixed up front;
        // a duplicate rejection on top of that still appends its own space.
        let mut delivery = Delivery::new("hello".into(), Some("hello"), fast_config());
        delivery.start_attempt();
        delivery.next_step(&SendOutcome::Duplicate);
        assert_eq!(delivery.text(), " hello ");
    }

    #[test]
    fn attempt_counter_starts_at_one() {
        let mut delivery = Delivery::new("hello".into(), None, fast_config());
        assert_eq!(delivery.start_attempt(), 1);
        delivery.next_step(&SendOutcome::UnknownFailure("oops".into()));
        assert_eq!(delivery.start_attempt(), 2);
    }
}
