//! End-to-end tests of the serialized send pipeline against the scripted
//! browser. Waits are tuned to zero so the retry loops run instantly;
//! the exact backoff arithmetic is covered by the unit tests in `sender`.

use std::sync::Arc;
use std::time::Duration;

use sechat_sdk::sender::BackoffConfig;
use sechat_sdk::testing::ScriptedBrowser;
use sechat_sdk::{Credentials, PostResponse, Session};

const ROOM: u64 = 11540;

fn instant_config() -> BackoffConfig {
    BackoffConfig {
        multiplier: 2,
        adder: Duration::ZERO,
        base_wait: Duration::ZERO,
    }
}

fn credentials() -> Credentials {
    Credentials {
        email: "bot@example.com".into(),
        password: "hunter2".into(),
    }
}

fn texts(browser: &ScriptedBrowser) -> Vec<String> {
    browser.posts().into_iter().map(|(_, text)| text).collect()
}

#[tokio::test]
async fn messages_go_out_in_enqueue_order() {
    let browser = Arc::new(ScriptedBrowser::new());
    let mut session = Session::with_config(browser.clone(), instant_config());
    session.login("SE", &credentials()).await.unwrap();

    for i in 0..5 {
        session.send_message(ROOM, &format!("message {i}")).unwrap();
    }
    session.logout().unwrap().await.unwrap();

    let expected: Vec<String> = (0..5).map(|i| format!("message {i}")).collect();
    assert_eq!(texts(&browser), expected);
}

#[tokio::test]
async fn throttled_message_is_retried_with_the_same_text() {
    let browser = Arc::new(
        ScriptedBrowser::new().with_response(PostResponse::Raw(
            "You can perform this action again in 0 seconds".into(),
        )),
    );
    let mut session = Session::with_config(browser.clone(), instant_config());
    session.login("SE", &credentials()).await.unwrap();

    session.send_message(ROOM, "patience").unwrap();
    session.logout().unwrap().await.unwrap();

    assert_eq!(texts(&browser), vec!["patience", "patience"]);
}

#[tokio::test]
async fn duplicate_collision_retries_with_a_trailing_space() {
    let browser =
        Arc::new(ScriptedBrowser::new().with_response(PostResponse::Payload { id: None }));
    let mut session = Session::with_config(browser.clone(), instant_config());
    session.login("SE", &credentials()).await.unwrap();

    session.send_message(ROOM, "hi").unwrap();
    session.logout().unwrap().await.unwrap();

    assert_eq!(texts(&browser), vec!["hi", "hi "]);
}

#[tokio::test]
async fn repeating_the_previous_send_gets_a_leading_space() {
    let browser = Arc::new(ScriptedBrowser::new());
    let mut session = Session::with_config(browser.clone(), instant_config());
    session.login("SE", &credentials()).await.unwrap();

    session.send_message(ROOM, "again").unwrap();
    session.send_message(ROOM, "again").unwrap();
    session.send_message(ROOM, "different").unwrap();
    session.logout().unwrap().await.unwrap();

    assert_eq!(texts(&browser), vec!["again", " again", "different"]);
}

#[tokio::test]
async fn unknown_failures_never_halt_the_worker() {
    let browser = Arc::new(
        ScriptedBrowser::new()
            .with_response(PostResponse::Raw("<html>502 Bad Gateway</html>".into()))
            .with_response(PostResponse::Raw("something else broke".into()))
            .with_response(PostResponse::Raw("and again".into())),
    );
    let mut session = Session::with_config(browser.clone(), instant_config());
    session.login("SE", &credentials()).await.unwrap();

    session.send_message(ROOM, "stubborn").unwrap();
    session.send_message(ROOM, "next one").unwrap();
    session.logout().unwrap().await.unwrap();

    // Four attempts for the first message, then the queue keeps moving.
    assert_eq!(
        texts(&browser),
        vec!["stubborn", "stubborn", "stubborn", "stubborn", "next one"]
    );
}

#[tokio::test]
async fn pending_messages_ahead_of_the_stop_marker_still_go_out() {
    let browser = Arc::new(ScriptedBrowser::new());
    let mut session = Session::with_config(browser.clone(), instant_config());
    session.login("SE", &credentials()).await.unwrap();

    session.send_message(ROOM, "first").unwrap();
    session.send_message(ROOM, "second").unwrap();
    let worker = session.logout().unwrap();
    worker.await.unwrap();

    assert_eq!(texts(&browser), vec!["first", "second"]);
}
