//! Echo bot demo.
//!
//! Drives a full session end to end against the scripted in-memory
//! browser: login, join, watch the room over the push socket, echo every
//! posted message back, then log out cleanly. Swap the scripted browser
//! for a real transport implementation to run it against the live
//! service.
//!
//! Usage:
//!   cargo run --bin echo-bot -- --site SE --room 11540

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use sechat_sdk::sender::BackoffConfig;
use sechat_sdk::testing::{activity_for, ScriptedBrowser};
use sechat_sdk::{Credentials, EventKind, EventType, Session};
use serde_json::json;

#[derive(Parser)]
#[command(name = "echo-bot", about = "Sechat echo bot demo")]
struct Args {
    /// Site identifier: SE, SO or MSE.
    #[arg(long, default_value = "SE")]
    site: String,

    /// Room to join and echo in.
    #[arg(long, default_value_t = 11540)]
    room: u64,

    /// Account email (demo value; the scripted browser accepts anything).
    #[arg(long, env = "SECHAT_EMAIL", default_value = "echo-bot@example.com")]
    email: String,

    /// Account password.
    #[arg(long, env = "SECHAT_PASSWORD", default_value = "hunter2")]
    password: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    let room = args.room;

    let browser = Arc::new(ScriptedBrowser::new());
    let mut session = Session::with_config(
        browser.clone(),
        // Short waits so the demo finishes promptly.
        BackoffConfig {
            adder: Duration::from_millis(50),
            base_wait: Duration::from_millis(50),
            ..Default::default()
        },
    );

    let credentials = Credentials {
        email: args.email,
        password: args.password,
    };
    session.login(&args.site, &credentials).await?;
    session.join_room(room).await?;

    let watcher = session
        .watch_room_socket(room, move |event, handle| {
            if event.kind != EventKind::Known(EventType::MessagePosted) {
                return;
            }
            let text = event.text_content().unwrap_or_default();
            let from = event.user_name.clone().unwrap_or_default();
            tracing::info!(%from, %text, "heard");
            if let Err(error) = handle.send_message(room, &format!("echo: {text}")) {
                tracing::error!(error = %error, "echo failed");
            }
        })
        .await?;

    // Feed a little scripted traffic through the watch stream.
    for (i, line) in ["hello there", "anyone <b>home</b>?"].iter().enumerate() {
        let record = json!({
            "event_type": 1,
            "id": 100 + i,
            "room_id": room,
            "room_name": "Demo",
            "time_stamp": 1_700_000_000 + i,
            "content": line,
            "user_name": "alice",
            "user_id": 42,
            "message_id": 900 + i,
        });
        browser.push_activity(activity_for(room, vec![record])).await;
    }
    browser.close_activity();
    watcher.await??;

    let worker = session.logout()?;
    worker.await?;

    for (room_id, text) in browser.posts() {
        println!("sent to #{room_id}: {text}");
    }
    Ok(())
}
