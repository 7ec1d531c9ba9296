//! `watch`: stream live visit updates for one or more shortlinks.
//!
//! Each inbound message is printed to stdout as one JSON line. The command
//! ends on Ctrl-C, when the stored credential expires, or when every stream
//! has closed.

use std::io::{self, Write};

use serde_json::{Value, json};
use tokio_stream::{StreamExt, StreamMap};
use tracing::{info, warn};

use accorcia_core::Config;
use accorcia_live::{
    RealtimeConfig, RealtimeMultiplexer, SessionManager, StompTransport, shortlink_topic,
};

/// Why the watch loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEnd {
    Interrupted,
    SessionExpired,
    StreamsClosed,
}

/// Watch `codes` with the given session until interrupted or logged out.
pub async fn run(codes: &[String], config: &Config, session: &SessionManager) -> anyhow::Result<WatchEnd> {
    if !session.is_authenticated() {
        anyhow::bail!("Not logged in. Run `accorcia auth login` first");
    }

    let transport = StompTransport::from_settings(&config.realtime);
    let mux = RealtimeMultiplexer::spawn(transport, session, RealtimeConfig::from(&config.realtime));

    let mut streams = StreamMap::new();
    for code in codes {
        streams.insert(code.clone(), mux.subscribe(shortlink_topic(code)));
    }

    let mut auth = session.authentication_state();
    let mut connection = mux.connection_state();
    let mut out = io::stdout();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let end = loop {
        tokio::select! {
            item = streams.next() => match item {
                Some((code, message)) => {
                    writeln!(out, "{}", render(&code, message))?;
                    out.flush()?;
                }
                None => break WatchEnd::StreamsClosed,
            },
            changed = auth.changed() => {
                if changed.is_err() || !auth.borrow_and_update().is_authenticated() {
                    warn!("Session expired, stopping");
                    break WatchEnd::SessionExpired;
                }
            }
            Ok(()) = connection.changed() => {
                let state = *connection.borrow_and_update();
                info!(%state, "Connection state changed");
            }
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break WatchEnd::Interrupted;
            }
        }
    };

    mux.shutdown().await;
    Ok(end)
}

/// One output line: the short code alongside the decoded message.
fn render(code: &str, message: Value) -> String {
    json!({ "code": code, "update": message }).to_string()
}
