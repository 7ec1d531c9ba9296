use std::time::Duration;

use serde_json::json;
use tokio::time::{Instant, timeout};

use super::*;
use crate::test_support::login_response;
use crate::transport::mock::{MockCall, MockTransport};

const WAIT: Duration = Duration::from_secs(60);

struct Fixture {
    session: SessionManager,
    transport: MockTransport,
    mux: RealtimeMultiplexer,
    state: watch::Receiver<ConnectionState>,
}

fn fixture_with(config: RealtimeConfig) -> Fixture {
    let session = SessionManager::with_defaults();
    let transport = MockTransport::new();
    let mux = RealtimeMultiplexer::spawn(transport.clone(), &session, config);
    let state = mux.connection_state();
    Fixture {
        session,
        transport,
        mux,
        state,
    }
}

fn fixture() -> Fixture {
    fixture_with(RealtimeConfig::default())
}

async fn wait_for_state(rx: &mut watch::Receiver<ConnectionState>, want: ConnectionState) {
    timeout(WAIT, rx.wait_for(|s| *s == want))
        .await
        .unwrap_or_else(|_| panic!("never reached {want}"))
        .unwrap();
}

async fn wait_until(transport: &MockTransport, pred: impl Fn(&MockTransport) -> bool) {
    timeout(WAIT, transport.wait_until(pred))
        .await
        .expect("transport condition not reached");
}

async fn next_msg(stream: &mut MessageStream) -> Value {
    timeout(WAIT, stream.recv())
        .await
        .expect("no message within limit")
        .expect("stream ended")
}

async fn assert_silent(stream: &mut MessageStream) {
    assert!(
        timeout(Duration::from_millis(200), stream.recv()).await.is_err(),
        "unexpected message on {}",
        stream.topic()
    );
}

fn count_calls(transport: &MockTransport, pred: impl Fn(&MockCall) -> bool) -> usize {
    transport.calls().iter().filter(|c| pred(c)).count()
}

#[tokio::test(start_paused = true)]
async fn follows_login_and_logout() {
    let mut f = fixture();
    assert_eq!(*f.state.borrow(), ConnectionState::Disconnected);

    let login = login_response("alice", 600);
    let token = login.token.clone();
    f.session.login(login);
    wait_for_state(&mut f.state, ConnectionState::Connected).await;
    assert_eq!(f.transport.connect_count(), 1);
    assert_eq!(f.transport.calls()[0], MockCall::Connect { bearer: token });

    f.session.logout();
    wait_for_state(&mut f.state, ConnectionState::Disconnected).await;
    assert!(!f.transport.is_connected());
}

#[tokio::test(start_paused = true)]
async fn topic_queued_while_disconnected_activates_on_connect() {
    let mut f = fixture();
    let mut stream = f.mux.subscribe("/topic/url/abc");

    assert!(!f.transport.inject("/topic/url/abc", "{}"));
    assert_silent(&mut stream).await;

    f.session.login(login_response("alice", 600));
    wait_for_state(&mut f.state, ConnectionState::Connected).await;
    wait_until(&f.transport, |t| t.handle_for("/topic/url/abc").is_some()).await;

    assert!(f.transport.inject("/topic/url/abc", r#"{"visitCount":1}"#));
    assert_eq!(next_msg(&mut stream).await, json!({"visitCount": 1}));
}

#[tokio::test(start_paused = true)]
async fn shared_topic_is_reference_counted() {
    let f = fixture();
    f.session.login(login_response("alice", 600));

    let mut first = f.mux.subscribe("/topic/url/a");
    let mut second = f.mux.subscribe("/topic/url/a");
    wait_until(&f.transport, |t| t.handle_for("/topic/url/a").is_some()).await;

    f.mux.unsubscribe("/topic/url/a");
    assert_eq!(f.mux.stats().await.consumers, 1);

    assert!(f.transport.inject("/topic/url/a", r#"{"n":1}"#));
    assert_eq!(next_msg(&mut second).await, json!({"n": 1}));
    assert_eq!(next_msg(&mut first).await, json!({"n": 1}));

    let subscribes = count_calls(&f.transport, |c| matches!(c, MockCall::Subscribe { .. }));
    assert_eq!(subscribes, 1, "one transport subscription per topic");
}

#[tokio::test(start_paused = true)]
async fn last_unsubscribe_releases_transport_handle() {
    let f = fixture();
    f.session.login(login_response("alice", 600));
    let mut stream = f.mux.subscribe("/topic/url/a");
    wait_until(&f.transport, |t| t.handle_for("/topic/url/a").is_some()).await;
    let handle = f.transport.handle_for("/topic/url/a").unwrap();

    f.mux.unsubscribe("/topic/url/a");
    wait_until(&f.transport, |t| t.active_topics().is_empty()).await;

    assert!(f.transport.calls().contains(&MockCall::Unsubscribe {
        handle: handle.to_string()
    }));
    assert_eq!(timeout(WAIT, stream.recv()).await.unwrap(), None);
    assert_eq!(f.mux.stats().await, MultiplexerStats::default());
}

#[tokio::test(start_paused = true)]
async fn dropped_connection_reconnects_and_resubscribes() {
    let mut f = fixture();
    f.session.login(login_response("alice", 600));
    let mut stream = f.mux.subscribe("/topic/url/abc");
    wait_until(&f.transport, |t| t.handle_for("/topic/url/abc").is_some()).await;
    let old_handle = f.transport.handle_for("/topic/url/abc").unwrap();

    let dropped_at = Instant::now();
    f.transport.drop_connection("server restart");
    wait_for_state(&mut f.state, ConnectionState::Reconnecting).await;
    wait_for_state(&mut f.state, ConnectionState::Connected).await;
    assert!(dropped_at.elapsed() >= Duration::from_secs(5));

    wait_until(&f.transport, |t| t.handle_for("/topic/url/abc").is_some()).await;
    let new_handle = f.transport.handle_for("/topic/url/abc").unwrap();
    assert_ne!(old_handle, new_handle);
    // Old handles are discarded, not unsubscribed.
    assert_eq!(
        count_calls(&f.transport, |c| matches!(c, MockCall::Unsubscribe { .. })),
        0
    );

    let body = json!({
        "shortCode": "abc",
        "visitCount": 7,
        "lastVisit": {
            "visitDate": "2024-05-01T10:00:00",
            "ipAddress": "203.0.113.9",
            "userAgent": "curl/8.0"
        }
    });
    assert!(f.transport.inject("/topic/url/abc", &body.to_string()));
    assert_eq!(next_msg(&mut stream).await, body);
}

#[tokio::test(start_paused = true)]
async fn logout_tears_down_every_handle() {
    let mut f = fixture();
    f.session.login(login_response("alice", 600));
    let mut a = f.mux.subscribe("/topic/url/a");
    let mut b = f.mux.subscribe("/topic/url/b");
    wait_until(&f.transport, |t| t.active_topics().len() == 2).await;
    let handles = [
        f.transport.handle_for("/topic/url/a").unwrap(),
        f.transport.handle_for("/topic/url/b").unwrap(),
    ];

    f.session.logout();
    wait_for_state(&mut f.state, ConnectionState::Disconnected).await;

    let calls = f.transport.calls();
    for handle in &handles {
        assert!(calls.contains(&MockCall::Unsubscribe {
            handle: handle.to_string()
        }));
    }
    assert!(calls.iter().any(|c| matches!(c, MockCall::Disconnect { .. })));
    assert!(!f.transport.is_connected());

    // Still registered, but nothing flows until a new login.
    let mut again = f.mux.subscribe("/topic/url/a");
    assert_eq!(f.mux.stats().await.desired_topics, 2);
    assert_eq!(f.mux.stats().await.active_topics, 0);
    assert!(!f.transport.inject("/topic/url/a", "{}"));
    assert_silent(&mut again).await;

    f.session.login(login_response("alice", 600));
    wait_for_state(&mut f.state, ConnectionState::Connected).await;
    wait_until(&f.transport, |t| t.active_topics().len() == 2).await;

    assert!(f.transport.inject("/topic/url/a", r#"{"n":2}"#));
    assert_eq!(next_msg(&mut again).await, json!({"n": 2}));
    assert_eq!(next_msg(&mut a).await, json!({"n": 2}));
    assert_silent(&mut b).await;
}

#[tokio::test(start_paused = true)]
async fn frame_in_flight_at_logout_is_not_delivered() {
    let mut f = fixture();
    f.session.login(login_response("alice", 600));
    let mut a = f.mux.subscribe("/topic/url/a");
    wait_until(&f.transport, |t| t.active_topics().len() == 1).await;

    // Queued on the transport, then logged out before the actor runs.
    assert!(f.transport.inject("/topic/url/a", r#"{"late":true}"#));
    f.session.logout();
    wait_for_state(&mut f.state, ConnectionState::Disconnected).await;

    assert_silent(&mut a).await;
    assert_eq!(f.mux.stats().await.active_topics, 0);
}

#[tokio::test(start_paused = true)]
async fn failed_connect_retries_after_fixed_delay() {
    let mut f = fixture();
    f.transport.fail_next_connects(2);

    let started = Instant::now();
    f.session.login(login_response("alice", 600));
    wait_for_state(&mut f.state, ConnectionState::Connected).await;

    assert_eq!(f.transport.connect_count(), 3);
    assert!(started.elapsed() >= Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn logout_cancels_pending_retry() {
    let mut f = fixture();
    f.transport.fail_next_connects(10);
    f.session.login(login_response("alice", 600));
    wait_for_state(&mut f.state, ConnectionState::Reconnecting).await;

    f.session.logout();
    wait_for_state(&mut f.state, ConnectionState::Disconnected).await;

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(f.transport.connect_count(), 1);
    assert_eq!(*f.state.borrow(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn bounded_policy_gives_up() {
    let mut f = fixture_with(RealtimeConfig {
        reconnect: ReconnectPolicy {
            max_attempts: Some(1),
            ..Default::default()
        },
    });
    f.transport.fail_next_connects(10);
    f.session.login(login_response("alice", 600));
    wait_for_state(&mut f.state, ConnectionState::Reconnecting).await;
    wait_for_state(&mut f.state, ConnectionState::Disconnected).await;

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(f.transport.connect_count(), 2);

    // A fresh login starts over.
    f.transport.fail_next_connects(0);
    f.session.login(login_response("alice", 600));
    wait_for_state(&mut f.state, ConnectionState::Connected).await;
}

#[tokio::test(start_paused = true)]
async fn new_login_supersedes_pending_connect() {
    let mut f = fixture();
    f.transport.hold_connects(true);

    f.session.login(login_response("alice", 600));
    wait_until(&f.transport, |t| t.connect_count() == 1).await;

    f.session.logout();
    let second = login_response("bob", 600);
    let token = second.token.clone();
    f.session.login(second);
    wait_until(&f.transport, |t| t.connect_count() == 2).await;

    f.transport.hold_connects(false);
    wait_for_state(&mut f.state, ConnectionState::Connected).await;
    assert_eq!(
        f.transport.calls().last(),
        Some(&MockCall::Connect { bearer: token })
    );

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(f.transport.connect_count(), 2);
    assert_eq!(*f.state.borrow(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn session_expiry_disconnects() {
    let mut f = fixture();
    f.session.login(login_response("alice", 3));
    wait_for_state(&mut f.state, ConnectionState::Connected).await;

    wait_for_state(&mut f.state, ConnectionState::Disconnected).await;
    assert!(!f.session.is_authenticated());
    assert!(!f.transport.is_connected());
}

#[tokio::test(start_paused = true)]
async fn unsubscribe_all_cuts_off_buffered_messages() {
    let f = fixture();
    f.session.login(login_response("alice", 600));
    let mut a = f.mux.subscribe("/topic/url/a");
    let mut b = f.mux.subscribe("/topic/url/b");
    wait_until(&f.transport, |t| t.active_topics().len() == 2).await;

    f.transport.inject("/topic/url/a", r#"{"n":1}"#);
    f.transport.inject("/topic/url/b", r#"{"n":2}"#);
    // Events are routed in order, so `a` already holds its message.
    assert_eq!(next_msg(&mut b).await, json!({"n": 2}));

    f.mux.unsubscribe_all();
    assert_eq!(a.recv().await, None);
    assert_eq!(b.recv().await, None);

    wait_until(&f.transport, |t| t.active_topics().is_empty()).await;
    assert_eq!(
        count_calls(&f.transport, |c| matches!(c, MockCall::Unsubscribe { .. })),
        2
    );
    assert_eq!(f.mux.stats().await, MultiplexerStats::default());
}

#[tokio::test(start_paused = true)]
async fn subscribe_after_unsubscribe_all_works() {
    let f = fixture();
    f.session.login(login_response("alice", 600));
    let _old = f.mux.subscribe("/topic/url/a");
    f.mux.unsubscribe_all();

    let mut fresh = f.mux.subscribe("/topic/url/a");
    wait_until(&f.transport, |t| t.handle_for("/topic/url/a").is_some()).await;
    assert!(f.transport.inject("/topic/url/a", r#"{"n":1}"#));
    assert_eq!(next_msg(&mut fresh).await, json!({"n": 1}));
}

#[tokio::test(start_paused = true)]
async fn undecodable_body_is_dropped() {
    let f = fixture();
    f.session.login(login_response("alice", 600));
    let mut stream = f.mux.subscribe("/topic/url/a");
    wait_until(&f.transport, |t| t.handle_for("/topic/url/a").is_some()).await;

    f.transport.inject("/topic/url/a", "not json");
    f.transport.inject("/topic/url/a", r#"{"ok":true}"#);
    assert_eq!(next_msg(&mut stream).await, json!({"ok": true}));
    assert_eq!(*f.state.borrow(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn frames_from_stale_handles_are_dropped() {
    let f = fixture();
    f.session.login(login_response("alice", 600));
    let _first = f.mux.subscribe("/topic/url/a");
    wait_until(&f.transport, |t| t.handle_for("/topic/url/a").is_some()).await;
    let stale = f.transport.handle_for("/topic/url/a").unwrap();

    f.mux.unsubscribe("/topic/url/a");
    let mut stream = f.mux.subscribe("/topic/url/a");
    wait_until(&f.transport, |t| {
        t.handle_for("/topic/url/a")
            .is_some_and(|h| h != stale)
    })
    .await;

    f.transport
        .inject_with_handle(&stale, "/topic/url/a", r#"{"stale":true}"#);
    f.transport.inject("/topic/url/a", r#"{"stale":false}"#);
    assert_eq!(next_msg(&mut stream).await, json!({"stale": false}));
}

#[tokio::test(start_paused = true)]
async fn stats_count_topics_and_consumers() {
    let f = fixture();
    let _a1 = f.mux.subscribe("/topic/url/a");
    let _a2 = f.mux.subscribe("/topic/url/a");
    let _b = f.mux.subscribe("/topic/url/b");
    assert_eq!(
        f.mux.stats().await,
        MultiplexerStats {
            desired_topics: 2,
            active_topics: 0,
            consumers: 3,
        }
    );

    f.session.login(login_response("alice", 600));
    wait_until(&f.transport, |t| t.active_topics().len() == 2).await;
    assert_eq!(f.mux.stats().await.active_topics, 2);
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_connection_and_ends_streams() {
    let mut f = fixture();
    f.session.login(login_response("alice", 600));
    let mut stream = f.mux.subscribe("/topic/url/a");
    wait_for_state(&mut f.state, ConnectionState::Connected).await;

    f.mux.shutdown().await;
    assert_eq!(*f.state.borrow(), ConnectionState::Disconnected);
    assert!(!f.transport.is_connected());
    assert_eq!(timeout(WAIT, stream.recv()).await.unwrap(), None);
    assert_eq!(f.mux.stats().await, MultiplexerStats::default());
}
