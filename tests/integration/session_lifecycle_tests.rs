//! Session open, handshake failures, heartbeat, events and idempotent close.

use std::time::Duration;

use artemis_bot::orchestrator::{RESULT_TOPIC, SUBMISSION_TOPIC};
use artemis_bot::sockjs::{Command, Session, SessionEvent, SessionOptions, SessionState};
use artemis_bot::AppError;

use super::test_helpers::{
    connect, result_message, wait_until, FakeServer, ServerOptions, TEST_COOKIE,
};

async fn next_event(session: &mut Session) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), session.next_event())
        .await
        .expect("event in time")
}

fn assert_handshake_error(result: artemis_bot::Result<Session>) {
    match result {
        Err(AppError::Handshake(_)) => {}
        Err(other) => panic!("expected handshake error, got {other}"),
        Ok(session) => panic!("expected handshake error, got session {}", session.id()),
    }
}

#[tokio::test]
async fn handshake_negotiates_session_and_heartbeat() {
    let server = FakeServer::start_with(ServerOptions {
        heart_beat: Some("25000,0".into()),
        ..ServerOptions::default()
    })
    .await;

    let session = connect(&server).await.expect("session opens");

    assert_eq!(session.id(), "sess1");
    assert_eq!(session.heartbeat_interval(), Duration::from_millis(25_000));
    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(server.stats.handshakes(), 1);
    assert_eq!(
        server.stats.connect_frames(),
        vec![r#"["CONNECT\naccept-version:1.2\nheart-beat:10000,10000\n\n\u0000"]"#.to_owned()]
    );
    assert_eq!(server.stats.cookies(), vec![TEST_COOKIE.to_owned()]);
    assert_eq!(server.stats.origins(), vec!["http://artemis.test/api".to_owned()]);

    session.close().await;
}

#[tokio::test]
async fn missing_session_header_fails_the_handshake() {
    let server = FakeServer::start_with(ServerOptions {
        send_session: false,
        ..ServerOptions::default()
    })
    .await;
    assert_handshake_error(connect(&server).await);
}

#[tokio::test]
async fn missing_heart_beat_header_fails_the_handshake() {
    let server = FakeServer::start_with(ServerOptions {
        heart_beat: None,
        ..ServerOptions::default()
    })
    .await;
    assert_handshake_error(connect(&server).await);
}

#[tokio::test]
async fn zero_heart_beat_fails_the_handshake() {
    let server = FakeServer::start_with(ServerOptions {
        heart_beat: Some("0,0".into()),
        ..ServerOptions::default()
    })
    .await;
    assert_handshake_error(connect(&server).await);
}

#[tokio::test]
async fn unanswered_connect_times_out() {
    let server = FakeServer::start_with(ServerOptions {
        answer_connect: false,
        ..ServerOptions::default()
    })
    .await;
    let options = SessionOptions {
        heartbeat: Duration::from_secs(10),
        handshake_timeout: Duration::from_millis(200),
    };
    assert_handshake_error(Session::open(&server.endpoint(), &[], &options).await);
}

#[tokio::test]
async fn unreachable_endpoint_is_a_connection_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let result = Session::open(
        &format!("ws://{addr}/websocket/0/a/websocket"),
        &[],
        &SessionOptions::default(),
    )
    .await;
    assert!(matches!(result, Err(AppError::Connection(_))));
}

#[tokio::test]
async fn pings_follow_the_negotiated_interval() {
    let server = FakeServer::start_with(ServerOptions {
        heart_beat: Some("50,50".into()),
        ..ServerOptions::default()
    })
    .await;
    let session = connect(&server).await.expect("session opens");

    wait_until(|| server.stats.pings() >= 3).await;
    session.close().await;
}

#[tokio::test]
async fn subscriptions_use_session_scoped_ids() {
    let server = FakeServer::start().await;
    let session = connect(&server).await.expect("session opens");

    let first = session.subscribe(SUBMISSION_TOPIC).await.expect("subscribed");
    let second = session.subscribe(RESULT_TOPIC).await.expect("subscribed");
    assert_eq!(first.id, "sess1-1");
    assert_eq!(second.id, "sess1-2");
    assert_eq!(second.destination, RESULT_TOPIC);

    wait_until(|| server.stats.subscriptions().len() == 2).await;
    assert_eq!(
        server.stats.subscriptions(),
        vec![
            ("sess1-1".to_owned(), SUBMISSION_TOPIC.to_owned()),
            ("sess1-2".to_owned(), RESULT_TOPIC.to_owned()),
        ]
    );
    session.close().await;
}

#[tokio::test]
async fn parse_errors_do_not_stop_the_session() {
    let server = FakeServer::start().await;
    let mut session = connect(&server).await.expect("session opens");

    server.send("a[\"GARBAGE\"]");
    server.send(r#"a["\n"]"#);
    server.send(result_message(42.0));

    let mut parse_errors = 0;
    let mut frames = Vec::new();
    while parse_errors + frames.len() < 2 {
        match next_event(&mut session).await {
            SessionEvent::Error(AppError::Parse(_)) => parse_errors += 1,
            SessionEvent::Frame(frame) => frames.push(frame),
            other => panic!("unexpected event {other:?}"),
        }
    }

    assert_eq!(parse_errors, 1);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].command, Command::Message);
    assert_eq!(frames[0].destination(), Some(RESULT_TOPIC));
    assert_eq!(session.state(), SessionState::Connected);
    session.close().await;
}

#[tokio::test]
async fn peer_close_signals_closure() {
    let server = FakeServer::start().await;
    let mut session = connect(&server).await.expect("session opens");

    server.close_connection();

    loop {
        match next_event(&mut session).await {
            SessionEvent::Closed => break,
            SessionEvent::Error(_) => {}
            SessionEvent::Frame(frame) => panic!("unexpected frame {frame:?}"),
        }
    }
    assert!(session.is_closed());
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn frames_received_before_closure_are_not_lost() {
    let server = FakeServer::start().await;
    let mut session = connect(&server).await.expect("session opens");

    server.send(result_message(10.0));
    server.send(result_message(20.0));
    server.close_connection();
    wait_until(|| server.stats.closes() == 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut frames = 0;
    loop {
        match next_event(&mut session).await {
            SessionEvent::Frame(_) => frames += 1,
            SessionEvent::Error(_) => {}
            SessionEvent::Closed => break,
        }
    }
    assert_eq!(frames, 2);
}

#[tokio::test]
async fn closing_twice_is_harmless() {
    let server = FakeServer::start().await;
    let mut session = connect(&server).await.expect("session opens");

    session.close().await;
    session.close().await;

    assert_eq!(session.state(), SessionState::Closed);
    assert!(matches!(next_event(&mut session).await, SessionEvent::Closed));
    assert!(matches!(next_event(&mut session).await, SessionEvent::Closed));
    wait_until(|| server.stats.closes() == 1).await;
}

#[tokio::test]
async fn concurrent_closes_complete() {
    let server = FakeServer::start().await;
    let session = connect(&server).await.expect("session opens");
    let closer = session.closer();
    let other = session.closer();

    tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(session.close(), closer.close(), other.close());
    })
    .await
    .expect("closes complete without deadlock");

    assert!(session.is_closed());
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn close_unblocks_a_pending_read() {
    let server = FakeServer::start().await;
    let mut session = connect(&server).await.expect("session opens");
    let closer = session.closer();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        closer.close().await;
    });

    assert!(matches!(next_event(&mut session).await, SessionEvent::Closed));
}

#[tokio::test]
async fn subscribe_after_close_fails() {
    let server = FakeServer::start().await;
    let session = connect(&server).await.expect("session opens");
    session.close().await;

    let result = session.subscribe(SUBMISSION_TOPIC).await;
    assert!(matches!(result, Err(AppError::Subscription(_))));
}
