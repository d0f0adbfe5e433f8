//! Integration tests driving the session controller over the mock connector.

use std::sync::Arc;
use std::time::Duration;

use rps_protocol::mock::{MockConnector, MockConnectorHandle, MockPeer};
use rps_session::{
    Config, ConnectionStatus, PlayOutcome, SessionController, SessionFailure, SessionHandle,
    SessionState, TurnId,
};
use rps_types::{Choice, TurnResult};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

const WIN_5: &str = r#"{"Result":{"turn_result":"Win","game":{"score":5}}}"#;

struct TestSession {
    handle: SessionHandle,
    mock: MockConnectorHandle,
    task: JoinHandle<()>,
}

impl TestSession {
    fn start(config: Config) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new("debug"))
            .with_test_writer()
            .try_init();

        let (connector, mock) = MockConnector::new();
        let (handle, task) = SessionController::spawn_with(&config, Arc::new(connector));
        Self { handle, mock, task }
    }

    async fn next_peer(&mut self) -> MockPeer {
        tokio::time::timeout(Duration::from_secs(5), self.mock.next_peer())
            .await
            .expect("timed out waiting for connection")
            .expect("connector dropped")
    }

    async fn shutdown(self) {
        self.handle.shutdown().await;
        let _ = tokio::time::timeout(Duration::from_secs(5), self.task).await;
    }
}

/// Wait for a condition on the published state with timeout.
async fn wait_for_state(
    rx: &mut watch::Receiver<SessionState>,
    timeout: Duration,
    pred: impl Fn(&SessionState) -> bool,
) -> Result<SessionState, &'static str> {
    tokio::time::timeout(timeout, async {
        loop {
            {
                let state = rx.borrow_and_update().clone();
                if pred(&state) {
                    return Ok(state);
                }
            }
            if rx.changed().await.is_err() {
                return Err("watch closed");
            }
        }
    })
    .await
    .map_err(|_| "timeout")?
}

async fn wait_turn(handle: &SessionHandle, turn: TurnId) -> SessionState {
    tokio::time::timeout(Duration::from_secs(5), handle.wait_turn(turn))
        .await
        .expect("turn did not resolve")
}

async fn recv_frame(peer: &mut MockPeer) -> Option<String> {
    tokio::time::timeout(Duration::from_secs(5), peer.recv())
        .await
        .expect("timed out waiting for frame")
}

fn sent(outcome: PlayOutcome) -> TurnId {
    match outcome {
        PlayOutcome::Sent(turn) => turn,
        other => panic!("expected Sent, got {other:?}"),
    }
}

#[tokio::test]
async fn test_first_play_connects_and_resolves() {
    let mut session = TestSession::start(Config::default());

    let turn = sent(session.handle.play(Choice::Rock).await);
    assert_eq!(turn, TurnId(1));

    let mut peer = session.next_peer().await;
    assert_eq!(
        recv_frame(&mut peer).await.as_deref(),
        Some(r#"{"Payload":"Rock"}"#)
    );

    let state = session.handle.state();
    assert_eq!(state.connection_status, ConnectionStatus::Connected);
    assert!(state.awaiting_result);
    assert_eq!(state.turn, Some(turn));

    assert!(peer.send("Hi!"));
    assert!(peer.send(WIN_5));

    let state = wait_turn(&session.handle, turn).await;
    assert_eq!(state.score, 5);
    assert_eq!(state.last_result, Some(TurnResult::Win));
    assert!(state.last_error.is_none());
    assert_eq!(state.connection_status, ConnectionStatus::Connected);
    assert_eq!(session.mock.attempts(), 1);

    session.shutdown().await;
}

#[tokio::test]
async fn test_error_response_surfaces_reason() {
    let mut session = TestSession::start(Config::default());

    let turn = sent(session.handle.play(Choice::Paper).await);
    let mut peer = session.next_peer().await;
    recv_frame(&mut peer).await;

    assert!(peer.send(r#"{"Error":"invalid move"}"#));

    let state = wait_turn(&session.handle, turn).await;
    assert_eq!(
        state.last_error,
        Some(SessionFailure::Protocol("invalid move".to_string()))
    );
    assert_eq!(state.score, 0);
    assert!(state.last_result.is_none());
    assert_eq!(state.connection_status, ConnectionStatus::Connected);

    session.shutdown().await;
}

#[tokio::test]
async fn test_greeting_and_garbage_leave_turn_outstanding() {
    let mut session = TestSession::start(Config::default());

    let turn = sent(session.handle.play(Choice::Scissors).await);
    let mut peer = session.next_peer().await;
    recv_frame(&mut peer).await;

    assert!(peer.send("Hi!"));
    assert!(peer.send("definitely not json"));
    assert!(peer.send(r#"{"Surprise":true}"#));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let state = session.handle.state();
    assert!(state.awaiting_result);
    assert!(state.last_error.is_none());
    assert_eq!(state.score, 0);

    assert!(peer.send(WIN_5));
    let state = wait_turn(&session.handle, turn).await;
    assert_eq!(state.score, 5);

    session.shutdown().await;
}

#[tokio::test]
async fn test_play_while_awaiting_is_busy() {
    let mut session = TestSession::start(Config::default());

    let turn = sent(session.handle.play(Choice::Rock).await);
    let mut peer = session.next_peer().await;
    recv_frame(&mut peer).await;

    assert_eq!(
        session.handle.play(Choice::Paper).await,
        PlayOutcome::Busy
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(peer.try_recv(), None);
    assert_eq!(session.handle.state().turn, Some(turn));

    assert!(peer.send(WIN_5));
    wait_turn(&session.handle, turn).await;

    // Resolved: the next play goes out on the same connection.
    let next = sent(session.handle.play(Choice::Paper).await);
    assert_eq!(next, TurnId(2));
    assert_eq!(
        recv_frame(&mut peer).await.as_deref(),
        Some(r#"{"Payload":"Paper"}"#)
    );
    assert_eq!(session.mock.attempts(), 1);

    session.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_plays_share_one_attempt() {
    let mut session = TestSession::start(Config::default());
    session.mock.hold();

    let first = tokio::spawn({
        let handle = session.handle.clone();
        async move { handle.play(Choice::Rock).await }
    });
    let mut rx = session.handle.subscribe();
    wait_for_state(&mut rx, Duration::from_secs(5), |s| {
        s.connection_status == ConnectionStatus::Connecting
    })
    .await
    .unwrap();

    let second = tokio::spawn({
        let handle = session.handle.clone();
        async move { handle.play(Choice::Scissors).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.mock.release();

    let first = first.await.unwrap();
    let second = second.await.unwrap();
    assert_eq!(first, PlayOutcome::Sent(TurnId(1)));
    assert_eq!(second, PlayOutcome::Busy);
    assert_eq!(session.mock.attempts(), 1);

    let mut peer = session.next_peer().await;
    assert_eq!(
        recv_frame(&mut peer).await.as_deref(),
        Some(r#"{"Payload":"Rock"}"#)
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(peer.try_recv(), None);

    session.shutdown().await;
}

#[tokio::test]
async fn test_score_follows_last_result() {
    let mut session = TestSession::start(Config::default());

    let turn = sent(session.handle.play(Choice::Rock).await);
    let mut peer = session.next_peer().await;
    recv_frame(&mut peer).await;
    assert!(peer.send(r#"{"Result":{"turn_result":"Win","game":{"score":3}}}"#));
    wait_turn(&session.handle, turn).await;

    let replies = [
        (r#"{"Result":{"turn_result":"Lose","game":{"score":2}}}"#, 2, TurnResult::Lose),
        (r#"{"Result":{"turn_result":"Draw","game":{"score":2}}}"#, 2, TurnResult::Draw),
        (r#"{"Result":{"turn_result":"Win","game":{"score":5}}}"#, 5, TurnResult::Win),
    ];
    for (reply, score, result) in replies {
        let turn = sent(session.handle.play(Choice::Paper).await);
        recv_frame(&mut peer).await;
        assert!(peer.send(reply));
        let state = wait_turn(&session.handle, turn).await;
        assert_eq!(state.score, score);
        assert_eq!(state.last_result, Some(result));
    }
    assert_eq!(session.handle.state().turn, Some(TurnId(4)));

    session.shutdown().await;
}

#[tokio::test]
async fn test_connection_failure_then_retry() {
    let mut session = TestSession::start(Config::default());
    session.mock.fail_next("connection refused");

    assert_eq!(
        session.handle.play(Choice::Rock).await,
        PlayOutcome::Failed
    );
    let state = session.handle.state();
    assert_eq!(state.connection_status, ConnectionStatus::Disconnected);
    assert!(!state.awaiting_result);
    match state.last_error {
        Some(SessionFailure::ConnectionFailed(reason)) => {
            assert!(reason.contains("connection refused"), "{reason}");
        }
        other => panic!("expected ConnectionFailed, got {other:?}"),
    }

    let turn = sent(session.handle.play(Choice::Rock).await);
    let mut peer = session.next_peer().await;
    recv_frame(&mut peer).await;
    assert!(session.handle.state().last_error.is_none());
    assert!(peer.send(WIN_5));
    assert_eq!(wait_turn(&session.handle, turn).await.score, 5);
    assert_eq!(session.mock.attempts(), 2);

    session.shutdown().await;
}

#[tokio::test]
async fn test_peer_close_abandons_turn() {
    let mut session = TestSession::start(Config::default());

    let turn = sent(session.handle.play(Choice::Rock).await);
    let mut peer = session.next_peer().await;
    recv_frame(&mut peer).await;
    drop(peer);

    let state = wait_turn(&session.handle, turn).await;
    assert_eq!(state.connection_status, ConnectionStatus::Disconnected);
    assert!(!state.awaiting_result);
    assert!(matches!(
        state.last_error,
        Some(SessionFailure::TransportClosed(_))
    ));

    // The next play reconnects.
    sent(session.handle.play(Choice::Paper).await);
    let mut peer = session.next_peer().await;
    assert_eq!(
        recv_frame(&mut peer).await.as_deref(),
        Some(r#"{"Payload":"Paper"}"#)
    );
    assert_eq!(session.mock.attempts(), 2);

    session.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_abandons_turn_without_error() {
    let mut session = TestSession::start(Config::default());

    let turn = sent(session.handle.play(Choice::Rock).await);
    let mut old_peer = session.next_peer().await;
    recv_frame(&mut old_peer).await;

    session.handle.disconnect().await;
    let state = session.handle.state();
    assert_eq!(state.connection_status, ConnectionStatus::Disconnected);
    assert!(state.is_resolved(turn));
    assert!(state.last_error.is_none());
    assert_eq!(recv_frame(&mut old_peer).await, None);

    // Whatever the old link still delivers cannot touch the new turn.
    let next = sent(session.handle.play(Choice::Scissors).await);
    let mut peer = session.next_peer().await;
    recv_frame(&mut peer).await;
    old_peer.send(WIN_5);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let state = session.handle.state();
    assert!(state.awaiting_result);
    assert_eq!(state.score, 0);

    assert!(peer.send(r#"{"Result":{"turn_result":"Lose","game":{"score":-1}}}"#));
    let state = wait_turn(&session.handle, next).await;
    assert_eq!(state.score, -1);
    assert_eq!(state.last_result, Some(TurnResult::Lose));

    session.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_cancels_pending_play() {
    let session = TestSession::start(Config::default());
    session.mock.hold();

    let play = tokio::spawn({
        let handle = session.handle.clone();
        async move { handle.play(Choice::Rock).await }
    });
    let mut rx = session.handle.subscribe();
    wait_for_state(&mut rx, Duration::from_secs(5), |s| {
        s.connection_status == ConnectionStatus::Connecting
    })
    .await
    .unwrap();

    session.handle.disconnect().await;
    assert_eq!(play.await.unwrap(), PlayOutcome::Cancelled);

    let state = session.handle.state();
    assert_eq!(state.connection_status, ConnectionStatus::Disconnected);
    assert!(state.last_error.is_none());
    assert!(state.turn.is_none());

    session.shutdown().await;
}

#[tokio::test]
async fn test_turn_timeout_drops_connection() {
    let mut config = Config::default();
    config.session.turn_timeout_ms = Some(100);
    let mut session = TestSession::start(config);

    let turn = sent(session.handle.play(Choice::Rock).await);
    let mut peer = session.next_peer().await;
    recv_frame(&mut peer).await;

    let state = wait_turn(&session.handle, turn).await;
    assert_eq!(state.last_error, Some(SessionFailure::TurnTimedOut));
    assert_eq!(state.connection_status, ConnectionStatus::Disconnected);
    assert_eq!(recv_frame(&mut peer).await, None);

    session.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_pending_play() {
    let session = TestSession::start(Config::default());
    session.mock.hold();

    let play = tokio::spawn({
        let handle = session.handle.clone();
        async move { handle.play(Choice::Rock).await }
    });
    let mut rx = session.handle.subscribe();
    wait_for_state(&mut rx, Duration::from_secs(5), |s| {
        s.connection_status == ConnectionStatus::Connecting
    })
    .await
    .unwrap();

    session.handle.shutdown().await;
    assert_eq!(play.await.unwrap(), PlayOutcome::Stopped);
    assert_eq!(
        session.handle.play(Choice::Paper).await,
        PlayOutcome::Stopped
    );
}

#[tokio::test]
async fn test_dropping_handles_stops_controller() {
    let session = TestSession::start(Config::default());
    let TestSession { handle, task, .. } = session;

    drop(handle);
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("controller kept running")
        .unwrap();
}
