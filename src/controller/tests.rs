use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::sleep;

use super::*;
use crate::protocol::frame::tests::frame;
use crate::protocol::FRAME_LEN;
use crate::storage::MemoryStore;
use crate::transport::mock::ConnectBehavior;
use crate::transport::MockTransport;

const OP_TIMEOUT: Duration = Duration::from_millis(500);

struct Harness {
    transport: Arc<MockTransport>,
    log: Arc<CircularSampleLog<MemoryStore>>,
    handle: ControllerHandle,
}

fn harness_with(transport: MockTransport, settings: DeviceSettings) -> Harness {
    let transport = Arc::new(transport);
    let log = Arc::new(CircularSampleLog::create_in(MemoryStore::new(), 100).unwrap());
    let handle = ConnectionController::spawn(
        Arc::clone(&transport) as Arc<dyn Transport>,
        Arc::clone(&log),
        settings,
        OP_TIMEOUT,
    );
    Harness {
        transport,
        log,
        handle,
    }
}

fn harness() -> Harness {
    harness_with(MockTransport::new(), DeviceSettings::default())
}

/// A clean frame `depth_ft` deep, battery nibble 3, 70 °F.
fn sonar_frame(depth_ft: u8) -> [u8; FRAME_LEN] {
    frame([83, 70, 0, 0, 0, 0, depth_ft, 0, 128, 0, 0, 0x30, 70, 0, 0, 0, 0])
}

fn drain_states(rx: &mut broadcast::Receiver<ControllerEvent>) -> Vec<ConnectionState> {
    let mut states = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let ControllerEvent::StateChanged(state) = event {
            states.push(state);
        }
    }
    states
}

async fn settle() {
    sleep(Duration::from_millis(10)).await;
}

async fn connect_ready(h: &Harness) {
    h.handle.connect(DeviceId::new("sonar")).await.unwrap();
    h.handle
        .wait_for_state(ConnectionState::Ready)
        .await
        .unwrap();
    settle().await;
}

#[tokio::test(start_paused = true)]
async fn test_connect_walks_lifecycle_and_sends_configuration() {
    let h = harness();
    let mut events = h.handle.subscribe();
    connect_ready(&h).await;

    assert_eq!(
        drain_states(&mut events),
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Ready
        ]
    );
    assert_eq!(
        h.transport.sent(),
        vec![DeviceSettings::default().command().encode().to_vec()]
    );
    let stats = h.handle.stats().await.unwrap();
    assert_eq!(stats.state, ConnectionState::Ready);
    assert_eq!(stats.device, Some(DeviceId::new("sonar")));
}

#[tokio::test(start_paused = true)]
async fn test_notifications_are_filtered_and_persisted() {
    let h = harness();
    let mut events = h.handle.subscribe();
    connect_ready(&h).await;
    h.handle
        .update_location(Location::new(47.6, -122.3))
        .await
        .unwrap();
    settle().await;

    assert!(h.transport.notify(&sonar_frame(10)));
    assert!(h.transport.notify(&sonar_frame(10)));
    assert!(h.transport.notify(&[0u8; 7]));
    assert!(h.transport.notify(&sonar_frame(20)));
    settle().await;

    let stats = h.handle.stats().await.unwrap();
    assert_eq!(stats.decoded, 3);
    assert_eq!(stats.accepted, 2);
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.dropped_frames, 1);
    assert_eq!(stats.state, ConnectionState::Ready);

    let stored = h.log.snapshot_all().unwrap();
    assert_eq!(stored.len(), 2);
    assert!((stored[1].depth_m - 20.0 * 0.3048).abs() < 1e-4);
    assert_eq!(stored[0].latitude, 47.6);

    let emitted: Vec<Sample> = std::iter::from_fn(|| events.try_recv().ok())
        .filter_map(|event| match event {
            ControllerEvent::Sample(sample) => Some(sample),
            _ => None,
        })
        .collect();
    assert_eq!(emitted.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_configure_sends_command_only_when_ready() {
    let h = harness();
    let tuned = DeviceSettings {
        sensitivity: 9,
        noise: 2,
        range: 3,
        ..DeviceSettings::default()
    };
    h.handle.configure(tuned.clone()).await.unwrap();
    settle().await;
    assert_eq!(h.transport.call_count("send"), 0);

    connect_ready(&h).await;
    assert_eq!(h.transport.sent(), vec![tuned.command().encode().to_vec()]);

    let retuned = DeviceSettings {
        range: 7,
        ..tuned
    };
    h.handle.configure(retuned.clone()).await.unwrap();
    settle().await;
    assert_eq!(h.transport.sent().len(), 2);
    assert_eq!(h.transport.sent()[1], retuned.command().encode().to_vec());
}

#[tokio::test(start_paused = true)]
async fn test_configure_applies_thresholds_immediately() {
    let h = harness();
    connect_ready(&h).await;

    h.transport.notify(&sonar_frame(10));
    h.transport.notify(&sonar_frame(11));
    settle().await;
    let stats = h.handle.stats().await.unwrap();
    assert_eq!((stats.accepted, stats.rejected), (1, 1));

    // 1 ft is below the default 0.5 m depth threshold but above 0.1 m.
    let sensitive = DeviceSettings {
        thresholds: Thresholds {
            min_delta_depth_m: 0.1,
            ..Thresholds::default()
        },
        ..DeviceSettings::default()
    };
    h.handle.configure(sensitive).await.unwrap();
    h.transport.notify(&sonar_frame(11));
    settle().await;

    let stats = h.handle.stats().await.unwrap();
    assert_eq!((stats.accepted, stats.rejected), (2, 1));
    assert_eq!(h.log.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_configure_rearms_watchdog_with_new_period() {
    let h = harness_with(
        MockTransport::new(),
        DeviceSettings {
            sample_timeout: Duration::from_secs(5),
            ..DeviceSettings::default()
        },
    );
    connect_ready(&h).await;

    h.handle
        .configure(DeviceSettings {
            sample_timeout: Duration::from_secs(1),
            ..DeviceSettings::default()
        })
        .await
        .unwrap();

    // Grace tick at 1 s, forced reconnect at 2 s; the old period would not
    // have fired before 10 s.
    sleep(Duration::from_millis(1500)).await;
    assert_eq!(h.transport.call_count("disconnect"), 0);
    sleep(Duration::from_millis(1000)).await;
    assert_eq!(h.transport.call_count("disconnect"), 1);
    assert_eq!(h.transport.call_count("connect"), 2);
    assert_eq!(h.handle.stats().await.unwrap().watchdog_reconnects, 1);
}

#[tokio::test(start_paused = true)]
async fn test_connect_failure_reports_reason_and_allows_retry() {
    let h = harness_with(
        MockTransport::with_behavior(ConnectBehavior::Fail(FailureReason::Status(133))),
        DeviceSettings::default(),
    );
    let mut events = h.handle.subscribe();
    h.handle.connect(DeviceId::new("sonar")).await.unwrap();
    h.handle
        .wait_for_state(ConnectionState::ConnectFailed)
        .await
        .unwrap();

    let failure = std::iter::from_fn(|| events.try_recv().ok()).find_map(|event| match event {
        ControllerEvent::ConnectFailed(reason) => Some(reason),
        _ => None,
    });
    assert_eq!(failure, Some(FailureReason::Status(133)));

    h.transport.set_behavior(ConnectBehavior::AutoReady);
    connect_ready(&h).await;
    assert_eq!(h.transport.call_count("connect"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout_is_a_failure() {
    let h = harness();
    h.transport.set_hang(true);
    let mut events = h.handle.subscribe();
    h.handle.connect(DeviceId::new("sonar")).await.unwrap();
    h.handle
        .wait_for_state(ConnectionState::ConnectFailed)
        .await
        .unwrap();

    let failure = std::iter::from_fn(|| events.try_recv().ok()).find_map(|event| match event {
        ControllerEvent::ConnectFailed(reason) => Some(reason),
        _ => None,
    });
    assert_eq!(failure, Some(FailureReason::Timeout));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_transitions_are_rejected() {
    let h = harness();
    assert!(matches!(
        h.handle.disconnect().await,
        Err(ControllerError::InvalidState {
            action: "disconnect",
            state: ConnectionState::Disconnected
        })
    ));

    connect_ready(&h).await;
    assert!(matches!(
        h.handle.connect(DeviceId::new("other")).await,
        Err(ControllerError::InvalidState {
            action: "connect",
            state: ConnectionState::Ready
        })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_forces_exactly_one_reconnect() {
    let h = harness_with(
        MockTransport::new(),
        DeviceSettings {
            sample_timeout: Duration::from_millis(1000),
            ..DeviceSettings::default()
        },
    );
    connect_ready(&h).await;
    let mut events = h.handle.subscribe();

    sleep(Duration::from_millis(2500)).await;

    assert_eq!(h.transport.call_count("disconnect"), 1);
    assert_eq!(h.transport.call_count("connect"), 2);
    assert_eq!(
        drain_states(&mut events),
        vec![
            ConnectionState::Disconnecting,
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Ready
        ]
    );
    let stats = h.handle.stats().await.unwrap();
    assert_eq!(stats.watchdog_reconnects, 1);
    assert_eq!(stats.state, ConnectionState::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_quiet_while_samples_arrive() {
    let h = harness_with(
        MockTransport::new(),
        DeviceSettings {
            sample_timeout: Duration::from_millis(1000),
            ..DeviceSettings::default()
        },
    );
    connect_ready(&h).await;

    for i in 0..10 {
        sleep(Duration::from_millis(500)).await;
        h.transport.notify(&sonar_frame(if i % 2 == 0 { 12 } else { 14 }));
    }
    settle().await;

    assert_eq!(h.transport.call_count("disconnect"), 0);
    assert_eq!(h.handle.state(), ConnectionState::Ready);
    assert!(h.handle.stats().await.unwrap().rate_hz > 1.9);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_frames_do_not_move_rate() {
    let h = harness();
    connect_ready(&h).await;

    for _ in 0..5 {
        h.transport.notify(&sonar_frame(10));
        sleep(Duration::from_millis(100)).await;
    }

    let stats = h.handle.stats().await.unwrap();
    assert_eq!((stats.decoded, stats.accepted), (5, 1));
    assert_eq!(stats.rate_hz, 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_zero_sample_timeout_disables_watchdog() {
    let h = harness_with(
        MockTransport::new(),
        DeviceSettings {
            sample_timeout: Duration::ZERO,
            ..DeviceSettings::default()
        },
    );
    connect_ready(&h).await;
    sleep(Duration::from_secs(30)).await;
    assert_eq!(h.transport.call_count("disconnect"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_requested_disconnect_does_not_reconnect() {
    let h = harness();
    connect_ready(&h).await;

    h.handle.disconnect().await.unwrap();
    h.handle
        .wait_for_state(ConnectionState::Disconnected)
        .await
        .unwrap();
    sleep(Duration::from_secs(20)).await;

    assert_eq!(h.transport.call_count("connect"), 1);
    assert_eq!(h.handle.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_link_loss_stays_disconnected() {
    let h = harness();
    connect_ready(&h).await;

    h.transport.lose_link("out of range");
    h.handle
        .wait_for_state(ConnectionState::Disconnected)
        .await
        .unwrap();
    settle().await;
    assert_eq!(h.transport.call_count("connect"), 1);

    // Stale notifications after the link is gone are ignored.
    h.transport.notify(&sonar_frame(10));
    settle().await;
    assert_eq!(h.handle.stats().await.unwrap().decoded, 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_disconnect_still_ends_link() {
    let h = harness();
    connect_ready(&h).await;

    h.transport.trigger_failure();
    h.handle.disconnect().await.unwrap();
    h.handle
        .wait_for_state(ConnectionState::Disconnected)
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_handle() {
    let h = harness();
    h.handle.shutdown().await.unwrap();
    settle().await;
    assert!(matches!(
        h.handle.connect(DeviceId::new("sonar")).await,
        Err(ControllerError::Stopped)
    ));
}
