//! End-to-end `SessionManager` scenarios exercising selection, RPC failure
//! classification, and idempotency together — the properties that only show
//! up once selection, sessions, and the control channel are wired together.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use colibri_core::colibri::protocol::{
    ColibriErrorCondition, ConferenceModifyRequest, ConferenceModifyResponse, ConferenceModifySuccess,
};
use colibri_core::colibri::ControlChannel;
use colibri_core::selection::{RegionBased, Single};
use colibri_core::{
    AllocationParams, BridgeRegistry, BridgeSelectionConfig, BridgeStats, ColibriError, ColibriEvent,
    ColibriEventHandler, ControlChannelError, Jid, SessionManager, Strategy,
};

struct ScriptedChannel {
    responses: Mutex<VecDeque<Result<ConferenceModifyResponse, ControlChannelError>>>,
}

impl ScriptedChannel {
    fn new(responses: Vec<Result<ConferenceModifyResponse, ControlChannelError>>) -> Self {
        Self { responses: Mutex::new(responses.into()) }
    }
}

#[async_trait]
impl ControlChannel for ScriptedChannel {
    async fn send_conference_modify(
        &self,
        _bridge: &Jid,
        _request: ConferenceModifyRequest,
        _deadline: Duration,
    ) -> Result<ConferenceModifyResponse, ControlChannelError> {
        self.responses.lock().await.pop_front().unwrap_or(Err(ControlChannelError::Transport("script exhausted".into())))
    }
}

fn success(conference_id: &str) -> ConferenceModifyResponse {
    ConferenceModifyResponse::Success(ConferenceModifySuccess {
        conference_id: Some(conference_id.to_string()),
        endpoint_transports: Vec::new(),
        feedback_sources: None,
        sctp_port: None,
    })
}

struct EventLog(Mutex<Vec<ColibriEvent>>);

impl EventLog {
    fn new() -> Arc<Self> {
        Arc::new(Self(Mutex::new(Vec::new())))
    }
}

#[async_trait]
impl ColibriEventHandler for EventLog {
    async fn handle_event(&self, event: ColibriEvent) {
        self.0.lock().await.push(event);
    }
}

fn count_matching(events: &[ColibriEvent], pred: impl Fn(&ColibriEvent) -> bool) -> usize {
    events.iter().filter(|e| pred(e)).count()
}

/// Scenario: a participant pins a bridge version no candidate has, and the
/// config forbids falling back to an unmatched version. Selection must fail
/// before any session or RPC is attempted.
#[tokio::test]
async fn version_pin_miss_without_fallback_fails_selection_without_creating_a_session() {
    let registry = Arc::new(BridgeRegistry::new());
    registry.add(Jid::from("b1"), Some(BridgeStats { version: Some("1".into()), ..Default::default() })).await;

    let manager = SessionManager::new(
        "conf-1",
        "focus@local",
        registry,
        Arc::new(ScriptedChannel::new(vec![])),
        Strategy::Single(Single),
        BridgeSelectionConfig { allow_selection_if_no_pinned_match: false, ..Default::default() },
        false,
        Duration::from_secs(1),
    );

    let err = manager
        .allocate(AllocationParams {
            id: "p1".into(),
            visitor: false,
            use_sctp: false,
            region: None,
            sources: None,
            display_name: None,
            pinned_version: Some("2".into()),
        })
        .await
        .unwrap_err();

    assert!(matches!(err, ColibriError::BridgeSelectionFailed));
    assert!(manager.get_bridges().await.is_empty(), "no session should exist after a selection failure");
}

/// Scenario: the bridge rejects an allocate with `graceful-shutdown`. The
/// session must be torn down, the failing participant never counted as
/// placed, and a `BridgeRemoved` event fired.
#[tokio::test]
async fn graceful_shutdown_response_tears_down_the_session_and_emits_bridge_removed() {
    let registry = Arc::new(BridgeRegistry::new());
    registry.add(Jid::from("b1"), Some(BridgeStats { stress: Some(0.1), region: Some("us".into()), ..Default::default() })).await;

    let manager = SessionManager::new(
        "conf-1",
        "focus@local",
        registry.clone(),
        Arc::new(ScriptedChannel::new(vec![
            Ok(success("conf-1")),
            Ok(ConferenceModifyResponse::Error(ColibriErrorCondition::new("service-unavailable", Some("graceful-shutdown")))),
        ])),
        Strategy::Region(RegionBased),
        BridgeSelectionConfig::default(),
        false,
        Duration::from_secs(1),
    );

    let log = EventLog::new();
    manager.add_event_handler("log", log.clone()).await;

    manager
        .allocate(AllocationParams { id: "p1".into(), visitor: false, use_sctp: false, region: Some("us".into()), sources: None, display_name: None, pinned_version: None })
        .await
        .unwrap();

    let err = manager
        .allocate(AllocationParams { id: "p2".into(), visitor: false, use_sctp: false, region: Some("us".into()), sources: None, display_name: None, pinned_version: None })
        .await
        .unwrap_err();
    assert!(matches!(err, ColibriError::BridgeGracefulShutdown));
    assert!(err.removes_bridge());

    assert!(manager.get_bridges().await.is_empty(), "the session must be gone after a removes_bridge() error");
    assert!(registry.get(&Jid::from("b1")).unwrap().in_graceful_shutdown());

    let events = log.0.lock().await;
    let removed = count_matching(&events, |e| matches!(e, ColibriEvent::BridgeRemoved { evicted_participants, .. } if evicted_participants.contains(&"p1".to_string())));
    assert_eq!(removed, 1, "BridgeRemoved must carry the evicted p1 alongside the failed p2's session teardown");
}

/// Scenario: a second successful response reports a conference id different
/// from the one already recorded. This is a fatal `StateMismatch`: the
/// session and every participant it held are evicted, and the bridge count
/// drops back to reflect the loss.
#[tokio::test]
async fn conference_id_mismatch_evicts_the_whole_session() {
    let registry = Arc::new(BridgeRegistry::new());
    registry.add(Jid::from("b1"), Some(BridgeStats { stress: Some(0.1), region: Some("us".into()), ..Default::default() })).await;

    let manager = SessionManager::new(
        "conf-1",
        "focus@local",
        registry,
        Arc::new(ScriptedChannel::new(vec![Ok(success("conf-a")), Ok(success("conf-b"))])),
        Strategy::Region(RegionBased),
        BridgeSelectionConfig::default(),
        false,
        Duration::from_secs(1),
    );

    let log = EventLog::new();
    manager.add_event_handler("log", log.clone()).await;

    manager
        .allocate(AllocationParams { id: "p1".into(), visitor: false, use_sctp: false, region: Some("us".into()), sources: None, display_name: None, pinned_version: None })
        .await
        .unwrap();

    let err = manager
        .allocate(AllocationParams { id: "p2".into(), visitor: false, use_sctp: false, region: Some("us".into()), sources: None, display_name: None, pinned_version: None })
        .await
        .unwrap_err();

    assert!(matches!(err, ColibriError::StateMismatch { .. }));
    assert!(manager.get_bridges().await.is_empty());

    let events = log.0.lock().await;
    let last_count_changed = events.iter().rev().find_map(|e| match e {
        ColibriEvent::BridgeCountChanged { count, .. } => Some(*count),
        _ => None,
    });
    assert_eq!(last_count_changed, Some(0), "bridge count must reflect the session's removal");
}

/// R1: expiring a conference twice is a no-op the second time.
#[tokio::test]
async fn expire_is_idempotent() {
    let registry = Arc::new(BridgeRegistry::new());
    registry.add(Jid::from("b1"), Some(BridgeStats { stress: Some(0.1), region: Some("us".into()), ..Default::default() })).await;

    let manager = SessionManager::new(
        "conf-1",
        "focus@local",
        registry,
        Arc::new(ScriptedChannel::new(vec![Ok(success("conf-1"))])),
        Strategy::Region(RegionBased),
        BridgeSelectionConfig::default(),
        false,
        Duration::from_secs(1),
    );

    manager
        .allocate(AllocationParams { id: "p1".into(), visitor: false, use_sctp: false, region: Some("us".into()), sources: None, display_name: None, pinned_version: None })
        .await
        .unwrap();

    manager.expire().await;
    assert!(manager.get_bridges().await.is_empty());
    manager.expire().await; // must not panic or double-send on an already-empty conference
}

/// P-style invariant: a participant is never left referencing a session key
/// that no longer exists in the session map once `allocate` returns
/// successfully.
#[tokio::test]
async fn successful_allocate_leaves_participant_and_session_consistent() {
    let registry = Arc::new(BridgeRegistry::new());
    registry.add(Jid::from("b1"), Some(BridgeStats { stress: Some(0.1), region: Some("us".into()), ..Default::default() })).await;

    let manager = SessionManager::new(
        "conf-1",
        "focus@local",
        registry,
        Arc::new(ScriptedChannel::new(vec![Ok(success("conf-1"))])),
        Strategy::Single(Single),
        BridgeSelectionConfig::default(),
        false,
        Duration::from_secs(1),
    );

    let allocation = manager
        .allocate(AllocationParams { id: "p1".into(), visitor: false, use_sctp: false, region: Some("us".into()), sources: None, display_name: None, pinned_version: None })
        .await
        .unwrap();

    let bridges = manager.get_bridges().await;
    assert_eq!(bridges.len(), 1);
    assert_eq!(bridges[0].properties.participant_count, 1);
    assert_eq!(allocation.bridge_session_id, bridges[0].bridge.jid().0);
}
