//! End-to-end tests across the participant and operator sides
//!
//! Each test opens a fresh on-disk database in a temp directory and drives it
//! through the public API only.

use fraudsim_core::config::TrackingConfig;
use fraudsim_core::{
    CapturePipeline, CleanupScheduler, Database, FallbackCache, GuidanceKind,
    InterventionController, Participant, RiskInputs, RiskLevel, SessionHandle, SessionInit,
    SessionManager, SessionQueryService, SessionStatus, SessionStore,
};
use std::sync::Arc;
use tempfile::TempDir;

struct Harness {
    _dir: TempDir,
    db: Arc<Database>,
    manager: Arc<SessionManager>,
    config: TrackingConfig,
}

fn harness() -> Harness {
    fraudsim_core::logging::init_test();
    let dir = TempDir::new().unwrap();
    let db = Database::open(&dir.path().join("data.db")).unwrap();
    db.migrate().unwrap();
    let db = Arc::new(db);
    let cache = FallbackCache::open(&dir.path().join("fallback.json")).unwrap();
    let config = TrackingConfig::default();
    let manager = Arc::new(SessionManager::new(
        db.clone(),
        Arc::new(cache),
        config.clone(),
    ));
    Harness {
        _dir: dir,
        db,
        manager,
        config,
    }
}

fn entry() -> SessionInit {
    SessionInit {
        entry_point: "/flights".to_string(),
        ..Default::default()
    }
}

// ============================================
// Participant flow
// ============================================

#[tokio::test]
async fn test_booking_only_flow_scores_low() {
    let h = harness();
    let pipeline = CapturePipeline::new(h.manager.clone(), 16);

    let session = h.manager.initialize(None, &entry());
    let t1 = SessionHandle::from(&session);

    h.manager.advance(&t1, 1, 6);
    pipeline.capture(&t1, "origin", "BOG", 1, Some(false)).await;
    h.manager.advance(&t1, 4, 6);

    let completed = pipeline.complete(&t1, RiskInputs::default()).await.unwrap();
    assert_eq!(completed.status, SessionStatus::Completed);
    assert_eq!(completed.risk_score, Some(30));
    assert_eq!(RiskLevel::from_score(30), RiskLevel::Low);
    assert_eq!(h.db.current_fields(&session.id).unwrap().len(), 1);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_card_captured_just_before_completion_is_scored() {
    let h = harness();
    let pipeline = CapturePipeline::new(h.manager.clone(), 16);
    let session = h.manager.initialize(None, &entry());
    let handle = SessionHandle::from(&session);

    pipeline.capture(&handle, "email", "ada@example.com", 3, None).await;
    pipeline.capture(&handle, "card_number", "4111", 5, None).await;
    let completed = pipeline.complete(&handle, RiskInputs::default()).await.unwrap();

    assert_eq!(completed.risk_score, Some(75));
    let stored = h.db.get_session(&session.id).unwrap().unwrap();
    assert_eq!(stored.risk_score, Some(75));
    assert_eq!(stored.status, SessionStatus::Completed);
    // The cache forgets the session once the store holds it
    assert!(h.manager.cache().session(&session.id).is_none());

    pipeline.shutdown().await;
}

#[test]
fn test_advance_final_step_is_maximum() {
    let h = harness();
    let session = h.manager.initialize(None, &entry());
    let handle = SessionHandle::from(&session);

    let steps = [2, 1, 5, 3, 4, 0, 5, 2];
    for step in steps {
        h.manager.advance(&handle, step, 6);
    }

    let stored = h.db.get_session(&session.id).unwrap().unwrap();
    assert_eq!(stored.current_step, 5);
}

#[test]
fn test_inactive_session_reactivates_on_advance() {
    let h = harness();
    let session = h.manager.initialize(None, &entry());
    let handle = SessionHandle::from(&session);

    let cleanup = CleanupScheduler::new(h.db.clone(), &h.config);
    assert_eq!(cleanup.force_sweep().unwrap(), 1);
    assert_eq!(
        h.db.get_session(&session.id).unwrap().unwrap().status,
        SessionStatus::Inactive
    );

    let advanced = h.manager.advance(&handle, 2, 6).unwrap();
    assert_eq!(advanced.status, SessionStatus::Active);
}

#[test]
fn test_resume_survives_process_restart() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("data.db");
    let cache_path = dir.path().join("fallback.json");

    let token = {
        let db = Database::open(&db_path).unwrap();
        db.migrate().unwrap();
        let manager = SessionManager::new(
            Arc::new(db),
            Arc::new(FallbackCache::open(&cache_path).unwrap()),
            TrackingConfig::default(),
        );
        let session = manager.initialize(None, &entry());
        manager.advance(&SessionHandle::from(&session), 3, 6);
        session.token
    };

    let db = Database::open(&db_path).unwrap();
    db.migrate().unwrap();
    let manager = SessionManager::new(
        Arc::new(db),
        Arc::new(FallbackCache::open(&cache_path).unwrap()),
        TrackingConfig::default(),
    );
    let resumed = manager.initialize(Some(&token), &entry());
    assert_eq!(resumed.token, token);
    assert_eq!(resumed.current_step, 3);
}

// ============================================
// Operator side
// ============================================

#[test]
fn test_admin_email_excluded_from_participant_list() {
    let h = harness();
    h.manager.initialize(
        None,
        &SessionInit {
            participant: Some(Participant {
                email: Some("admin.ops@example.com".to_string()),
                display_name: Some("Ops".to_string()),
                ..Default::default()
            }),
            ..entry()
        },
    );
    let guest = h.manager.initialize(None, &entry());

    let query = SessionQueryService::new(h.db.clone(), h.config.clone());
    let participants = query.list_participant_sessions(50);
    assert_eq!(participants.len(), 1);
    assert_eq!(participants[0].session.id, guest.id);
    assert_eq!(query.list_active(50).len(), 2);
}

#[test]
fn test_liveness_sweep_twice() {
    let h = harness();
    h.manager.initialize(None, &entry());

    let cleanup = CleanupScheduler::new(h.db.clone(), &h.config);
    let first = cleanup.run_liveness_sweep().unwrap();
    assert_eq!(first, 0);
    assert_eq!(cleanup.run_liveness_sweep().unwrap(), 0);

    cleanup.force_sweep().unwrap();
    assert_eq!(cleanup.run_liveness_sweep().unwrap(), 0);
}

#[tokio::test]
async fn test_alert_lifecycle_and_resolve_twice() {
    let h = harness();
    let pipeline = CapturePipeline::new(h.manager.clone(), 16);
    let session = h.manager.initialize(None, &entry());
    let handle = SessionHandle::from(&session);

    pipeline.capture(&handle, "passport_number", "X123", 3, None).await;
    pipeline.capture(&handle, "card_number", "4111", 5, None).await;
    pipeline.capture(&handle, "destination", "MAD", 1, None).await;
    pipeline.flush().await;

    let operator = InterventionController::new(h.db.clone(), Some("ops@example.com".to_string()));
    let assessment = operator.analyze(&session.id).unwrap();
    assert_eq!(assessment.level, RiskLevel::High);
    assert_eq!(assessment.score, 85);

    let alerts = operator.check_alerts(&session.id).unwrap();
    assert_eq!(alerts.len(), 1);

    let first = operator.resolve_alert(&alerts[0].id).unwrap();
    let second = operator.resolve_alert(&alerts[0].id).unwrap();
    assert_eq!(first, second);

    let query = SessionQueryService::new(h.db.clone(), h.config.clone());
    assert!(query.list_active_alerts().is_empty());
    assert_eq!(query.list_recent_activity(10).len(), 3);

    pipeline.shutdown().await;
}

#[test]
fn test_guidance_reaches_participant_once() {
    let h = harness();
    let session = h.manager.initialize(None, &entry());
    let handle = SessionHandle::from(&session);

    let operator = InterventionController::new(h.db.clone(), None);
    operator
        .send_guidance(&session.id, "Check the address bar", GuidanceKind::Warning)
        .unwrap();
    operator.nudge(&session.id).unwrap();

    let delivered = h.manager.fetch_guidance(&handle);
    assert_eq!(delivered.len(), 2);
    assert_eq!(delivered[0].kind, GuidanceKind::Warning);
    assert!(h.manager.fetch_guidance(&handle).is_empty());
}
