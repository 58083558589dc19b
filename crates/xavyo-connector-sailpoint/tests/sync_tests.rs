//! End-to-end orchestrator tests with a mock SailPoint API and an in-memory
//! graph sink.

mod common;

use common::*;
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use xavyo_connector_sailpoint::{
    PageQuery, PermissionPolicy, SailPointError, SinkError, SyncOrchestrator, SyncPhase,
};

async fn mount_identities(server: &MockServer, records: Vec<serde_json::Value>) {
    let total = records.len();
    Mock::given(method("GET"))
        .and(path(IDENTITIES_PATH))
        .respond_with(OffsetResponder::new(records, Some(total)))
        .mount(server)
        .await;
}

fn orchestrator(server: &MockServer, sink: &Arc<RecordingSink>) -> SyncOrchestrator {
    SyncOrchestrator::new(test_config(server), sink.clone()).unwrap()
}

#[tokio::test]
async fn test_full_sync_creates_provider_and_pushes() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_identities(
        &server,
        vec![
            create_identity_in_groups("u1", "Ann Lee", &[("g1", "Engineering")]),
            create_identity_in_groups("u2", "Bob Ray", &[("g1", "Engineering"), ("g2", "Ops")]),
            create_identity("u3", "Cy Doe"),
        ],
    )
    .await;

    let sink = Arc::new(RecordingSink::new());
    let mut sync = orchestrator(&server, &sink).with_icon("aWNvbg==");
    let report = sync.sync(false).await.unwrap();

    assert_eq!(sync.phase(), SyncPhase::Done);
    assert_eq!(report.fetched_count, 3);
    assert_eq!(report.processed_count, 3);
    assert_eq!(report.error_count, 0);
    assert_eq!(report.identities, 3);
    assert_eq!(report.groups, 2);
    assert!(report.pushed);

    assert_eq!(
        sink.calls(),
        vec![
            "get_provider:SailPoint IdentityNow".to_string(),
            "create_provider:SailPoint IdentityNow:application".to_string(),
            "update_icon:provider-1".to_string(),
            "push:SailPoint IdentityNow:SailPoint - acme".to_string(),
        ]
    );
    assert_eq!(sink.icons(), vec!["aWNvbg==".to_string()]);

    let pushes = sink.pushes();
    assert_eq!(pushes.len(), 1);
    let graph = &pushes[0].graph;
    assert_eq!(graph.application_type, "IDaaS");
    assert_eq!(graph.identities.len(), 3);
    assert_eq!(graph.groups.len(), 2);
    assert_eq!(graph.members_of("g1").collect::<Vec<_>>(), vec!["u1", "u2"]);
    assert_eq!(graph.grants.len(), 3);
}

#[tokio::test]
async fn test_email_record_gets_access_grant() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_identities(
        &server,
        vec![json!({"id": "u1", "email": "a@x.com", "status": "active"})],
    )
    .await;

    let sink = Arc::new(RecordingSink::new());
    orchestrator(&server, &sink).sync(false).await.unwrap();

    let graph = sink.pushes().remove(0).graph;
    let identity = &graph.identities[0];
    assert_eq!(identity.unique_id, "u1");
    assert_eq!(identity.primary_email.as_deref(), Some("a@x.com"));
    assert_eq!(identity.status.as_deref(), Some("active"));

    let grants: Vec<_> = graph
        .grants_for("u1")
        .map(|g| g.permission.as_str())
        .collect();
    assert_eq!(grants, vec!["access"]);
}

#[tokio::test]
async fn test_existing_provider_is_reused() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_identities(&server, vec![create_identity("u1", "One")]).await;

    let sink = Arc::new(RecordingSink::new().with_provider("p-9", "SailPoint IdentityNow"));
    orchestrator(&server, &sink).sync(false).await.unwrap();

    let calls = sink.calls();
    assert!(!calls.iter().any(|c| c.starts_with("create_provider")));
    assert!(!calls.iter().any(|c| c.starts_with("update_icon")));
    assert_eq!(sink.pushes().len(), 1);
}

#[tokio::test]
async fn test_force_recreates_provider() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_identities(&server, vec![create_identity("u1", "One")]).await;

    let sink = Arc::new(RecordingSink::new().with_provider("p-9", "SailPoint IdentityNow"));
    orchestrator(&server, &sink).sync(true).await.unwrap();

    assert_eq!(
        sink.calls()[..4],
        [
            "get_provider:SailPoint IdentityNow".to_string(),
            "delete_provider:p-9".to_string(),
            "get_provider:SailPoint IdentityNow".to_string(),
            "create_provider:SailPoint IdentityNow:application".to_string(),
        ]
    );
    let providers = sink.providers();
    assert_eq!(providers.len(), 1);
    assert_ne!(providers[0].id, "p-9");
}

#[tokio::test]
async fn test_invalid_records_are_counted() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_identities(
        &server,
        vec![
            create_identity("u1", "One"),
            json!({"name": "No Id"}),
            create_identity("u2", "Two"),
            json!({"id": "", "name": "Empty Id"}),
            create_identity("u3", "Three"),
        ],
    )
    .await;

    let sink = Arc::new(RecordingSink::new());
    let report = orchestrator(&server, &sink).sync(false).await.unwrap();

    assert_eq!(report.processed_count, 3);
    assert_eq!(report.error_count, 2);
    assert_eq!(report.failures.len(), 2);
    assert_eq!(sink.pushes()[0].graph.identities.len(), 3);
}

#[tokio::test]
async fn test_records_are_split_into_batches() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_identities(
        &server,
        (1..=5)
            .map(|i| create_identity(&format!("u{i}"), &format!("User {i}")))
            .collect(),
    )
    .await;

    let sink = Arc::new(RecordingSink::new());
    let config = test_config(&server).with_batch_size(2);
    let report = SyncOrchestrator::new(config, sink.clone())
        .unwrap()
        .sync(false)
        .await
        .unwrap();

    assert_eq!(report.batches, 3);
    assert_eq!(report.processed_count, 5);
}

#[tokio::test]
async fn test_push_error_fails_run_with_details() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_identities(&server, vec![create_identity("u1", "One")]).await;

    let sink = Arc::new(RecordingSink::new().with_push_error(
        SinkError::new(Some(400), "Invalid payload").with_details(vec!["bad property type".into()]),
    ));
    let mut sync = orchestrator(&server, &sink);
    let err = sync.sync(false).await.unwrap_err();

    assert_eq!(sync.phase(), SyncPhase::Failed);
    assert!(matches!(err, SailPointError::SinkPush(_)));
    assert_eq!(err.details(), ["bad property type".to_string()]);
    assert!(err.to_string().contains("bad property type"));
    assert!(sink.pushes().is_empty());
}

#[tokio::test]
async fn test_fetch_failure_pushes_nothing() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    let responder = SequenceResponder::new(vec![
        page(vec![create_identity("u1", "One"), create_identity("u2", "Two")], Some(3)),
        ResponseTemplate::new(500).set_body_string("boom"),
        ResponseTemplate::new(500).set_body_string("boom"),
        ResponseTemplate::new(500).set_body_string("boom"),
    ]);

    Mock::given(method("GET"))
        .and(path(IDENTITIES_PATH))
        .respond_with(responder)
        .mount(&server)
        .await;

    let sink = Arc::new(RecordingSink::new());
    let mut sync = orchestrator(&server, &sink);
    let err = sync.sync(false).await.unwrap_err();

    assert_eq!(sync.phase(), SyncPhase::Failed);
    assert!(matches!(err, SailPointError::Pagination { offset: 2, .. }));
    assert!(!sink.calls().iter().any(|c| c.starts_with("push")));
}

#[tokio::test]
async fn test_auth_failure_touches_nothing() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let sink = Arc::new(RecordingSink::new());
    let mut sync = orchestrator(&server, &sink);
    let err = sync.sync(false).await.unwrap_err();

    assert!(matches!(err, SailPointError::Auth(_)));
    assert_eq!(sync.phase(), SyncPhase::Failed);
    assert!(sink.calls().is_empty());
}

#[tokio::test]
async fn test_icon_failure_is_not_fatal() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_identities(&server, vec![create_identity("u1", "One")]).await;

    let sink = Arc::new(
        RecordingSink::new().with_icon_error(SinkError::new(Some(500), "icon rejected")),
    );
    let report = orchestrator(&server, &sink)
        .with_icon("aWNvbg==")
        .sync(false)
        .await
        .unwrap();

    assert!(report.pushed);
    assert_eq!(sink.pushes().len(), 1);
}

#[tokio::test]
async fn test_sink_warnings_are_reported() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_identities(&server, vec![create_identity("u1", "One")]).await;

    let sink = Arc::new(RecordingSink::new().with_warnings(&["unknown property x", "slow"]));
    let report = orchestrator(&server, &sink).sync(false).await.unwrap();

    assert_eq!(
        report.warnings,
        vec!["unknown property x".to_string(), "slow".to_string()]
    );
}

#[tokio::test]
async fn test_dry_run_skips_sink() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_identities(
        &server,
        vec![create_identity("u1", "One"), json!({"name": "broken"})],
    )
    .await;

    let sink = Arc::new(RecordingSink::new());
    let mut sync = orchestrator(&server, &sink);
    let report = sync.dry_run().await.unwrap();

    assert_eq!(sync.phase(), SyncPhase::Done);
    assert_eq!(report.processed_count, 1);
    assert_eq!(report.error_count, 1);
    assert!(!report.pushed);
    assert!(sink.calls().is_empty());
}

#[tokio::test]
async fn test_admin_policy_grants_admin() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_identities(
        &server,
        vec![json!({"id": "u1", "attributes": {"title": "IT Admin"}})],
    )
    .await;

    let sink = Arc::new(RecordingSink::new());
    let config = test_config(&server)
        .with_permissions(PermissionPolicy::default().with_admin_keyword("admin"));
    SyncOrchestrator::new(config, sink.clone())
        .unwrap()
        .sync(false)
        .await
        .unwrap();

    let graph = sink.pushes().remove(0).graph;
    let grants: Vec<_> = graph
        .grants_for("u1")
        .map(|g| g.permission.as_str())
        .collect();
    assert_eq!(grants, vec!["admin"]);
}

#[tokio::test]
async fn test_fetch_authenticates_on_demand() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_identities(
        &server,
        vec![create_identity("u1", "One"), create_identity("u2", "Two")],
    )
    .await;

    let sink = Arc::new(RecordingSink::new());
    let sync = orchestrator(&server, &sink);
    let records = sync
        .fetch("public-identities", PageQuery::default())
        .await
        .unwrap();

    assert_eq!(records.len(), 2);
    assert!(sink.calls().is_empty());
}
