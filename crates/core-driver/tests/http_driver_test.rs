//! HttpDriver against an in-process fake engine

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{Duration as ChronoDuration, Utc};
use drlogic_core_driver::http::RecreateResponse;
use drlogic_core_driver::{
    DriverError, HttpDriver, RecreateRequest, ReplicationDriver, ReplicationRequest,
};
use drlogic_core_registry::{ArtifactRef, Bandwidth, EntityKind};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Catalogue = Arc<Mutex<Vec<ArtifactRef>>>;

async fn replicate(
    State(catalogue): State<Catalogue>,
    Json(request): Json<ReplicationRequest>,
) -> Result<Json<ArtifactRef>, (StatusCode, String)> {
    if request.entity_id == "vm-overloaded" {
        return Err((StatusCode::SERVICE_UNAVAILABLE, "engine saturated".into()));
    }
    let artifact = ArtifactRef::new(
        format!("{}-snap", request.entity_id),
        request.entity_id.clone(),
        Utc::now(),
    );
    catalogue.lock().unwrap().push(artifact.clone());
    Ok(Json(artifact))
}

async fn list(
    State(catalogue): State<Catalogue>,
    Path(id): Path<String>,
) -> Json<Vec<ArtifactRef>> {
    let mut artifacts: Vec<ArtifactRef> = catalogue
        .lock()
        .unwrap()
        .iter()
        .filter(|a| a.entity_id == id)
        .cloned()
        .collect();
    artifacts.reverse();
    Json(artifacts)
}

async fn remove(State(catalogue): State<Catalogue>, Path(id): Path<String>) -> StatusCode {
    let mut catalogue = catalogue.lock().unwrap();
    let before = catalogue.len();
    catalogue.retain(|a| a.id != id);
    if catalogue.len() == before {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::NO_CONTENT
    }
}

async fn recreate(
    Json(request): Json<RecreateRequest>,
) -> Result<Json<RecreateResponse>, (StatusCode, String)> {
    if request.kind == EntityKind::Instance && request.attachments.is_empty() {
        return Err((StatusCode::UNPROCESSABLE_ENTITY, "boot volume missing".into()));
    }
    Ok(Json(RecreateResponse {
        resource_id: format!("new-{}", request.entity_id),
    }))
}

async fn spawn_engine(catalogue: Catalogue) -> String {
    let app = Router::new()
        .route("/v1/replications", post(replicate))
        .route("/v1/entities/:id/artifacts", get(list))
        .route("/v1/artifacts/:id", delete(remove))
        .route("/v1/recreations", post(recreate))
        .with_state(catalogue);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn request(entity: &str) -> ReplicationRequest {
    ReplicationRequest {
        entity_id: entity.into(),
        kind: EntityKind::Instance,
        site_id: "site-a".into(),
        action: "image_copy".into(),
        bandwidth: Bandwidth(25),
    }
}

#[tokio::test]
async fn test_replicate_and_catalogue() {
    let catalogue = Catalogue::default();
    let old = ArtifactRef::new("vm-1-old", "vm-1", Utc::now() - ChronoDuration::hours(2));
    catalogue.lock().unwrap().push(old.clone());

    let base = spawn_engine(catalogue.clone()).await;
    let driver = HttpDriver::new(base, Duration::from_secs(5)).unwrap();

    let artifact = driver.replicate(&request("vm-1")).await.unwrap();
    assert_eq!(artifact.id, "vm-1-snap");

    // Listing is normalized to oldest first whatever the engine returns
    let listed = driver.list_artifacts("vm-1").await.unwrap();
    assert_eq!(listed, vec![old.clone(), artifact]);

    driver.delete_artifact(&old).await.unwrap();
    // Already gone: still a success
    driver.delete_artifact(&old).await.unwrap();
    assert_eq!(driver.list_artifacts("vm-1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_engine_errors_are_classified() {
    let base = spawn_engine(Catalogue::default()).await;
    let driver = HttpDriver::new(base, Duration::from_secs(5)).unwrap();

    let err = driver.replicate(&request("vm-overloaded")).await.unwrap_err();
    assert!(err.is_transient(), "503 should be retryable: {err}");

    let recreate = RecreateRequest {
        entity_id: "vm-1".into(),
        kind: EntityKind::Instance,
        artifact: ArtifactRef::new("vm-1-snap", "vm-1", Utc::now()),
        target_site: "site-b".into(),
        attachments: vec![],
    };
    let err = driver.recreate(&recreate).await.unwrap_err();
    assert!(matches!(err, DriverError::Permanent(ref m) if m.contains("boot volume missing")));

    let ok = RecreateRequest {
        attachments: vec!["new-vol-1".into()],
        ..recreate
    };
    assert_eq!(driver.recreate(&ok).await.unwrap(), "new-vm-1");
}

#[tokio::test]
async fn test_unreachable_engine_is_transient() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let driver = HttpDriver::new(format!("http://{}", addr), Duration::from_secs(2)).unwrap();
    let err = driver.list_artifacts("vm-1").await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_ids_with_reserved_characters_reach_their_route() {
    let catalogue = Catalogue::default();
    let base = spawn_engine(catalogue.clone()).await;
    let driver = HttpDriver::new(base, Duration::from_secs(5)).unwrap();

    let artifact = driver.replicate(&request("tenant/vm-1?x")).await.unwrap();
    assert_eq!(artifact.id, "tenant/vm-1?x-snap");

    let listed = driver.list_artifacts("tenant/vm-1?x").await.unwrap();
    assert_eq!(listed, vec![artifact.clone()]);

    driver.delete_artifact(&artifact).await.unwrap();
    assert!(catalogue.lock().unwrap().is_empty());
}
