//! HTTP+JSON server exposing the volume operations to remote clusters.

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

use sgtfs_meta::{ClusterInfo, DataObjectMetadata, Directory, Recipe, VirtualPath};
use sgtfs_transport::wire::{self, ChunkQuery, LiveResponse, PathQuery};

use crate::error::VolumeError;
use crate::router::VolumeRouter;

/// Error response: status from the error class, [`sgtfs_transport::WireError`] body.
struct ApiError(VolumeError);

impl From<VolumeError> for ApiError {
    fn from(e: VolumeError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = self.0.to_wire();
        let status =
            StatusCode::from_u16(body.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn parse_path(q: &PathQuery) -> Result<VirtualPath, ApiError> {
    VirtualPath::parse(&q.path).map_err(|e| ApiError(e.into()))
}

/// Volume operations served over axum.
pub struct VolumeService {
    router: Arc<VolumeRouter>,
}

impl VolumeService {
    /// Service over `router`.
    pub fn new(router: Arc<VolumeRouter>) -> Self {
        Self { router }
    }

    /// The axum router with every route mounted.
    pub fn routes(&self) -> Router {
        Router::new()
            .route(wire::ROUTE_LIVE, get(live_handler))
            .route(wire::ROUTE_CLUSTER, get(cluster_handler))
            .route(wire::ROUTE_DIRECTORY, get(directory_handler))
            .route(wire::ROUTE_METADATA, get(metadata_handler))
            .route(wire::ROUTE_METADATA_LIST, get(metadata_list_handler))
            .route(wire::ROUTE_RECIPE, get(recipe_handler))
            .route(wire::ROUTE_CHUNK, get(chunk_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.router.clone())
    }

    /// Serves on `listener` until `shutdown` flips to true.
    pub async fn serve(
        self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let addr = listener.local_addr()?;
        info!(%addr, "volume server listening");
        axum::serve(listener, self.routes().into_make_service())
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            })
            .await?;
        info!(%addr, "volume server stopped");
        Ok(())
    }
}

async fn live_handler(State(router): State<Arc<VolumeRouter>>) -> Json<LiveResponse> {
    Json(LiveResponse {
        live: router.is_live(),
    })
}

async fn cluster_handler(State(router): State<Arc<VolumeRouter>>) -> ApiResult<ClusterInfo> {
    Ok(Json(router.get_cluster()?))
}

async fn directory_handler(
    State(router): State<Arc<VolumeRouter>>,
    Query(q): Query<PathQuery>,
) -> ApiResult<Directory> {
    let path = parse_path(&q)?;
    Ok(Json(router.get_directory(&path).await?))
}

async fn metadata_handler(
    State(router): State<Arc<VolumeRouter>>,
    Query(q): Query<PathQuery>,
) -> ApiResult<DataObjectMetadata> {
    let path = parse_path(&q)?;
    Ok(Json(router.get_metadata(&path).await?))
}

async fn metadata_list_handler(
    State(router): State<Arc<VolumeRouter>>,
    Query(q): Query<PathQuery>,
) -> ApiResult<Vec<DataObjectMetadata>> {
    let path = parse_path(&q)?;
    Ok(Json(router.list_metadata(&path).await?))
}

async fn recipe_handler(
    State(router): State<Arc<VolumeRouter>>,
    Query(q): Query<PathQuery>,
) -> ApiResult<Recipe> {
    let path = parse_path(&q)?;
    Ok(Json(router.get_recipe(&path).await?))
}

async fn chunk_handler(
    State(router): State<Arc<VolumeRouter>>,
    Query(q): Query<ChunkQuery>,
) -> Result<Response, ApiError> {
    let bytes = router.read_data_chunk(&q.cluster, &q.hash).await?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        bytes,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VolumeConfig;
    use crate::node::VolumeNode;
    use axum::body::Body;
    use axum::http::Request;
    use sgtfs_meta::{KvStore, MemoryKvStore, Timestamp};
    use sgtfs_recipe::{ExportConfig, MemorySource, SourceRegistry};
    use sgtfs_transport::{HttpClientFactory, WireError, WireErrorKind};
    use std::time::Duration;
    use tower::ServiceExt;

    fn service() -> (Router, Arc<VolumeRouter>) {
        let mem = Arc::new(MemorySource::new());
        mem.put("/docs/a.txt", &b"hello world"[..], Timestamp::from_secs(5));
        let mut sources = SourceRegistry::new();
        sources.register("mem", mem);
        let config = VolumeConfig {
            cluster_name: "east".into(),
            node_name: "e1".into(),
            exports: vec![ExportConfig {
                name: "data".into(),
                locator: "mem:///".into(),
            }],
            ..VolumeConfig::default()
        };
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let factory = Arc::new(HttpClientFactory::new(Duration::from_millis(100)).unwrap());
        let node = VolumeNode::build(config, kv, sources, factory).unwrap();
        node.scan();
        let router = node.router().clone();
        (VolumeService::new(router.clone()).routes(), router)
    }

    async fn get(app: &Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_live_and_cluster() {
        let (app, _) = service();
        let (status, body) = get(&app, "/v1/live").await;
        assert_eq!(status, StatusCode::OK);
        let live: LiveResponse = serde_json::from_slice(&body).unwrap();
        assert!(live.live);

        let (status, body) = get(&app, "/v1/cluster").await;
        assert_eq!(status, StatusCode::OK);
        let cluster: ClusterInfo = serde_json::from_slice(&body).unwrap();
        assert_eq!(cluster.name, "east");
        assert!(cluster.nodes.contains_key("e1"));
    }

    #[tokio::test]
    async fn test_directory_and_recipe() {
        let (app, _) = service();
        let (status, body) = get(&app, "/v1/directory?path=/east/data/docs").await;
        assert_eq!(status, StatusCode::OK);
        let dir: Directory = serde_json::from_slice(&body).unwrap();
        assert!(dir.entries.contains("a.txt"));

        let (status, body) = get(&app, "/v1/recipe?path=/east/data/docs/a.txt").await;
        assert_eq!(status, StatusCode::OK);
        let recipe: Recipe = serde_json::from_slice(&body).unwrap();
        assert_eq!(recipe.size, 11);
    }

    #[tokio::test]
    async fn test_errors_carry_kind_and_status() {
        let (app, _) = service();
        let (status, body) = get(&app, "/v1/metadata?path=/east/data/missing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let err: WireError = serde_json::from_slice(&body).unwrap();
        assert_eq!(err.kind, WireErrorKind::NotFound);

        let (status, body) = get(&app, "/v1/metadata?path=relative").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let err: WireError = serde_json::from_slice(&body).unwrap();
        assert_eq!(err.kind, WireErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_chunk_bytes() {
        let (app, router) = service();
        let path = VirtualPath::parse("/east/data/docs/a.txt").unwrap();
        router.engine().recipe(&path).unwrap();
        router.engine().hash_pending(&path).unwrap();
        let recipe = router.engine().recipe(&path).unwrap();
        let hash = recipe.chunks[0].hash_hex().unwrap();

        let (status, body) = get(&app, &format!("/v1/chunk?cluster=east&hash={hash}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"hello world");

        let (status, _) = get(&app, "/v1/chunk?cluster=east&hash=00ff").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
