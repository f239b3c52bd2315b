//! REST surface of fabricd
//!
//! Thin axum handlers over [`Fabric`]. Errors are rendered as
//! `{"code", "message"}` bodies with a status derived from the
//! [`FabricError`] class.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use fabric_common::{FabricError, Network, Port};
use fabric_topology::TopologySnapshot;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::daemon::Fabric;
use crate::types::{AssignRequest, RegisterRequest};

pub type ApiResult<T> = Result<Json<T>, ApiError>;

/// Error body returned by every failing handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError(pub FabricError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            FabricError::NotFound { .. } => StatusCode::NOT_FOUND,
            FabricError::BadInput(_) | FabricError::NoCapacity { .. } | FabricError::Parse(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<FabricError> for ApiError {
    fn from(e: FabricError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self.0, "Request failed");
        }
        let body = ApiErrorBody {
            code: self.0.code().to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkBody {
    pub network: Network,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortBody {
    pub port: Port,
}

pub fn router(fabric: Arc<Fabric>) -> Router {
    Router::new()
        .route("/localvlan/", post(assign_vlan))
        .route("/localvlan/{port}", delete(release_vlan))
        .route("/tsync", post(register_switch))
        .route("/topology", get(topology))
        .route("/refresh", get(refresh))
        .route("/metrics", get(metrics))
        .route("/network/", post(create_network))
        .route(
            "/network/{id}",
            get(get_network).put(update_network).delete(delete_network),
        )
        .route("/port/", post(create_port))
        .route("/port/{id}", get(get_port).put(update_port).delete(delete_port))
        .with_state(fabric)
}

pub async fn assign_vlan(
    State(fabric): State<Arc<Fabric>>,
    Json(request): Json<AssignRequest>,
) -> ApiResult<Value> {
    let mapping = fabric.vlans().assign(&request).await?;
    Ok(Json(json!({ "vlanmapping": mapping, "message": "OK" })))
}

pub async fn release_vlan(
    State(fabric): State<Arc<Fabric>>,
    Path(port): Path<String>,
) -> ApiResult<&'static str> {
    fabric.vlans().release(&port).await?;
    Ok(Json("OK"))
}

pub async fn register_switch(
    State(fabric): State<Arc<Fabric>>,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<&'static str> {
    let switch = fabric.register(&request).await?;
    info!(switch = %switch.mgmt_ip, "Switch registered via REST");
    Ok(Json("OK"))
}

pub async fn topology(State(fabric): State<Arc<Fabric>>) -> Json<TopologySnapshot> {
    Json(fabric.topology().snapshot().as_ref().clone())
}

pub async fn refresh(State(fabric): State<Arc<Fabric>>) -> Json<&'static str> {
    fabric.request_refresh();
    Json("Ready to refresh.")
}

pub async fn metrics(State(fabric): State<Arc<Fabric>>) -> String {
    fabric.metrics().gather_metrics()
}

pub async fn create_network(
    State(fabric): State<Arc<Fabric>>,
    Json(body): Json<NetworkBody>,
) -> ApiResult<NetworkBody> {
    let network = fabric.provision().create_network(body.network).await?;
    Ok(Json(NetworkBody { network }))
}

pub async fn get_network(
    State(fabric): State<Arc<Fabric>>,
    Path(id): Path<String>,
) -> ApiResult<NetworkBody> {
    let network = fabric.provision().get_network(&id).await?;
    Ok(Json(NetworkBody { network }))
}

pub async fn update_network(
    State(fabric): State<Arc<Fabric>>,
    Path(id): Path<String>,
    Json(body): Json<NetworkBody>,
) -> ApiResult<NetworkBody> {
    let network = fabric.provision().update_network(&id, body.network).await?;
    Ok(Json(NetworkBody { network }))
}

pub async fn delete_network(
    State(fabric): State<Arc<Fabric>>,
    Path(id): Path<String>,
) -> ApiResult<&'static str> {
    fabric.provision().delete_network(&id).await?;
    Ok(Json("OK"))
}

pub async fn create_port(
    State(fabric): State<Arc<Fabric>>,
    Json(body): Json<PortBody>,
) -> ApiResult<PortBody> {
    let port = fabric.provision().create_port(body.port).await?;
    Ok(Json(PortBody { port }))
}

pub async fn get_port(
    State(fabric): State<Arc<Fabric>>,
    Path(id): Path<String>,
) -> ApiResult<PortBody> {
    let port = fabric.provision().get_port(&id).await?;
    Ok(Json(PortBody { port }))
}

pub async fn update_port(
    State(fabric): State<Arc<Fabric>>,
    Path(id): Path<String>,
    Json(body): Json<PortBody>,
) -> ApiResult<PortBody> {
    let port = fabric.provision().update_port(&id, body.port).await?;
    Ok(Json(PortBody { port }))
}

pub async fn delete_port(
    State(fabric): State<Arc<Fabric>>,
    Path(id): Path<String>,
) -> ApiResult<&'static str> {
    fabric.provision().delete_port(&id).await?;
    Ok(Json("OK"))
}
