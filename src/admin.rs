//! Administrative HTTP surface: tenant patches, status and metrics.

use crate::metrics;
use crate::tenant::{parse_records, TenantRegistry};
use bytes::Bytes;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use warp::http::{Method, StatusCode};
use warp::{Filter, Rejection, Reply};

fn with_registry(
    registry: Arc<TenantRegistry>,
) -> impl Filter<Extract = (Arc<TenantRegistry>,), Error = Infallible> + Clone {
    warp::any().map(move || registry.clone())
}

fn reply(status: StatusCode, body: serde_json::Value) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(warp::reply::json(&body), status)
}

pub fn routes(
    registry: Arc<TenantRegistry>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let patch = warp::path("patch")
        .and(warp::path::end())
        .and(warp::method())
        .and(warp::body::bytes())
        .and(with_registry(registry.clone()))
        .and_then(handle_patch);

    let status = warp::path("status")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_registry(registry))
        .and_then(|registry: Arc<TenantRegistry>| async move {
            let status = registry.status().await;
            Ok::<_, Rejection>(warp::reply::json(&status))
        });

    let metrics = warp::path("metrics")
        .and(warp::path::end())
        .and(warp::get())
        .map(metrics::render);

    patch.or(status).or(metrics)
}

async fn handle_patch(
    method: Method,
    body: Bytes,
    registry: Arc<TenantRegistry>,
) -> Result<warp::reply::WithStatus<warp::reply::Json>, Rejection> {
    if method != Method::PATCH && method != Method::POST {
        return Ok(reply(
            StatusCode::METHOD_NOT_ALLOWED,
            serde_json::json!({"error": "method not allowed"}),
        ));
    }

    let records = match parse_records(&body) {
        Ok(records) => records,
        Err(e) => {
            tracing::warn!("Rejected patch request: {}", e);
            return Ok(reply(
                StatusCode::BAD_REQUEST,
                serde_json::json!({"error": format!("invalid JSON: {}", e)}),
            ));
        }
    };

    match registry.apply_patch(&records).await {
        Ok(summary) => {
            tracing::info!(
                "Patch applied: created={:?} updated={:?} removed={:?} skipped={}",
                summary.created,
                summary.updated,
                summary.removed,
                summary.skipped
            );
            Ok(reply(StatusCode::OK, serde_json::json!({"status": "ok"})))
        }
        Err(e) => Ok(reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({"error": e.to_string()}),
        )),
    }
}

pub async fn serve(addr: SocketAddr, registry: Arc<TenantRegistry>) {
    tracing::info!("Starting admin server on {}", addr);
    warp::serve(routes(registry)).run(addr).await;
}
