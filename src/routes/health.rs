// ABOUTME: Health endpoint reporting liveness and corpus index readiness
// ABOUTME: Degraded starts report ok with corpus_ready=false until the index loads
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Stretch Coach Contributors

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::server::ServerResources;

/// Health report payload
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub corpus_ready: bool,
    /// Only present on deep checks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_reachable: Option<bool>,
}

/// Query parameters for the health check
#[derive(Debug, Deserialize)]
pub struct HealthQuery {
    /// When true, also probe the generation backend
    #[serde(default)]
    pub deep: bool,
}

/// Health routes
pub struct HealthRoutes;

impl HealthRoutes {
    /// Create the health route
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/health", get(Self::health))
            .with_state(resources)
    }

    async fn health(
        State(resources): State<Arc<ServerResources>>,
        Query(query): Query<HealthQuery>,
    ) -> impl IntoResponse {
        let backend_reachable = if query.deep {
            Some(resources.provider.health_check().await.unwrap_or(false))
        } else {
            None
        };
        Json(HealthResponse {
            status: "ok",
            corpus_ready: resources.corpus.is_ready().await,
            backend_reachable,
        })
    }
}
