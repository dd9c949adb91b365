//! Subscriber-facing catalog routes: listing, lookup and subscribing.

use crate::{
    errors::AppError,
    handlers::auth::request_claims,
    models::{
        catalog::{CatalogEntry, CatalogPage},
        claims::Role,
    },
    services::{
        catalog::ListRequest,
        claims::{authorize, subject},
    },
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::HeaderMap,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Query string for `GET /apps`.
#[derive(Debug, Deserialize)]
pub struct ListAppsQuery {
    pub limit: Option<String>,
    pub cursor: Option<String>,
    #[serde(rename = "getSubscribed")]
    pub get_subscribed: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SubscribeQuery {
    #[serde(rename = "appID")]
    pub app_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AppResponse {
    pub app: CatalogEntry,
}

/// `GET /apps?limit=&cursor=&getSubscribed=true`
pub async fn list_apps(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListAppsQuery>,
) -> Result<Json<CatalogPage>, AppError> {
    let claims = request_claims(&headers)?;
    authorize(&claims, Role::Subscriber)?;

    let subscribed_user = if query.get_subscribed.as_deref() == Some("true") {
        Some(subject(&claims)?)
    } else {
        None
    };

    let page = state
        .catalog
        .list(ListRequest {
            limit: query.limit.as_deref(),
            cursor: query.cursor.as_deref(),
            subscribed_user,
        })
        .await?;
    Ok(Json(page))
}

/// `GET /apps/{app_id}`
pub async fn get_app(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(app_id): Path<String>,
) -> Result<Json<AppResponse>, AppError> {
    let claims = request_claims(&headers)?;
    authorize(&claims, Role::Subscriber)?;

    let app = state
        .catalog
        .get(&app_id)
        .await?
        .ok_or_else(|| AppError::not_found("app not found"))?;
    Ok(Json(AppResponse { app }))
}

/// `POST /subscribe?appID=`
pub async fn subscribe(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SubscribeQuery>,
) -> Result<Json<Value>, AppError> {
    let claims = request_claims(&headers)?;
    authorize(&claims, Role::Subscriber)?;

    let app_id = query
        .app_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::bad_request("appID is required"))?;
    let user_id = subject(&claims)?;

    state.subscriptions.subscribe(&app_id, user_id).await?;
    Ok(Json(json!({ "message": "Successfully subscribed to app" })))
}
