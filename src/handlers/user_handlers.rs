use crate::{
    errors::AppError, handlers::auth::request_claims, models::claims::Role,
    services::claims::username, state::AppState,
};
use axum::{Json, body::Bytes, extract::State, http::HeaderMap};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    #[serde(rename = "newRole", default)]
    pub new_role: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct UpdateRoleResponse {
    pub message: &'static str,
    pub roles: Vec<Role>,
}

/// `PUT /user-role`: replace the caller's roles.
pub async fn update_user_role(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<UpdateRoleResponse>, AppError> {
    let request: UpdateRoleRequest = serde_json::from_slice(&body)
        .map_err(|_| AppError::bad_request("Invalid request body"))?;
    let claims = request_claims(&headers)?;
    let user = username(&claims)?;

    let roles = state.roles.set_roles(user, &request.new_role).await?;
    Ok(Json(UpdateRoleResponse {
        message: "User roles updated successfully",
        roles,
    }))
}

#[derive(Debug, Serialize)]
pub struct UserRolesResponse {
    pub roles: Vec<Role>,
}

/// `GET /user-role`: the caller's current roles.
pub async fn get_user_roles(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<UserRolesResponse>, AppError> {
    let claims = request_claims(&headers)?;
    let user = username(&claims)?;
    let roles = state.roles.roles(user).await?;
    Ok(Json(UserRolesResponse { roles }))
}

#[derive(Debug, Default, Deserialize)]
pub struct EnrollRequest {
    /// Comma separated, e.g. `"Subscriber,Publisher"`.
    #[serde(rename = "preferredRoles", default)]
    pub preferred_roles: Option<String>,
}

/// `POST /user-role/enroll`: grant the roles chosen at sign-up, keeping any
/// the caller already holds. An empty body enrolls as a subscriber.
pub async fn enroll_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<UpdateRoleResponse>, AppError> {
    let request: EnrollRequest = if body.is_empty() {
        EnrollRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|_| AppError::bad_request("Invalid request body"))?
    };
    let claims = request_claims(&headers)?;
    let user = username(&claims)?;

    let roles = state
        .roles
        .enroll(user, request.preferred_roles.as_deref())
        .await?;
    Ok(Json(UpdateRoleResponse {
        message: "User enrolled successfully",
        roles,
    }))
}
