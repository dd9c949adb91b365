//! Access to the claim bag forwarded by the gateway.

use crate::{errors::AppError, models::claims::Claims};
use axum::http::HeaderMap;
use serde_json::Value;
use std::collections::HashMap;

/// Header carrying the verified token's claims as a JSON object.
pub const CLAIMS_HEADER: &str = "x-authorizer-claims";

/// Decode the claims header. A missing header yields an empty bag so that
/// the role check reports the missing groups; a malformed one is a 400.
pub fn request_claims(headers: &HeaderMap) -> Result<Claims, AppError> {
    let Some(raw) = headers.get(CLAIMS_HEADER) else {
        return Ok(Claims::new());
    };
    let raw = raw
        .to_str()
        .map_err(|_| AppError::bad_request("invalid claims header"))?;
    let values: HashMap<String, Value> =
        serde_json::from_str(raw).map_err(|_| AppError::bad_request("invalid claims header"))?;

    Ok(values
        .into_iter()
        .map(|(name, value)| {
            let value = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (name, value)
        })
        .collect())
}
