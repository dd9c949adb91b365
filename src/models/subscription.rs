//! User to app subscription relation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionEntry {
    pub app_id: String,
    pub user_id: String,
    pub subscription_time: DateTime<Utc>,
}
