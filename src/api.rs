use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::entity::EntityInfo;

/// Introspection snapshot of one path, served as JSON by the HTTP layer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathInfo {
    pub name: String,
    pub conf_name: String,
    pub source: Option<EntityInfo>,
    pub ready: bool,
    pub ready_time: Option<DateTime<Utc>>,
    pub tracks: Vec<String>,
    pub bytes_received: u64,
    pub readers: Vec<EntityInfo>,
}
