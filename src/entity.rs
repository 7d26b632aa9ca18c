use std::sync::Arc;

use serde::Serialize;

use crate::conf::PathConf;
use crate::path::SourceHandle;

/// Type and id of a publisher, reader or source, for logs and the
/// introspection API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityInfo {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

impl EntityInfo {
    pub fn new(kind: impl ToString, id: impl ToString) -> Self {
        EntityInfo {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }
}

/// Capability set shared by publishers and readers: they can be identified
/// and told to tear their session down. `close` is a signal, not a wait: the
/// session reacts by removing itself from the path.
pub trait PathEntity: Send + Sync {
    fn identify(&self) -> EntityInfo;
    fn close(&self);
}

pub trait Publisher: PathEntity {}

pub trait Reader: PathEntity {}

/// A pull-mode producer owned by its path (RTSP/RTMP/SRT/WHEP client,
/// local camera). The path starts and stops it according to the on-demand
/// state machine; the implementation reports back through the
/// [`SourceHandle`] it was built with.
pub trait StaticSource: Send + Sync {
    fn identify(&self) -> EntityInfo;
    fn start(&self);
    fn stop(&self);
}

/// Everything a static-source implementation needs to wire itself to a path.
pub struct StaticSourceSetup {
    pub source: String,
    pub conf: Arc<PathConf>,
    pub handle: SourceHandle,
}

/// Installed into the path manager by the hosting process; invoked whenever a
/// path with a pull source is created.
pub type StaticSourceFactory =
    Arc<dyn Fn(StaticSourceSetup) -> Arc<dyn StaticSource> + Send + Sync>;
