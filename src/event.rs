/// Path lifecycle notifications, broadcast to surrounding infrastructure
/// (HLS muxer supervisor, metrics scrapers, webhooks).
#[derive(Clone, Debug)]
pub enum Event {
    PathReady { name: String },
    PathNotReady { name: String },
    PathClosed { name: String },
}

impl Event {
    pub fn path_name(&self) -> &str {
        match self {
            Event::PathReady { name } => name,
            Event::PathNotReady { name } => name,
            Event::PathClosed { name } => name,
        }
    }
}
