use lazy_static::lazy_static;
use prometheus::{IntCounter, IntGauge, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref PATH: IntGauge =
        IntGauge::new("path", "Number of active paths").unwrap();
    pub static ref PATH_READY: IntGauge =
        IntGauge::new("path_ready", "Number of paths with a ready source").unwrap();
    pub static ref PUBLISH: IntGauge =
        IntGauge::new("publish", "Number of attached publishers").unwrap();
    pub static ref READ: IntGauge =
        IntGauge::new("read", "Number of attached readers").unwrap();
    pub static ref BYTES_RECEIVED: IntCounter =
        IntCounter::new("bytes_received", "Bytes received from sources").unwrap();
    pub static ref ENCODER: TextEncoder = TextEncoder::new();
}
