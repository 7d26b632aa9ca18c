//! In-process routing plane of a real-time media router: named paths accept
//! one publisher each and fan packets out to any number of readers, with
//! per-codec normalization in between and no re-encoding. Protocol servers
//! (RTSP, RTMP, HLS, WebRTC, SRT) sit on top and only talk to
//! [`PathManager`], [`Path`] and [`Stream`].

pub mod api;
pub mod auth;
pub mod conf;
pub mod entity;
pub mod event;
pub mod media;
pub mod metrics;
pub mod processor;
pub mod result;
pub mod stream;
pub mod unit;

mod command;
mod error;
mod path;

pub use auth::AccessRequest;
pub use conf::{Conf, PathConf};
pub use entity::{
    EntityInfo, PathEntity, Publisher, Reader, StaticSource, StaticSourceFactory,
    StaticSourceSetup,
};
pub use error::PathError;
pub use event::Event;
pub use path::{DescribeResult, Path, PathManager, SourceHandle};
pub use stream::writer::{WriteTask, Writer, WriterSender};
pub use stream::{ReaderDelivery, Stream, UnitFn};
pub use unit::{Payload, Unit};

pub fn metrics_register() {
    metrics::REGISTRY
        .register(Box::new(metrics::PATH.clone()))
        .unwrap();
    metrics::REGISTRY
        .register(Box::new(metrics::PATH_READY.clone()))
        .unwrap();
    metrics::REGISTRY
        .register(Box::new(metrics::PUBLISH.clone()))
        .unwrap();
    metrics::REGISTRY
        .register(Box::new(metrics::READ.clone()))
        .unwrap();
    metrics::REGISTRY
        .register(Box::new(metrics::BYTES_RECEIVED.clone()))
        .unwrap();
}
