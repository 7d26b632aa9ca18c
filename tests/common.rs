#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use livepath::media::{FormatDesc, MediaDesc, MediaKind};
use livepath::{
    Conf, EntityInfo, PathConf, PathEntity, Publisher, Reader, StaticSource,
    StaticSourceFactory, StaticSourceSetup,
};

pub fn localhost() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

pub fn h264_media() -> MediaDesc {
    MediaDesc {
        kind: MediaKind::Video,
        formats: vec![FormatDesc::H264 {
            payload_type: 96,
            sps: Some(vec![0x67, 0x64, 0x00, 0x1E]),
            pps: Some(vec![0x68, 0xEE, 0x3C, 0x80]),
        }],
    }
}

pub fn aac_media() -> MediaDesc {
    MediaDesc {
        kind: MediaKind::Audio,
        formats: vec![FormatDesc::Mpeg4Audio {
            payload_type: 97,
            sample_rate: 48_000,
            channels: 2,
            config: vec![0x11, 0x90],
        }],
    }
}

pub fn publisher_conf(name: &str) -> PathConf {
    PathConf {
        name: name.to_string(),
        ..Default::default()
    }
}

pub fn single_path_conf(path: PathConf) -> Conf {
    Conf {
        paths: vec![path],
        ..Default::default()
    }
}

pub struct TestPublisher {
    id: String,
    closed: AtomicBool,
}

impl TestPublisher {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(TestPublisher {
            id: id.to_string(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl PathEntity for TestPublisher {
    fn identify(&self) -> EntityInfo {
        EntityInfo::new("testPublisher", &self.id)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl Publisher for TestPublisher {}

pub struct TestReader {
    id: String,
    closed: AtomicBool,
}

impl TestReader {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(TestReader {
            id: id.to_string(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl PathEntity for TestReader {
    fn identify(&self) -> EntityInfo {
        EntityInfo::new("testReader", &self.id)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl Reader for TestReader {}

/// Mocked pull source: on `start` it waits `ready_after` and then declares
/// the given media description, unless `never_ready` is set.
pub struct TestSource {
    setup: StaticSourceSetup,
    medias: Vec<MediaDesc>,
    ready_after: Duration,
    never_ready: bool,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl TestSource {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl StaticSource for TestSource {
    fn identify(&self) -> EntityInfo {
        EntityInfo::new("testSource", &self.setup.source)
    }

    fn start(&self) {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.never_ready {
            return;
        }
        let handle = self.setup.handle.clone();
        let medias = self.medias.clone();
        let delay = self.ready_after;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = handle.set_ready(medias, false).await;
        });
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Builds a factory returning a shared mock source so the test can observe
/// start/stop transitions.
pub fn test_source_factory(
    medias: Vec<MediaDesc>,
    ready_after: Duration,
    never_ready: bool,
) -> (StaticSourceFactory, Arc<std::sync::Mutex<Option<Arc<TestSource>>>>) {
    let slot: Arc<std::sync::Mutex<Option<Arc<TestSource>>>> =
        Arc::new(std::sync::Mutex::new(None));
    let slot2 = slot.clone();
    let factory: StaticSourceFactory = Arc::new(move |setup| {
        let source = Arc::new(TestSource {
            setup,
            medias: medias.clone(),
            ready_after,
            never_ready,
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        });
        *slot2.lock().unwrap() = Some(source.clone());
        source
    });
    (factory, slot)
}
