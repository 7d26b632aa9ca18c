use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::PathInfo;
use crate::command::ExternalCmd;
use crate::conf::{PathConf, SourceKind};
use crate::entity::{Publisher, Reader, StaticSource, StaticSourceFactory, StaticSourceSetup};
use crate::error::PathError;
use crate::media::MediaDesc;
use crate::metrics;
use crate::processor::UDP_MAX_PACKET_SIZE;
use crate::result::Result;
use crate::stream::Stream;

pub mod manager;
mod on_demand;

pub use manager::PathManager;

use on_demand::{OnDemand, OnDemandState};

/// Answer to a describe: either the live stream or a redirect the protocol
/// server translates for its client.
pub enum DescribeResult {
    Stream(Arc<Stream>),
    Redirect(String),
}

/// Path-initiated notifications folded into the manager's table.
pub(crate) enum ManagerNotify {
    Ready { name: String, id: Uuid },
    NotReady { name: String, id: Uuid },
    Close { name: String, id: Uuid },
}

enum PathRequest {
    Describe {
        resp: oneshot::Sender<Result<DescribeResult>>,
    },
    AddPublisher {
        publisher: Arc<dyn Publisher>,
        resp: oneshot::Sender<Result<()>>,
    },
    StartPublisher {
        publisher_id: String,
        medias: Vec<MediaDesc>,
        generate_rtp_packets: bool,
        resp: oneshot::Sender<Result<Arc<Stream>>>,
    },
    RemovePublisher {
        publisher_id: String,
        resp: oneshot::Sender<()>,
    },
    AddReader {
        reader: Arc<dyn Reader>,
        resp: oneshot::Sender<Result<Arc<Stream>>>,
    },
    ReaderPlay {
        reader_id: String,
        resp: oneshot::Sender<Result<()>>,
    },
    ReaderStop {
        reader_id: String,
        resp: oneshot::Sender<()>,
    },
    RemoveReader {
        reader_id: String,
        resp: oneshot::Sender<()>,
    },
    SourceReady {
        medias: Vec<MediaDesc>,
        generate_rtp_packets: bool,
        resp: oneshot::Sender<Result<Arc<Stream>>>,
    },
    SourceNotReady {
        resp: oneshot::Sender<()>,
    },
    ReloadConf {
        conf: Arc<PathConf>,
        resp: oneshot::Sender<()>,
    },
    ApiInfo {
        resp: oneshot::Sender<PathInfo>,
    },
}

/// Handle to a path actor. Cheap to clone; all methods are request/response
/// pairs serialized by the actor's event loop and fail with `Terminated`
/// once the path is gone.
#[derive(Clone)]
pub struct Path {
    id: Uuid,
    name: Arc<str>,
    tx: mpsc::UnboundedSender<PathRequest>,
}

impl Path {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> PathRequest,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(build(tx))
            .map_err(|_| PathError::Terminated)?;
        rx.await.map_err(|_| PathError::Terminated)
    }

    /// Resolves once the source is ready, the on-demand start times out, or
    /// the path dies; held requests are released exactly once.
    pub async fn describe(&self) -> Result<DescribeResult> {
        self.request(|resp| PathRequest::Describe { resp }).await?
    }

    pub async fn add_publisher(&self, publisher: Arc<dyn Publisher>) -> Result<()> {
        self.request(|resp| PathRequest::AddPublisher { publisher, resp })
            .await?
    }

    /// Declares the publisher's media description and brings the path ready.
    pub async fn start_publisher(
        &self,
        publisher_id: impl ToString,
        medias: Vec<MediaDesc>,
        generate_rtp_packets: bool,
    ) -> Result<Arc<Stream>> {
        self.request(|resp| PathRequest::StartPublisher {
            publisher_id: publisher_id.to_string(),
            medias,
            generate_rtp_packets,
            resp,
        })
        .await?
    }

    pub async fn remove_publisher(&self, publisher_id: impl ToString) {
        let _ = self
            .request(|resp| PathRequest::RemovePublisher {
                publisher_id: publisher_id.to_string(),
                resp,
            })
            .await;
    }

    /// Admits a reader (pre-play) and hands out the stream, waiting through
    /// an on-demand start when needed.
    pub async fn add_reader(&self, reader: Arc<dyn Reader>) -> Result<Arc<Stream>> {
        self.request(|resp| PathRequest::AddReader { reader, resp })
            .await?
    }

    pub async fn reader_play(&self, reader_id: impl ToString) -> Result<()> {
        self.request(|resp| PathRequest::ReaderPlay {
            reader_id: reader_id.to_string(),
            resp,
        })
        .await?
    }

    pub async fn reader_stop(&self, reader_id: impl ToString) {
        let _ = self
            .request(|resp| PathRequest::ReaderStop {
                reader_id: reader_id.to_string(),
                resp,
            })
            .await;
    }

    pub async fn remove_reader(&self, reader_id: impl ToString) {
        let _ = self
            .request(|resp| PathRequest::RemoveReader {
                reader_id: reader_id.to_string(),
                resp,
            })
            .await;
    }

    pub async fn api_info(&self) -> Result<PathInfo> {
        self.request(|resp| PathRequest::ApiInfo { resp }).await
    }

    pub(crate) async fn reload_conf(&self, conf: Arc<PathConf>) {
        let _ = self
            .request(|resp| PathRequest::ReloadConf { conf, resp })
            .await;
    }

    pub fn source_handle(&self) -> SourceHandle {
        SourceHandle { path: self.clone() }
    }
}

/// Given to static-source implementations so they can report readiness back
/// into their path.
#[derive(Clone)]
pub struct SourceHandle {
    path: Path,
}

impl SourceHandle {
    pub fn path_name(&self) -> &str {
        self.path.name()
    }

    pub async fn set_ready(
        &self,
        medias: Vec<MediaDesc>,
        generate_rtp_packets: bool,
    ) -> Result<Arc<Stream>> {
        self.path
            .request(|resp| PathRequest::SourceReady {
                medias,
                generate_rtp_packets,
                resp,
            })
            .await?
    }

    pub async fn set_not_ready(&self) {
        let _ = self
            .path
            .request(|resp| PathRequest::SourceNotReady { resp })
            .await;
    }
}

pub(crate) struct PathParams {
    pub name: String,
    pub conf: Arc<PathConf>,
    /// Regex submatches of the name against the template, exposed to
    /// external commands as G1..Gn.
    pub matches: Vec<String>,
    /// True for paths born from a template: they destroy themselves once
    /// nothing references them.
    pub dynamic: bool,
    pub manager_tx: mpsc::UnboundedSender<ManagerNotify>,
    pub factory: Option<StaticSourceFactory>,
    pub token: CancellationToken,
}

pub(crate) fn spawn(params: PathParams) -> Path {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = Path {
        id: Uuid::new_v4(),
        name: Arc::from(params.name.as_str()),
        tx,
    };
    let actor = PathActor {
        id: handle.id,
        name: params.name,
        conf: params.conf,
        matches: params.matches,
        dynamic: params.dynamic,
        manager_tx: params.manager_tx,
        factory: params.factory,
        token: params.token,
        handle: handle.clone(),
        rx,
        source: SourceAttachment::None,
        on_demand: None,
        stream: None,
        ready_time: None,
        readers: HashMap::new(),
        describe_holds: Vec::new(),
        reader_holds: Vec::new(),
        on_init_cmd: None,
        on_demand_cmd: None,
        on_ready_cmd: None,
    };
    tokio::spawn(actor.run());
    handle
}

enum SourceAttachment {
    None,
    Publisher(Arc<dyn Publisher>),
    Static(Arc<dyn StaticSource>),
    Redirect,
}

struct ReaderEntry {
    reader: Arc<dyn Reader>,
    playing: bool,
    on_read_cmd: Option<ExternalCmd>,
}

struct PathActor {
    id: Uuid,
    name: String,
    conf: Arc<PathConf>,
    matches: Vec<String>,
    dynamic: bool,
    manager_tx: mpsc::UnboundedSender<ManagerNotify>,
    factory: Option<StaticSourceFactory>,
    token: CancellationToken,
    handle: Path,
    rx: mpsc::UnboundedReceiver<PathRequest>,

    source: SourceAttachment,
    on_demand: Option<OnDemand>,
    stream: Option<Arc<Stream>>,
    ready_time: Option<DateTime<Utc>>,
    readers: HashMap<String, ReaderEntry>,
    describe_holds: Vec<oneshot::Sender<Result<DescribeResult>>>,
    reader_holds: Vec<(Arc<dyn Reader>, oneshot::Sender<Result<Arc<Stream>>>)>,

    on_init_cmd: Option<ExternalCmd>,
    on_demand_cmd: Option<ExternalCmd>,
    on_ready_cmd: Option<ExternalCmd>,
}

async fn sleep_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl PathActor {
    async fn run(mut self) {
        self.init();
        loop {
            let start_deadline = self.on_demand.as_ref().and_then(|od| od.start_deadline());
            let close_deadline = self.on_demand.as_ref().and_then(|od| od.close_deadline());
            tokio::select! {
                _ = self.token.cancelled() => break,
                req = self.rx.recv() => match req {
                    Some(req) => self.handle_request(req),
                    None => break,
                },
                _ = sleep_opt(start_deadline) => self.on_start_timeout(),
                _ = sleep_opt(close_deadline) => self.on_close_timeout(),
            }
        }
        self.shutdown();
    }

    fn init(&mut self) {
        metrics::PATH.inc();
        info!("[path {}] created", self.name);

        if !self.conf.run_on_init.is_empty() {
            self.on_init_cmd = Some(ExternalCmd::new(
                &self.conf.run_on_init,
                self.conf.run_on_init_restart,
                self.cmd_env(),
                format!("path {}] [runOnInit", self.name),
            ));
        }

        match self.conf.source_kind() {
            SourceKind::Publisher => {
                if !self.conf.run_on_demand.is_empty() {
                    self.on_demand = Some(OnDemand::new(
                        self.conf.run_on_demand_start_timeout,
                        self.conf.run_on_demand_close_after,
                    ));
                }
            }
            SourceKind::Url(_) | SourceKind::RpiCamera => {
                let Some(factory) = self.factory.clone() else {
                    warn!(
                        "[path {}] static source '{}' configured but no source factory installed",
                        self.name, self.conf.source
                    );
                    return;
                };
                let source = factory(StaticSourceSetup {
                    source: self.conf.source.clone(),
                    conf: self.conf.clone(),
                    handle: self.handle.source_handle(),
                });
                if self.conf.source_on_demand {
                    self.on_demand = Some(OnDemand::new(
                        self.conf.source_on_demand_start_timeout,
                        self.conf.source_on_demand_close_after,
                    ));
                } else {
                    source.start();
                }
                self.source = SourceAttachment::Static(source);
            }
            SourceKind::Redirect => {
                self.source = SourceAttachment::Redirect;
            }
        }
    }

    fn cmd_env(&self) -> Vec<(String, String)> {
        let mut env = vec![("LP_PATH".to_string(), self.name.clone())];
        for (i, m) in self.matches.iter().enumerate() {
            env.push((format!("G{}", i + 1), m.clone()));
        }
        env
    }

    fn handle_request(&mut self, req: PathRequest) {
        match req {
            PathRequest::Describe { resp } => self.on_describe(resp),
            PathRequest::AddPublisher { publisher, resp } => {
                let _ = resp.send(self.on_add_publisher(publisher));
            }
            PathRequest::StartPublisher {
                publisher_id,
                medias,
                generate_rtp_packets,
                resp,
            } => {
                let _ =
                    resp.send(self.on_start_publisher(&publisher_id, medias, generate_rtp_packets));
            }
            PathRequest::RemovePublisher { publisher_id, resp } => {
                self.on_remove_publisher(&publisher_id);
                let _ = resp.send(());
            }
            PathRequest::AddReader { reader, resp } => self.on_add_reader(reader, resp),
            PathRequest::ReaderPlay { reader_id, resp } => {
                let _ = resp.send(self.on_reader_play(&reader_id));
            }
            PathRequest::ReaderStop { reader_id, resp } => {
                self.on_reader_stop(&reader_id);
                let _ = resp.send(());
            }
            PathRequest::RemoveReader { reader_id, resp } => {
                self.on_remove_reader(&reader_id);
                let _ = resp.send(());
            }
            PathRequest::SourceReady {
                medias,
                generate_rtp_packets,
                resp,
            } => {
                let _ = resp.send(self.on_source_ready(medias, generate_rtp_packets));
            }
            PathRequest::SourceNotReady { resp } => {
                self.on_source_not_ready();
                let _ = resp.send(());
            }
            PathRequest::ReloadConf { conf, resp } => {
                debug!("[path {}] hot reload applied", self.name);
                self.conf = conf;
                let _ = resp.send(());
            }
            PathRequest::ApiInfo { resp } => {
                let _ = resp.send(self.api_info());
            }
        }
    }

    fn on_describe(&mut self, resp: oneshot::Sender<Result<DescribeResult>>) {
        if let Some(stream) = &self.stream {
            let _ = resp.send(Ok(DescribeResult::Stream(stream.clone())));
            return;
        }

        match &self.source {
            SourceAttachment::Redirect => {
                let target = self.conf.source_redirect.clone().unwrap_or_default();
                let _ = resp.send(Ok(DescribeResult::Redirect(target)));
            }
            SourceAttachment::Static(_) => {
                self.start_on_demand_source();
                self.describe_holds.push(resp);
            }
            SourceAttachment::Publisher(_) => {
                // A publisher is attached but has not declared media yet
                // (ANNOUNCE before RECORD); wait for it to start or leave.
                self.describe_holds.push(resp);
            }
            SourceAttachment::None => {
                if !self.conf.run_on_demand.is_empty() {
                    self.start_on_demand_source();
                    self.describe_holds.push(resp);
                } else if let Some(fallback) = &self.conf.fallback {
                    let _ = resp.send(Ok(DescribeResult::Redirect(fallback.clone())));
                } else {
                    let _ = resp.send(Err(PathError::NoOnePublishing));
                }
            }
        }
        self.maybe_self_destroy();
    }

    fn on_add_reader(
        &mut self,
        reader: Arc<dyn Reader>,
        resp: oneshot::Sender<Result<Arc<Stream>>>,
    ) {
        if self.stream.is_some() {
            let _ = resp.send(self.admit_reader(reader));
            return;
        }

        match &self.source {
            SourceAttachment::Redirect => {
                let _ = resp.send(Err(PathError::invalid_operation(
                    "cannot read from a redirect path",
                )));
            }
            SourceAttachment::Static(_) => {
                self.start_on_demand_source();
                self.reader_holds.push((reader, resp));
            }
            SourceAttachment::Publisher(_) => {
                self.reader_holds.push((reader, resp));
            }
            SourceAttachment::None => {
                if !self.conf.run_on_demand.is_empty() {
                    self.start_on_demand_source();
                    self.reader_holds.push((reader, resp));
                } else {
                    let _ = resp.send(Err(PathError::NoOnePublishing));
                }
            }
        }
        self.maybe_self_destroy();
    }

    /// Starts the applicable on-demand machinery if this is the first
    /// request needing it. For always-on static sources this is a no-op:
    /// the source is already running and the request just waits for ready.
    fn start_on_demand_source(&mut self) {
        let Some(od) = &mut self.on_demand else {
            return;
        };
        if !od.start() {
            return;
        }
        match &self.source {
            SourceAttachment::Static(source) => {
                info!("[path {}] starting on-demand source", self.name);
                source.start();
            }
            _ => {
                info!("[path {}] starting runOnDemand command", self.name);
                self.on_demand_cmd = Some(ExternalCmd::new(
                    &self.conf.run_on_demand,
                    self.conf.run_on_demand_restart,
                    self.cmd_env(),
                    format!("path {}] [runOnDemand", self.name),
                ));
            }
        }
    }

    fn admit_reader(&mut self, reader: Arc<dyn Reader>) -> Result<Arc<Stream>> {
        let stream = self
            .stream
            .clone()
            .ok_or(PathError::NoOnePublishing)?;
        if self.conf.max_readers != 0 && self.readers.len() >= self.conf.max_readers {
            return Err(PathError::TooManyReaders);
        }
        let info = reader.identify();
        debug!("[path {}] reader {} attached", self.name, info.id);
        self.readers.insert(
            info.id,
            ReaderEntry {
                reader,
                playing: false,
                on_read_cmd: None,
            },
        );
        metrics::READ.inc();
        if let Some(od) = &mut self.on_demand {
            od.reader_attached();
        }
        Ok(stream)
    }

    fn on_reader_play(&mut self, reader_id: &str) -> Result<()> {
        if !self.readers.contains_key(reader_id) {
            return Err(PathError::invalid_operation("unknown reader"));
        }
        let run_on_read = (!self.conf.run_on_read.is_empty()).then(|| {
            let mut env = self.cmd_env();
            env.push(("LP_READER_ID".to_string(), reader_id.to_string()));
            ExternalCmd::new(
                &self.conf.run_on_read,
                self.conf.run_on_read_restart,
                env,
                format!("path {}] [runOnRead", self.name),
            )
        });
        let entry = self.readers.get_mut(reader_id).unwrap();
        entry.playing = true;
        entry.on_read_cmd = run_on_read;
        if let Some(od) = &mut self.on_demand {
            od.reader_attached();
        }
        Ok(())
    }

    fn on_reader_stop(&mut self, reader_id: &str) {
        if let Some(entry) = self.readers.get_mut(reader_id) {
            entry.playing = false;
            entry.on_read_cmd = None;
        }
    }

    fn on_remove_reader(&mut self, reader_id: &str) {
        if self.readers.remove(reader_id).is_some() {
            metrics::READ.dec();
            if let Some(stream) = &self.stream {
                stream.remove_reader(reader_id);
            }
            debug!("[path {}] reader {} removed", self.name, reader_id);
        }
        if self.readers.is_empty() {
            if let Some(od) = &mut self.on_demand {
                od.readers_gone();
            }
        }
        self.maybe_self_destroy();
    }

    fn on_add_publisher(&mut self, publisher: Arc<dyn Publisher>) -> Result<()> {
        if self.conf.source_kind() != SourceKind::Publisher {
            return Err(PathError::invalid_operation(format!(
                "path '{}' does not accept publishers",
                self.name
            )));
        }

        if let SourceAttachment::Publisher(existing) = &self.source {
            if self.conf.disable_publisher_override {
                return Err(PathError::PublisherConflict);
            }
            info!(
                "[path {}] closing existing publisher {}",
                self.name,
                existing.identify().id
            );
            existing.close();
            self.set_not_ready();
        } else {
            metrics::PUBLISH.inc();
        }

        info!(
            "[path {}] publisher {} attached",
            self.name,
            publisher.identify().id
        );
        self.source = SourceAttachment::Publisher(publisher);
        Ok(())
    }

    fn on_start_publisher(
        &mut self,
        publisher_id: &str,
        medias: Vec<MediaDesc>,
        generate_rtp_packets: bool,
    ) -> Result<Arc<Stream>> {
        let SourceAttachment::Publisher(publisher) = &self.source else {
            return Err(PathError::invalid_operation("no publisher attached"));
        };
        if publisher.identify().id != publisher_id {
            return Err(PathError::invalid_operation(
                "publisher is no longer attached",
            ));
        }
        let stream = Arc::new(Stream::new(
            medias,
            generate_rtp_packets,
            UDP_MAX_PACKET_SIZE,
        )?);
        self.set_ready(stream.clone());
        Ok(stream)
    }

    fn on_remove_publisher(&mut self, publisher_id: &str) {
        let SourceAttachment::Publisher(publisher) = &self.source else {
            return;
        };
        if publisher.identify().id != publisher_id {
            return;
        }
        info!("[path {}] publisher {} removed", self.name, publisher_id);
        self.set_not_ready();
        self.source = SourceAttachment::None;
        metrics::PUBLISH.dec();
        if let Some(od) = &mut self.on_demand {
            od.reset();
            self.on_demand_cmd = None;
        }
        // Requests parked on a publisher that left without declaring media.
        self.flush_holds_with(|| PathError::NoOnePublishing);
        self.maybe_self_destroy();
    }

    fn on_source_ready(
        &mut self,
        medias: Vec<MediaDesc>,
        generate_rtp_packets: bool,
    ) -> Result<Arc<Stream>> {
        if !matches!(self.source, SourceAttachment::Static(_)) {
            return Err(PathError::invalid_operation(
                "path has no static source",
            ));
        }
        if self.stream.is_some() {
            return Err(PathError::invalid_operation("source is already ready"));
        }
        let stream = Arc::new(Stream::new(
            medias,
            generate_rtp_packets,
            UDP_MAX_PACKET_SIZE,
        )?);
        self.set_ready(stream.clone());
        Ok(stream)
    }

    fn on_source_not_ready(&mut self) {
        self.set_not_ready();
        if let Some(od) = &mut self.on_demand {
            if let SourceAttachment::Static(source) = &self.source {
                source.stop();
            }
            od.reset();
        }
    }

    /// The single ready transition: store the stream, flush every held
    /// request, notify the manager, fire runOnReady.
    fn set_ready(&mut self, stream: Arc<Stream>) {
        self.stream = Some(stream.clone());
        self.ready_time = Some(Utc::now());
        metrics::PATH_READY.inc();
        info!("[path {}] ready, tracks: {:?}", self.name, stream.track_labels());

        if !self.conf.run_on_ready.is_empty() {
            self.on_ready_cmd = Some(ExternalCmd::new(
                &self.conf.run_on_ready,
                self.conf.run_on_ready_restart,
                self.cmd_env(),
                format!("path {}] [runOnReady", self.name),
            ));
        }

        for resp in self.describe_holds.drain(..) {
            let _ = resp.send(Ok(DescribeResult::Stream(stream.clone())));
        }
        let held_readers: Vec<_> = self.reader_holds.drain(..).collect();
        for (reader, resp) in held_readers {
            let _ = resp.send(self.admit_reader(reader));
        }

        if let Some(od) = &mut self.on_demand {
            od.set_ready(!self.readers.is_empty());
        }

        let _ = self.manager_tx.send(ManagerNotify::Ready {
            name: self.name.clone(),
            id: self.id,
        });
    }

    /// The single not-ready transition: destroy the stream, close
    /// runOnReady, evict every reader, notify the manager.
    fn set_not_ready(&mut self) {
        if self.stream.take().is_none() {
            return;
        }
        self.ready_time = None;
        metrics::PATH_READY.dec();
        self.on_ready_cmd = None;
        info!("[path {}] not ready", self.name);

        for (id, entry) in self.readers.drain() {
            debug!("[path {}] evicting reader {}", self.name, id);
            entry.reader.close();
            metrics::READ.dec();
        }

        let _ = self.manager_tx.send(ManagerNotify::NotReady {
            name: self.name.clone(),
            id: self.id,
        });
    }

    fn on_start_timeout(&mut self) {
        let waiting = self
            .on_demand
            .as_ref()
            .is_some_and(|od| od.state() == OnDemandState::WaitingReady);
        if !waiting {
            return;
        }
        warn!("[path {}] on-demand source start timed out", self.name);
        self.flush_holds_with(|| PathError::SourceTimeout);
        self.stop_on_demand_source();
        self.maybe_self_destroy();
    }

    fn on_close_timeout(&mut self) {
        let closing = self
            .on_demand
            .as_ref()
            .is_some_and(|od| od.state() == OnDemandState::Closing);
        if !closing {
            return;
        }
        info!(
            "[path {}] closing on-demand source, no readers attached",
            self.name
        );
        self.set_not_ready();
        self.stop_on_demand_source();
        self.maybe_self_destroy();
    }

    fn stop_on_demand_source(&mut self) {
        match &self.source {
            SourceAttachment::Static(source) => source.stop(),
            SourceAttachment::Publisher(publisher) => publisher.close(),
            _ => {}
        }
        self.on_demand_cmd = None;
        if let Some(od) = &mut self.on_demand {
            od.reset();
        }
    }

    fn flush_holds_with(&mut self, make: impl Fn() -> PathError) {
        for resp in self.describe_holds.drain(..) {
            let _ = resp.send(Err(make()));
        }
        for (_, resp) in self.reader_holds.drain(..) {
            let _ = resp.send(Err(make()));
        }
    }

    /// A template-born path with nothing referencing it removes itself from
    /// the manager's table.
    fn maybe_self_destroy(&mut self) {
        if !self.dynamic {
            return;
        }
        let no_source = matches!(
            self.source,
            SourceAttachment::None | SourceAttachment::Redirect
        );
        if no_source
            && self.stream.is_none()
            && self.readers.is_empty()
            && self.describe_holds.is_empty()
            && self.reader_holds.is_empty()
        {
            debug!("[path {}] nothing left to serve, closing", self.name);
            let _ = self.manager_tx.send(ManagerNotify::Close {
                name: self.name.clone(),
                id: self.id,
            });
        }
    }

    fn api_info(&self) -> PathInfo {
        PathInfo {
            name: self.name.clone(),
            conf_name: self.conf.name.clone(),
            source: match &self.source {
                SourceAttachment::Publisher(p) => Some(p.identify()),
                SourceAttachment::Static(s) => Some(s.identify()),
                _ => None,
            },
            ready: self.stream.is_some(),
            ready_time: self.ready_time,
            tracks: self
                .stream
                .as_ref()
                .map(|s| s.track_labels())
                .unwrap_or_default(),
            bytes_received: self
                .stream
                .as_ref()
                .map(|s| s.bytes_received())
                .unwrap_or(0),
            readers: self
                .readers
                .values()
                .map(|e| e.reader.identify())
                .collect(),
        }
    }

    fn shutdown(&mut self) {
        self.flush_holds_with(|| PathError::Terminated);
        self.set_not_ready();
        for (_, entry) in self.readers.drain() {
            entry.reader.close();
            metrics::READ.dec();
        }
        match std::mem::replace(&mut self.source, SourceAttachment::None) {
            SourceAttachment::Publisher(publisher) => {
                publisher.close();
                metrics::PUBLISH.dec();
            }
            SourceAttachment::Static(source) => source.stop(),
            _ => {}
        }
        self.on_init_cmd = None;
        self.on_demand_cmd = None;
        self.on_ready_cmd = None;
        metrics::PATH.dec();
        info!("[path {}] destroyed", self.name);
    }
}
