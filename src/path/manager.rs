use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::PathInfo;
use crate::auth::{AccessChecker, AccessRequest, FAILURE_PAUSE};
use crate::conf::{validate_path_name, Conf, ConfDiff, PathConf};
use crate::entity::{Publisher, Reader, StaticSourceFactory};
use crate::error::PathError;
use crate::event::Event;
use crate::result::Result;
use crate::stream::Stream;

use super::{spawn, DescribeResult, ManagerNotify, Path, PathParams};

enum ManagerRequest {
    ReloadConf {
        conf: Conf,
        resp: oneshot::Sender<Result<()>>,
    },
    FindPathConf {
        access: AccessRequest,
        resp: oneshot::Sender<Result<Arc<PathConf>>>,
    },
    GetOrCreate {
        access: AccessRequest,
        resp: oneshot::Sender<Result<Path>>,
    },
    ApiPathsList {
        resp: oneshot::Sender<Vec<Path>>,
    },
    ApiPathsGet {
        name: String,
        resp: oneshot::Sender<Result<Path>>,
    },
}

/// Owner of the name→path table. A single actor serializes resolution,
/// creation, reload diffing and removal; everything a protocol server calls
/// goes through this handle.
#[derive(Clone)]
pub struct PathManager {
    tx: mpsc::UnboundedSender<ManagerRequest>,
    token: CancellationToken,
    events: broadcast::Sender<Event>,
}

impl PathManager {
    pub fn new(conf: Conf, factory: Option<StaticSourceFactory>) -> Result<Self> {
        conf.validate()?;
        let token = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(64);

        let mut actor = ManagerActor {
            checker: AccessChecker::new(conf.external_authentication_url.clone()),
            confs: compile_confs(&conf)?,
            paths: HashMap::new(),
            factory,
            notify_tx,
            notify_rx,
            rx,
            token: token.clone(),
            events: events.clone(),
        };
        actor.create_static_paths();
        tokio::spawn(actor.run());

        Ok(PathManager { tx, token, events })
    }

    /// Readiness transitions and removals, for the HLS supervisor and other
    /// surrounding infrastructure.
    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ManagerRequest,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(build(tx))
            .map_err(|_| PathError::Terminated)?;
        rx.await.map_err(|_| PathError::Terminated)
    }

    /// Applies the fixed anti-brute-force pause to hard authentication
    /// failures, in the caller's task.
    async fn auth_gate<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.is_hard_auth_failure() {
                tokio::time::sleep(FAILURE_PAUSE).await;
            }
        }
        result
    }

    pub async fn find_path_conf(&self, access: AccessRequest) -> Result<Arc<PathConf>> {
        let res = self
            .request(|resp| ManagerRequest::FindPathConf { access, resp })
            .await?;
        self.auth_gate(res).await
    }

    /// Resolve, authenticate, create the path if needed, and forward the
    /// describe. The on-demand wait happens here, in the caller's task.
    pub async fn describe(&self, access: AccessRequest) -> Result<(Path, DescribeResult)> {
        let res = self
            .request(|resp| ManagerRequest::GetOrCreate { access, resp })
            .await?;
        let path = self.auth_gate(res).await?;
        let result = path.describe().await?;
        Ok((path, result))
    }

    pub async fn add_publisher(
        &self,
        access: AccessRequest,
        publisher: Arc<dyn Publisher>,
    ) -> Result<Path> {
        let res = self
            .request(|resp| ManagerRequest::GetOrCreate { access, resp })
            .await?;
        let path = self.auth_gate(res).await?;
        path.add_publisher(publisher).await?;
        Ok(path)
    }

    pub async fn add_reader(
        &self,
        access: AccessRequest,
        reader: Arc<dyn Reader>,
    ) -> Result<(Path, Arc<Stream>)> {
        let res = self
            .request(|resp| ManagerRequest::GetOrCreate { access, resp })
            .await?;
        let path = self.auth_gate(res).await?;
        let stream = path.add_reader(reader).await?;
        Ok((path, stream))
    }

    pub async fn reload_conf(&self, conf: Conf) -> Result<()> {
        self.request(|resp| ManagerRequest::ReloadConf { conf, resp })
            .await?
    }

    pub async fn api_paths_list(&self) -> Result<Vec<PathInfo>> {
        let mut handles = self
            .request(|resp| ManagerRequest::ApiPathsList { resp })
            .await?;
        handles.sort_by(|a, b| a.name().cmp(b.name()));
        let mut out = Vec::with_capacity(handles.len());
        for handle in handles {
            // A path may die between the snapshot and the query; skip it.
            if let Ok(info) = handle.api_info().await {
                out.push(info);
            }
        }
        Ok(out)
    }

    pub async fn api_paths_get(&self, name: impl ToString) -> Result<PathInfo> {
        let handle = self
            .request(|resp| ManagerRequest::ApiPathsGet {
                name: name.to_string(),
                resp,
            })
            .await??;
        handle.api_info().await
    }

    /// Cancels the manager and, in cascade, every path.
    pub fn close(&self) {
        self.token.cancel();
    }
}

struct ConfEntry {
    conf: Arc<PathConf>,
    regex: Option<Regex>,
}

fn compile_confs(conf: &Conf) -> Result<Vec<ConfEntry>> {
    conf.paths
        .iter()
        .map(|p| {
            Ok(ConfEntry {
                regex: p.compile_regexp()?,
                conf: Arc::new(p.clone()),
            })
        })
        .collect()
}

struct PathSlot {
    path: Path,
    token: CancellationToken,
    conf_name: String,
}

struct ManagerActor {
    checker: AccessChecker,
    confs: Vec<ConfEntry>,
    paths: HashMap<String, PathSlot>,
    factory: Option<StaticSourceFactory>,
    notify_tx: mpsc::UnboundedSender<ManagerNotify>,
    notify_rx: mpsc::UnboundedReceiver<ManagerNotify>,
    rx: mpsc::UnboundedReceiver<ManagerRequest>,
    token: CancellationToken,
    events: broadcast::Sender<Event>,
}

impl ManagerActor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                req = self.rx.recv() => match req {
                    Some(req) => self.handle_request(req).await,
                    None => break,
                },
                notify = self.notify_rx.recv() => {
                    if let Some(notify) = notify {
                        self.handle_notify(notify);
                    }
                }
            }
        }
        self.shutdown();
    }

    async fn handle_request(&mut self, req: ManagerRequest) {
        match req {
            ManagerRequest::ReloadConf { conf, resp } => {
                let _ = resp.send(self.reload(conf).await);
            }
            ManagerRequest::FindPathConf { access, resp } => {
                let result = match self.find_conf(&access.name) {
                    Ok((conf, _)) => self
                        .checker
                        .authenticate(&conf, &access)
                        .await
                        .map(|()| conf),
                    Err(err) => Err(err),
                };
                let _ = resp.send(result);
            }
            ManagerRequest::GetOrCreate { access, resp } => {
                let _ = resp.send(self.get_or_create(&access).await);
            }
            ManagerRequest::ApiPathsList { resp } => {
                let _ = resp.send(self.paths.values().map(|s| s.path.clone()).collect());
            }
            ManagerRequest::ApiPathsGet { name, resp } => {
                let result = self
                    .paths
                    .get(&name)
                    .map(|s| s.path.clone())
                    .ok_or(PathError::PathNotFound);
                let _ = resp.send(result);
            }
        }
    }

    fn handle_notify(&mut self, notify: ManagerNotify) {
        match notify {
            ManagerNotify::Ready { name, id } => {
                if self.slot_matches(&name, id) {
                    let _ = self.events.send(Event::PathReady { name });
                }
            }
            ManagerNotify::NotReady { name, id } => {
                if self.slot_matches(&name, id) {
                    let _ = self.events.send(Event::PathNotReady { name });
                }
            }
            ManagerNotify::Close { name, id } => {
                if self.slot_matches(&name, id) {
                    self.close_path(&name);
                }
            }
        }
    }

    fn slot_matches(&self, name: &str, id: uuid::Uuid) -> bool {
        self.paths
            .get(name)
            .is_some_and(|slot| slot.path.id() == id)
    }

    /// Resolution order: literal names first, then templates in declaration
    /// order; first match wins.
    fn find_conf(&self, name: &str) -> Result<(Arc<PathConf>, Vec<String>)> {
        validate_path_name(name)?;
        for entry in &self.confs {
            if entry.regex.is_none() && entry.conf.name == name {
                return Ok((entry.conf.clone(), vec![]));
            }
        }
        for entry in &self.confs {
            if let Some(regex) = &entry.regex {
                if let Some(caps) = regex.captures(name) {
                    let matches = caps
                        .iter()
                        .skip(1)
                        .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                        .collect();
                    return Ok((entry.conf.clone(), matches));
                }
            }
        }
        Err(PathError::PathNotFound)
    }

    async fn get_or_create(&mut self, access: &AccessRequest) -> Result<Path> {
        let (conf, matches) = self.find_conf(&access.name)?;
        self.checker.authenticate(&conf, access).await?;

        if let Some(slot) = self.paths.get(&access.name) {
            return Ok(slot.path.clone());
        }
        Ok(self.create_path(access.name.clone(), conf, matches))
    }

    fn create_path(&mut self, name: String, conf: Arc<PathConf>, matches: Vec<String>) -> Path {
        let dynamic = conf.is_regexp();
        let conf_name = conf.name.clone();
        let token = self.token.child_token();
        let path = spawn(PathParams {
            name: name.clone(),
            conf,
            matches,
            dynamic,
            manager_tx: self.notify_tx.clone(),
            factory: self.factory.clone(),
            token: token.clone(),
        });
        self.paths.insert(
            name,
            PathSlot {
                path: path.clone(),
                token,
                conf_name,
            },
        );
        path
    }

    fn create_static_paths(&mut self) {
        let static_confs: Vec<Arc<PathConf>> = self
            .confs
            .iter()
            .filter(|e| e.regex.is_none())
            .map(|e| e.conf.clone())
            .collect();
        for conf in static_confs {
            if !self.paths.contains_key(&conf.name) {
                self.create_path(conf.name.clone(), conf, vec![]);
            }
        }
    }

    fn close_path(&mut self, name: &str) {
        if let Some(slot) = self.paths.remove(name) {
            slot.token.cancel();
            let _ = self.events.send(Event::PathClosed {
                name: name.to_string(),
            });
            debug!("[manager] path {} closed", name);
        }
    }

    /// Diff old against new by configuration name: close what disappeared or
    /// changed cold, forward hot changes, create what is new.
    async fn reload(&mut self, conf: Conf) -> Result<()> {
        conf.validate()?;
        let new_confs = compile_confs(&conf)?;
        self.checker = AccessChecker::new(conf.external_authentication_url.clone());

        let names: Vec<String> = self.paths.keys().cloned().collect();
        for name in names {
            let slot = &self.paths[&name];
            let old_conf = self
                .confs
                .iter()
                .find(|e| e.conf.name == slot.conf_name)
                .map(|e| e.conf.clone());
            let new_entry = new_confs.iter().find(|e| e.conf.name == slot.conf_name);

            let action = match (old_conf, new_entry) {
                (Some(old), Some(new)) => {
                    // A template must also still match the name it spawned.
                    let still_matches = match &new.regex {
                        Some(regex) => regex.is_match(&name),
                        None => true,
                    };
                    if still_matches {
                        old.diff(&new.conf)
                    } else {
                        ConfDiff::Recreate
                    }
                }
                _ => ConfDiff::Recreate,
            };

            match action {
                ConfDiff::Unchanged => {}
                ConfDiff::HotReload => {
                    info!("[manager] path {} reloaded in place", name);
                    let new_conf = new_entry.unwrap().conf.clone();
                    let path = self.paths[&name].path.clone();
                    path.reload_conf(new_conf).await;
                }
                ConfDiff::Recreate => {
                    info!("[manager] path {} removed by reload", name);
                    self.close_path(&name);
                }
            }
        }

        self.confs = new_confs;
        self.create_static_paths();
        Ok(())
    }

    fn shutdown(&mut self) {
        for (name, slot) in self.paths.drain() {
            slot.token.cancel();
            let _ = self.events.send(Event::PathClosed { name });
        }
        info!("[manager] closed");
    }
}
