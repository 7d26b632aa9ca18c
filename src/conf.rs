use std::time::Duration;

use ipnet::IpNet;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::PathError;
use crate::result::Result;

/// Durations on the wire are humantime strings ("2s", "500ms").
pub(crate) mod duration_string {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*d).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> std::result::Result<Duration, D::Error> {
        let s = String::deserialize(d)?;
        humantime::parse_duration(&s).map_err(de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Conf {
    /// When set, every access request is also POSTed to this endpoint as
    /// JSON; any non-2xx reply rejects the request.
    pub external_authentication_url: Option<String>,
    /// Capacity of each reader's write queue.
    pub write_queue_size: usize,
    pub paths: Vec<PathConf>,
}

impl Default for Conf {
    fn default() -> Self {
        Conf {
            external_authentication_url: None,
            write_queue_size: 512,
            paths: vec![],
        }
    }
}

impl Conf {
    pub fn from_toml(s: &str) -> Result<Self> {
        let conf: Conf =
            toml::from_str(s).map_err(|e| PathError::Internal(anyhow::anyhow!(e)))?;
        conf.validate()?;
        Ok(conf)
    }

    pub fn validate(&self) -> Result<()> {
        if self.write_queue_size == 0 || !self.write_queue_size.is_power_of_two() {
            return Err(PathError::invalid_operation(
                "writeQueueSize must be a power of two",
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for path in &self.paths {
            path.validate()?;
            // Two entries claiming the same name would race over one slot
            // in the manager's table.
            if !seen.insert(path.name.clone()) {
                return Err(PathError::PathAlreadyExists);
            }
        }
        Ok(())
    }
}

/// How one named path behaves. A subset of fields is hot-reloadable (see
/// [`PathConf::diff`]); changing anything else recreates the path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PathConf {
    pub name: String,
    /// When set, the path is a template: it is never created statically and
    /// matches request names lazily, in declaration order.
    pub regexp: Option<String>,

    /// `publisher`, a pull URL (rtsp/rtsps/rtmp/rtmps/http/https/srt/whep),
    /// `rpiCamera`, or `redirect`.
    pub source: String,
    pub source_on_demand: bool,
    #[serde(with = "duration_string")]
    pub source_on_demand_start_timeout: Duration,
    #[serde(with = "duration_string")]
    pub source_on_demand_close_after: Duration,
    pub source_redirect: Option<String>,

    pub disable_publisher_override: bool,
    pub fallback: Option<String>,
    /// 0 means unlimited.
    pub max_readers: usize,

    pub publish_user: String,
    pub publish_pass: String,
    pub publish_ips: Vec<IpNet>,
    pub read_user: String,
    pub read_pass: String,
    pub read_ips: Vec<IpNet>,

    pub run_on_init: String,
    pub run_on_init_restart: bool,
    pub run_on_demand: String,
    pub run_on_demand_restart: bool,
    #[serde(with = "duration_string")]
    pub run_on_demand_start_timeout: Duration,
    #[serde(with = "duration_string")]
    pub run_on_demand_close_after: Duration,
    pub run_on_ready: String,
    pub run_on_ready_restart: bool,
    pub run_on_read: String,
    pub run_on_read_restart: bool,

    pub record: bool,
    pub record_path: String,
    pub rpi_camera: RpiCameraConf,
}

impl Default for PathConf {
    fn default() -> Self {
        PathConf {
            name: String::new(),
            regexp: None,
            source: "publisher".to_string(),
            source_on_demand: false,
            source_on_demand_start_timeout: Duration::from_secs(10),
            source_on_demand_close_after: Duration::from_secs(10),
            source_redirect: None,
            disable_publisher_override: false,
            fallback: None,
            max_readers: 0,
            publish_user: String::new(),
            publish_pass: String::new(),
            publish_ips: vec![],
            read_user: String::new(),
            read_pass: String::new(),
            read_ips: vec![],
            run_on_init: String::new(),
            run_on_init_restart: false,
            run_on_demand: String::new(),
            run_on_demand_restart: false,
            run_on_demand_start_timeout: Duration::from_secs(10),
            run_on_demand_close_after: Duration::from_secs(10),
            run_on_ready: String::new(),
            run_on_ready_restart: false,
            run_on_read: String::new(),
            run_on_read_restart: false,
            record: false,
            record_path: String::new(),
            rpi_camera: RpiCameraConf::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RpiCameraConf {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub brightness: f64,
    pub contrast: f64,
}

impl Default for RpiCameraConf {
    fn default() -> Self {
        RpiCameraConf {
            width: 1920,
            height: 1080,
            fps: 30,
            brightness: 0.0,
            contrast: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    Publisher,
    Url(String),
    RpiCamera,
    Redirect,
}

/// Outcome of comparing a surviving path's old and new configuration during
/// a reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfDiff {
    Unchanged,
    HotReload,
    Recreate,
}

const URL_SCHEMES: [&str; 8] = [
    "rtsp", "rtsps", "rtmp", "rtmps", "http", "https", "srt", "whep",
];

impl PathConf {
    pub fn is_regexp(&self) -> bool {
        self.regexp.is_some()
    }

    pub fn source_kind(&self) -> SourceKind {
        match self.source.as_str() {
            "publisher" => SourceKind::Publisher,
            "rpiCamera" => SourceKind::RpiCamera,
            "redirect" => SourceKind::Redirect,
            other => SourceKind::Url(other.to_string()),
        }
    }

    pub fn compile_regexp(&self) -> Result<Option<Regex>> {
        match &self.regexp {
            None => Ok(None),
            Some(pattern) => Regex::new(pattern)
                .map(Some)
                .map_err(|e| PathError::invalid_operation(format!("invalid regexp: {e}"))),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.regexp.is_some() {
            self.compile_regexp()?;
            if self.name.is_empty() {
                return Err(PathError::invalid_operation(
                    "a template path needs a name",
                ));
            }
        } else {
            validate_path_name(&self.name)?;
        }

        match self.source_kind() {
            SourceKind::Publisher | SourceKind::RpiCamera => {}
            SourceKind::Redirect => {
                if self.source_redirect.is_none() {
                    return Err(PathError::invalid_operation(
                        "source 'redirect' requires sourceRedirect",
                    ));
                }
            }
            SourceKind::Url(url) => {
                let scheme = url.split("://").next().unwrap_or("");
                if !URL_SCHEMES.contains(&scheme) {
                    return Err(PathError::invalid_operation(format!(
                        "unsupported source '{url}'"
                    )));
                }
                if self.is_regexp() {
                    return Err(PathError::invalid_operation(
                        "a template path cannot have a static source",
                    ));
                }
            }
        }

        if let Some(fallback) = &self.fallback {
            let plain_path = fallback.starts_with('/');
            let url = fallback.contains("://");
            if !plain_path && !url {
                return Err(PathError::invalid_operation(
                    "fallback must be an URL or an absolute path",
                ));
            }
        }

        Ok(())
    }

    /// Decides what a reload does with a path whose configuration entry
    /// survived: nothing, forward the new value, or recreate the path.
    /// Recording and camera tunables apply in place; everything else changes
    /// behavior that was fixed at creation time.
    pub fn diff(&self, new: &PathConf) -> ConfDiff {
        if self == new {
            return ConfDiff::Unchanged;
        }
        let mut normalized = self.clone();
        normalized.record = new.record;
        normalized.record_path = new.record_path.clone();
        normalized.rpi_camera = new.rpi_camera.clone();
        if normalized == *new {
            ConfDiff::HotReload
        } else {
            ConfDiff::Recreate
        }
    }
}

const MAX_PATH_NAME_LEN: usize = 255;

/// A request name is a sequence of non-empty `/`-separated segments built
/// from a restricted character set, without a leading slash.
pub fn validate_path_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(PathError::InvalidPathName("empty name".to_string()));
    }
    if name.len() > MAX_PATH_NAME_LEN {
        return Err(PathError::InvalidPathName("name too long".to_string()));
    }
    if name.starts_with('/') {
        return Err(PathError::InvalidPathName(format!(
            "'{name}' must not start with a slash"
        )));
    }
    if name.ends_with('/') || name.contains("//") {
        return Err(PathError::InvalidPathName(format!(
            "'{name}' contains an empty segment"
        )));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && !matches!(c, '_' | '-' | '.' | '~' | '/'))
    {
        return Err(PathError::InvalidPathName(format!(
            "'{name}' contains forbidden character '{c}'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_path_name_grammar() {
        assert!(validate_path_name("cam1").is_ok());
        assert!(validate_path_name("building-a/floor_2/cam.main").is_ok());
        assert!(validate_path_name("").is_err());
        assert!(validate_path_name("/cam1").is_err());
        assert!(validate_path_name("cam1/").is_err());
        assert!(validate_path_name("a//b").is_err());
        assert!(validate_path_name("cam 1").is_err());
        assert!(validate_path_name(&"x".repeat(300)).is_err());
    }

    #[test]
    fn test_conf_parse_durations() {
        let conf = Conf::from_toml(
            r#"
            [[paths]]
            name = "cam1"
            source = "rtsp://origin/feed"
            sourceOnDemand = true
            sourceOnDemandStartTimeout = "1s"
            sourceOnDemandCloseAfter = "500ms"
            "#,
        )
        .unwrap();
        let path = &conf.paths[0];
        assert!(path.source_on_demand);
        assert_eq!(path.source_on_demand_start_timeout, Duration::from_secs(1));
        assert_eq!(
            path.source_on_demand_close_after,
            Duration::from_millis(500)
        );
    }

    #[test]
    fn test_source_validation() {
        let mut path = PathConf {
            name: "cam1".to_string(),
            ..Default::default()
        };
        assert!(path.validate().is_ok());

        path.source = "rtsp://origin/feed".to_string();
        assert!(path.validate().is_ok());

        path.source = "ftp://origin/feed".to_string();
        assert!(path.validate().is_err());

        path.source = "redirect".to_string();
        assert!(path.validate().is_err());
        path.source_redirect = Some("rtsp://other/feed".to_string());
        assert!(path.validate().is_ok());
    }

    #[test]
    fn test_diff_predicate() {
        let old = PathConf {
            name: "cam1".to_string(),
            ..Default::default()
        };

        assert_eq!(old.diff(&old.clone()), ConfDiff::Unchanged);

        let mut hot = old.clone();
        hot.record = true;
        hot.rpi_camera.fps = 60;
        assert_eq!(old.diff(&hot), ConfDiff::HotReload);

        let mut cold = old.clone();
        cold.disable_publisher_override = true;
        assert_eq!(old.diff(&cold), ConfDiff::Recreate);

        let mut mixed = hot.clone();
        mixed.max_readers = 5;
        assert_eq!(old.diff(&mixed), ConfDiff::Recreate);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let conf = Conf {
            paths: vec![
                PathConf {
                    name: "cam1".to_string(),
                    ..Default::default()
                },
                PathConf {
                    name: "cam1".to_string(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        assert!(matches!(
            conf.validate(),
            Err(PathError::PathAlreadyExists)
        ));
    }
}
