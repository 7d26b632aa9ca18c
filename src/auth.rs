use std::net::IpAddr;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::conf::PathConf;
use crate::error::PathError;
use crate::result::Result;

/// Pause applied before a hard authentication failure is returned, to resist
/// credential brute-force. The pause happens in the caller's task, never
/// inside an actor loop.
pub const FAILURE_PAUSE: Duration = Duration::from_secs(2);

/// Everything needed to decide whether a client may describe, read or
/// publish a path.
#[derive(Debug, Clone)]
pub struct AccessRequest {
    pub name: String,
    pub ip: IpAddr,
    pub user: String,
    pub pass: String,
    pub publish: bool,
    /// Protocol tag of the requesting server ("rtsp", "rtmp", "hls",
    /// "webrtc", "srt").
    pub proto: String,
}

impl AccessRequest {
    pub fn read(name: impl ToString, ip: IpAddr, proto: impl ToString) -> Self {
        AccessRequest {
            name: name.to_string(),
            ip,
            user: String::new(),
            pass: String::new(),
            publish: false,
            proto: proto.to_string(),
        }
    }

    pub fn publish(name: impl ToString, ip: IpAddr, proto: impl ToString) -> Self {
        AccessRequest {
            publish: true,
            ..AccessRequest::read(name, ip, proto)
        }
    }

    pub fn with_credentials(mut self, user: impl ToString, pass: impl ToString) -> Self {
        self.user = user.to_string();
        self.pass = pass.to_string();
        self
    }
}

pub(crate) struct AccessChecker {
    external_url: Option<String>,
    client: reqwest::Client,
}

impl AccessChecker {
    pub fn new(external_url: Option<String>) -> Self {
        AccessChecker {
            external_url,
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(1))
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap(),
        }
    }

    /// Runs the internal check (IP allow-list, credentials) then the external
    /// endpoint, if configured. Both must pass.
    pub async fn authenticate(&self, conf: &PathConf, req: &AccessRequest) -> Result<()> {
        let (user, pass, ips) = if req.publish {
            (&conf.publish_user, &conf.publish_pass, &conf.publish_ips)
        } else {
            (&conf.read_user, &conf.read_pass, &conf.read_ips)
        };

        if !ips.is_empty() && !ips.iter().any(|net| net.contains(&req.ip)) {
            return Err(PathError::AuthFailureHard);
        }

        if !user.is_empty() || !pass.is_empty() {
            if req.user.is_empty() && req.pass.is_empty() {
                // Missing rather than wrong: let the client retry with a
                // credential challenge.
                return Err(PathError::AuthFailureSoft);
            }
            if !credentials_match(user, &req.user) || !credentials_match(pass, &req.pass) {
                return Err(PathError::AuthFailureHard);
            }
        }

        if let Some(url) = &self.external_url {
            self.authenticate_external(url, req).await?;
        }

        Ok(())
    }

    async fn authenticate_external(&self, url: &str, req: &AccessRequest) -> Result<()> {
        let body = json!({
            "ip": req.ip,
            "user": req.user,
            "password": req.pass,
            "path": req.name,
            "protocol": req.proto,
            "action": if req.publish { "publish" } else { "read" },
        });
        match self.client.post(url).json(&body).send().await {
            Ok(res) if res.status().is_success() => Ok(()),
            Ok(res) => {
                warn!(url, status = ?res.status(), "external authentication rejected request");
                Err(PathError::AuthFailureHard)
            }
            Err(err) => {
                warn!(url, ?err, "external authentication request failed");
                Err(PathError::AuthFailureHard)
            }
        }
    }
}

/// Stored secrets are either plaintext or `sha256:` followed by the base64
/// of the SHA-256 digest of the secret.
pub(crate) fn credentials_match(stored: &str, provided: &str) -> bool {
    if stored.is_empty() {
        return true;
    }
    match stored.strip_prefix("sha256:") {
        Some(hash) => STANDARD.encode(Sha256::digest(provided.as_bytes())) == hash,
        None => stored == provided,
    }
}

#[cfg(test)]
mod test {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::conf::PathConf;

    fn localhost() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    #[test]
    fn test_credentials_match() {
        assert!(credentials_match("", "anything"));
        assert!(credentials_match("secret", "secret"));
        assert!(!credentials_match("secret", "wrong"));

        // echo -n "testpass" | sha256sum | xxd -r -p | base64
        let hashed = format!(
            "sha256:{}",
            STANDARD.encode(Sha256::digest(b"testpass"))
        );
        assert!(credentials_match(&hashed, "testpass"));
        assert!(!credentials_match(&hashed, "testpasz"));
    }

    #[tokio::test]
    async fn test_missing_credentials_are_soft() {
        let conf = PathConf {
            name: "cam1".to_string(),
            read_user: "user".to_string(),
            read_pass: "pass".to_string(),
            ..Default::default()
        };
        let checker = AccessChecker::new(None);

        let req = AccessRequest::read("cam1", localhost(), "rtsp");
        assert!(matches!(
            checker.authenticate(&conf, &req).await,
            Err(PathError::AuthFailureSoft)
        ));

        let req = req.with_credentials("user", "wrong");
        assert!(matches!(
            checker.authenticate(&conf, &req).await,
            Err(PathError::AuthFailureHard)
        ));

        let req = AccessRequest::read("cam1", localhost(), "rtsp")
            .with_credentials("user", "pass");
        assert!(checker.authenticate(&conf, &req).await.is_ok());
    }

    #[tokio::test]
    async fn test_ip_allow_list() {
        let conf = PathConf {
            name: "cam1".to_string(),
            publish_ips: vec!["10.0.0.0/8".parse().unwrap()],
            ..Default::default()
        };
        let checker = AccessChecker::new(None);

        let denied = AccessRequest::publish("cam1", localhost(), "rtsp");
        assert!(matches!(
            checker.authenticate(&conf, &denied).await,
            Err(PathError::AuthFailureHard)
        ));

        let allowed =
            AccessRequest::publish("cam1", "10.1.2.3".parse::<IpAddr>().unwrap(), "rtsp");
        assert!(checker.authenticate(&conf, &allowed).await.is_ok());
    }
}
