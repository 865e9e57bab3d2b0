//! [ICE] servers settings.
//!
//! [ICE]: https://webrtcglossary.com/ice

use std::{borrow::Cow, collections::HashMap};

use serde::{de::Error as _, Deserialize, Deserializer, Serialize};
use smart_default::SmartDefault;

use crate::platform::IceServer;

/// [ICE] servers settings.
///
/// [ICE]: https://webrtcglossary.com/ice
#[derive(Clone, Debug, Deserialize, Serialize, SmartDefault)]
#[serde(default)]
pub struct Ice {
    /// List of [STUN]/[TURN] servers keyed by an arbitrary name.
    ///
    /// Defaults to public Google [STUN] servers and the Open Relay [TURN]
    /// server.
    ///
    /// [STUN]: https://webrtcglossary.com/stun
    /// [TURN]: https://webrtcglossary.com/turn
    #[default(Ice::default_servers())]
    pub servers: HashMap<String, Server>,

    /// Indicator whether [ICE] candidates should be gathered continually,
    /// rather than once.
    ///
    /// Defaults to `true`.
    ///
    /// [ICE]: https://webrtcglossary.com/ice
    #[default = true]
    pub continual_gathering: bool,

    /// Indicator whether TCP candidates should be gathered along with UDP
    /// ones.
    ///
    /// Defaults to `true`.
    #[default = true]
    pub tcp_candidates: bool,
}

impl Ice {
    /// Returns configured [`Server`]s as [`IceServer`]s ready to be passed to
    /// a media engine.
    pub fn ice_servers(&self) -> Vec<IceServer> {
        let mut names: Vec<_> = self.servers.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| IceServer::from(&self.servers[name]))
            .collect()
    }

    fn default_servers() -> HashMap<String, Server> {
        let mut servers = HashMap::new();
        servers.insert(
            "google".to_owned(),
            Server {
                urls: vec![
                    "stun:stun.l.google.com:19302".into(),
                    "stun:stun1.l.google.com:19302".into(),
                    "stun:stun2.l.google.com:19302".into(),
                ],
                user: None,
                pass: None,
            },
        );
        servers.insert(
            "openrelay".to_owned(),
            Server {
                urls: vec![
                    "turn:openrelay.metered.ca:80".into(),
                    "turn:openrelay.metered.ca:443".into(),
                    "turn:openrelay.metered.ca:443?transport=tcp".into(),
                ],
                user: Some("openrelayproject".into()),
                pass: Some("openrelayproject".into()),
            },
        );
        servers
    }
}

/// [STUN]/[TURN] server settings.
///
/// [STUN]: https://webrtcglossary.com/stun
/// [TURN]: https://webrtcglossary.com/turn
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Server {
    /// URLs of this [TURN]/[STUN] server.
    ///
    /// [STUN]: https://webrtcglossary.com/stun
    /// [TURN]: https://webrtcglossary.com/turn
    #[serde(deserialize_with = "Server::parse_urls")]
    pub urls: Vec<Cow<'static, str>>,

    /// Username to use during the authentication process.
    #[serde(default)]
    pub user: Option<Cow<'static, str>>,

    /// The credential to use when logging into the server.
    #[serde(default)]
    pub pass: Option<Cow<'static, str>>,
}

impl Server {
    /// Parses [`Server::urls`] from the provided [`Deserializer`] as CSV
    /// (comma-separated values) string.
    ///
    /// # Errors
    ///
    /// - If cannot parse CSV strings.
    /// - If parsed [`Server::urls`] is empty or contains empty values.
    fn parse_urls<'de, D>(d: D) -> Result<Vec<Cow<'static, str>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde_json as json;

        let split = |urls: String| -> Vec<Cow<'static, str>> {
            urls.split(',').map(|u| u.trim().to_owned().into()).collect()
        };

        let out = match json::Value::deserialize(d)? {
            json::Value::String(urls) => split(urls),
            json::Value::Array(list) => {
                let mut out = Vec::new();
                for val in list {
                    match val {
                        json::Value::String(urls) => out.extend(split(urls)),
                        _ => return Err(D::Error::custom("Unexpected value")),
                    }
                }
                out
            }
            _ => return Err(D::Error::custom("Unexpected value")),
        };

        if out.is_empty() || out.iter().any(|url| url.is_empty()) {
            return Err(D::Error::custom("Empty values are not allowed"));
        }

        Ok(out)
    }
}

impl From<&Server> for IceServer {
    fn from(server: &Server) -> Self {
        Self {
            urls: server.urls.iter().map(ToString::to_string).collect(),
            username: server.user.as_deref().map(ToOwned::to_owned),
            credential: server.pass.as_deref().map(ToOwned::to_owned),
        }
    }
}
