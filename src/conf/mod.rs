//! Provides application configuration options.
//!
//! Configuration options can be parsed from config files in TOML format.

pub mod call;
pub mod ice;
pub mod log;
pub mod media;
pub mod signalling;

use std::env;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

#[doc(inline)]
pub use self::{
    call::Call,
    ice::Ice,
    log::Log,
    media::{AudioProcessing, Media, Video},
    signalling::Signalling,
};

/// CLI argument that is responsible for holding application configuration
/// file path.
static APP_CONF_PATH_CMD_ARG_NAME: &str = "--conf";

/// Environment variable that is responsible for holding application
/// configuration file path.
static APP_CONF_PATH_ENV_VAR_NAME: &str = "NURSE_CALL_CONF";

/// Holds application config.
#[derive(Clone, Debug, Deserialize, Serialize, SmartDefault)]
#[serde(default)]
pub struct Conf {
    /// Calls lifecycle settings.
    pub call: Call,

    /// [ICE] servers and gathering settings.
    ///
    /// [ICE]: https://webrtcglossary.com/ice
    pub ice: Ice,

    /// Logging settings.
    pub log: Log,

    /// Local media capture settings.
    pub media: Media,

    /// Document store layout used for signalling.
    pub signalling: Signalling,
}

impl Conf {
    /// Creates new [`Conf`] and applies values from such sources
    /// and in that order:
    /// - default values;
    /// - configuration file, the name of which is given as a command line
    ///   parameter or environment variable;
    /// - environment variables.
    ///
    /// # Errors
    ///
    /// Errors if parsing fails.
    pub fn parse() -> Result<Self, ConfigError> {
        let mut cfg = Config::new();

        if let Some(path) =
            get_conf_file_name(env::var(APP_CONF_PATH_ENV_VAR_NAME), env::args())
        {
            cfg.merge(File::with_name(&path))?;
        }

        cfg.merge(Environment::with_prefix("NURSE_CALL").separator("__"))?;

        cfg.try_into()
    }
}

/// Returns the path to a configuration file, if it's set via CLI `args`
/// or environment variable.
fn get_conf_file_name<T>(
    env_var: Result<String, env::VarError>,
    cmd_args: T,
) -> Option<String>
where
    T: Iterator<Item = String>,
{
    if let Ok(path) = env_var {
        return Some(path);
    }
    let mut args = cmd_args.skip_while(|x| x != APP_CONF_PATH_CMD_ARG_NAME);
    args.next().and_then(|_| args.next())
}
