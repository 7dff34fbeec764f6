use std::{net::SocketAddr, path::Path};

use clap::Parser;
use config::{builder::DefaultState, ConfigBuilder, ConfigError, File};
use serde::{Deserialize, Serialize};

/// Environment variable holding the upstream gateway's API key.
pub(crate) const API_KEY_ENV: &str = "CLASSIFIER_API_KEY";

const DEFAULT_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_ENDPOINT: &str = "https://ai.gateway.lovable.dev/v1";
const DEFAULT_MODEL: &str = "google/gemini-2.5-flash";
const DEFAULT_TEMPERATURE: f64 = 0.3;

#[derive(Parser, Debug)]
#[command(version)]
pub(crate) struct Args {
    /// Path to the local configuration TOML file.
    #[arg(short, value_name = "CONFIG_PATH")]
    pub(crate) config: Option<std::path::PathBuf>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Web {
    #[serde(deserialize_with = "deserialize_socket_addr")]
    pub(crate) address: SocketAddr,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ClassifierSettings {
    pub(crate) endpoint: String,
    pub(crate) model: String,
    pub(crate) temperature: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Settings {
    pub(crate) web: Web,
    pub(crate) classifier: ClassifierSettings,
}

impl Settings {
    /// Load settings from the given TOML file, with sane defaults.
    pub(crate) fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::<DefaultState>::default()
            .set_default("web.address", DEFAULT_ADDR)?
            .set_default("classifier.endpoint", DEFAULT_ENDPOINT)?
            .set_default("classifier.model", DEFAULT_MODEL)?
            .set_default("classifier.temperature", DEFAULT_TEMPERATURE)?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        builder.build()?.try_deserialize()
    }
}

fn deserialize_socket_addr<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}
