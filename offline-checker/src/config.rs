use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use serde_aux::prelude::*;
use url::Url;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// Where the previous run's results (and the ignore lists) are kept
    #[serde(default = "default_state_path")]
    pub state: PathBuf,

    pub dcs: DcsConfig,

    #[serde(default)]
    pub timeouts: Timeouts,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub email: EmailConfig,

    #[serde(default)]
    pub smtp: SmtpConfig,
}

impl Config {
    pub fn load(path: &Path) -> crate::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("Cannot read config {}: {}", path.display(), e))?;
        text.parse()
    }
}

impl std::str::FromStr for Config {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(toml::from_str(s)?)
    }
}

fn default_state_path() -> PathBuf {
    PathBuf::from(concat!(env!("CARGO_PKG_NAME"), ".state.toml"))
}

#[derive(Clone, Debug, Deserialize)]
pub struct DcsConfig {
    pub url: Url,

    /// Prefix for links to the network diagnostics page of an IDC. The dotted MAC address is appended.
    #[serde(default, alias = "netdiagurl")]
    pub netdiag_url: Option<String>,

    pub username: String,
    pub password: String,
}

impl DcsConfig {
    /// Link to the DCS page for an IDC.
    pub fn idc_url(&self, mac: crate::ident::MacAddress) -> String {
        format!("{}/idcs/{}", self.url.as_str().trim_end_matches('/'), mac.as_u64())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct Timeouts {
    /// How long an IDC may go without connecting before it counts as offline
    #[serde(with = "humantime_serde", default = "default_timeout", alias = "idc_timeout")]
    pub idc: Duration,

    /// How long a device may report offline before it counts as offline
    #[serde(with = "humantime_serde", default = "default_timeout", alias = "device_timeout")]
    pub device: Duration,
}

fn default_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            idc: default_timeout(),
            device: default_timeout(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_html_path")]
    pub html: PathBuf,

    /// Keep a copy of the last email sent
    #[serde(default)]
    pub email: Option<PathBuf>,
}

fn default_html_path() -> PathBuf {
    PathBuf::from(concat!(env!("CARGO_PKG_NAME"), ".html"))
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            html: default_html_path(),
            email: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub enabled: bool,

    /// Include the ignore lists in the report
    #[serde(alias = "showignored")]
    pub show_ignored: bool,

    /// Send even when nothing went offline or came back
    #[serde(alias = "alwayssend")]
    pub always_send: bool,

    pub from: Option<String>,

    #[serde(deserialize_with = "address_list")]
    pub to: Vec<String>,

    #[serde(deserialize_with = "address_list")]
    pub cc: Vec<String>,

    #[serde(deserialize_with = "address_list")]
    pub bcc: Vec<String>,

    pub subject: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            show_ignored: false,
            always_send: false,
            from: None,
            to: vec![],
            cc: vec![],
            bcc: vec![],
            subject: "Offline Devices".to_owned(),
        }
    }
}

// Accepts either a list or a single comma-separated string, e.g. `"ops@example.com, oncall@example.com"`
fn address_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    StringOrVecToVec::new(
        ',',
        |s| Ok::<_, std::convert::Infallible>(s.trim().to_owned()),
        true,
    )
    .into_deserializer()(deserializer)
    .map(|list| {
        list.into_iter()
            .map(|address| address.trim().to_owned())
            .filter(|address| !address.is_empty())
            .collect()
    })
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub server: String,

    /// Defaults to 465 with `ssl`, 25 without
    pub port: Option<u16>,

    /// Implicit TLS (SMTPS) rather than plain SMTP
    pub ssl: bool,

    /// Authenticate when set
    pub username: Option<String>,
    pub password: Option<String>,
}

impl SmtpConfig {
    pub fn port(&self) -> u16 {
        match (self.port, self.ssl) {
            (Some(port), _) => port,
            (None, true) => 465,
            (None, false) => 25,
        }
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            server: "localhost".to_owned(),
            port: None,
            ssl: false,
            username: None,
            password: None,
        }
    }
}
