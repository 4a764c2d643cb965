//! What is remembered between checks.
//!
//! The state file is a small TOML document of plain strings so that people can edit it by hand, in particular to
//! add entries to the ignore lists:
//!
//! ```toml
//! run = "2024-05-01 12:00:00.000000+0000"
//! offline_idcs = "01:23:45:67:89:AB"
//! ignored_idcs = ""
//! offline_devices = "01:23:45:67:89:AB-P100,01:23:45:67:89:AB-R7"
//! ignored_devices = "0A:0B:0C:0D:0E:0F-3"
//! ```

use std::{collections::BTreeSet, io::ErrorKind, path::Path, str::FromStr};

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::ident::{decode_set, encode_set, DeviceKey, MacAddress};
use crate::snapshot::Snapshot;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f%z";

const HEADER: &str = "\
# Written by offline-checker after every run.
# Add comma-separated IDC MACs or device identifiers to the ignored_* lists to stop reporting them.
";

#[derive(Debug, Default, Serialize)]
struct Stored {
    run: String,
    offline_idcs: String,
    ignored_idcs: String,
    offline_devices: String,
    ignored_devices: String,
}

// Hand edits may use any TOML type, e.g. a bare datetime for `run` or an array of identifiers.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Edited {
    run: Option<toml::Value>,
    offline_idcs: Option<toml::Value>,
    ignored_idcs: Option<toml::Value>,
    offline_devices: Option<toml::Value>,
    ignored_devices: Option<toml::Value>,
}

fn field_text(value: Option<toml::Value>) -> String {
    match value {
        None => String::new(),
        Some(toml::Value::String(s)) => s,
        Some(toml::Value::Array(items)) => items
            .into_iter()
            .map(|item| field_text(Some(item)))
            .join(","),
        Some(other) => other.to_string(),
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct State {
    /// `None` on the first run, or if the stored timestamp could not be read.
    pub last_run: Option<DateTime<Utc>>,
    pub offline_idcs: BTreeSet<MacAddress>,
    pub ignored_idcs: BTreeSet<MacAddress>,
    pub offline_devices: BTreeSet<DeviceKey>,
    pub ignored_devices: BTreeSet<DeviceKey>,
}

impl State {
    /// Read the state file. A missing file is a first run, not an error.
    pub fn load(path: &Path) -> crate::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => text.parse(),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(path = %path.display(), "No state file, treating this as the first run");
                Ok(Self::default())
            }
            Err(e) => Err(format!("Cannot read state {}: {}", path.display(), e).into()),
        }
    }

    /// When the previous check ran, or `now` if that is unknown.
    pub fn last_run_or(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.last_run.unwrap_or(now)
    }

    /// Render the state file. Device identifiers include their kind letter when `snapshot` knows the device.
    pub fn encode(&self, snapshot: &Snapshot) -> crate::Result<String> {
        let stored = Stored {
            run: self
                .last_run
                .map(|t| t.format(TIMESTAMP_FORMAT).to_string())
                .unwrap_or_default(),
            offline_idcs: encode_set(&self.offline_idcs, MacAddress::to_string),
            ignored_idcs: encode_set(&self.ignored_idcs, MacAddress::to_string),
            offline_devices: encode_set(&self.offline_devices, |k| snapshot.device_label(k)),
            ignored_devices: encode_set(&self.ignored_devices, |k| snapshot.device_label(k)),
        };
        Ok(format!("{}{}", HEADER, toml::to_string(&stored)?))
    }

    pub fn save(&self, path: &Path, snapshot: &Snapshot) -> crate::Result<()> {
        let text = self.encode(snapshot)?;
        std::fs::write(path, text)
            .map_err(|e| format!("Cannot write state {}: {}", path.display(), e))?;
        debug!(path = %path.display(), "Saved state");
        Ok(())
    }
}

impl FromStr for State {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let edited: Edited = toml::from_str(s)?;

        Ok(State {
            last_run: parse_run(&field_text(edited.run)),
            offline_idcs: decode_set(&field_text(edited.offline_idcs)),
            ignored_idcs: decode_set(&field_text(edited.ignored_idcs)),
            offline_devices: decode_set(&field_text(edited.offline_devices)),
            ignored_devices: decode_set(&field_text(edited.ignored_devices)),
        })
    }
}

fn parse_run(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|t| t.with_timezone(&Utc))
        .map_err(|error| warn!(raw, %error, "Unreadable last run time, ignoring it"))
        .ok()
}
