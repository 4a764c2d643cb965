use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{de::DeserializeOwned, Deserialize};
use serde_aux::prelude::*;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    HttpErr(#[from] reqwest::Error),

    #[error("{status}{}", match .message {
        Some(msg) => format!(" - {}", &msg),
        None => "".to_owned(),
    })]
    DcsError { status: u16, message: Option<String> },

    #[error(transparent)]
    JSONError(#[from] serde_json::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// A logged-in session against the DCS REST API.
///
/// The DCS authenticates with a session cookie, so the underlying HTTP client keeps a cookie store for the lifetime
/// of the session. Call [`Client::logout`] when done to release the server-side session.
#[derive(Debug)]
pub struct Client {
    http: reqwest::Client,
    base: String,
}

impl Client {
    /// Log in to the DCS at `base`, e.g. `https://dcs.example.com/DCS`. The `/api/...` paths are appended to it.
    #[tracing::instrument(level = "debug", skip(password))]
    pub async fn login<B>(base: B, username: &str, password: &str) -> Result<Self>
    where
        B: Into<String> + std::fmt::Debug,
    {
        let base = base.into().trim_end_matches('/').to_owned();
        let http = reqwest::Client::builder().cookie_store(true).build()?;

        #[derive(serde::Serialize)]
        struct Credentials<'a> {
            username: &'a str,
            password: &'a str,
        }

        let response = http
            .post(format!("{}/api/authentication/login", &base))
            .json(&Credentials { username, password })
            .send()
            .await?;
        check_status(response).await?;

        debug!(%base, "Logged in to DCS");
        Ok(Client { http, base })
    }

    /// All IDCs known to the DCS, including disabled ones.
    #[tracing::instrument(level = "debug")]
    pub async fn idcs(&self) -> Result<Vec<Idc>> {
        let response = self.get("/idcs").send().await?;
        parse_response(response).await
    }

    /// The Modbus devices attached to the IDC with the given MAC address.
    #[tracing::instrument(level = "debug")]
    pub async fn modbus_devices_by_idc(&self, mac: u64) -> Result<Vec<ModbusDevice>> {
        let response = self
            .get("/modbusDevices")
            .query(&[("idcMac", mac)])
            .send()
            .await?;
        parse_response(response).await
    }

    pub async fn logout(self) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/api/authentication/logout", &self.base))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.http.get(format!("{}/api{}", &self.base, path))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(Error::DcsError {
        status: status.as_u16(),
        message: Some(body).filter(|b| !b.trim().is_empty()),
    })
}

#[tracing::instrument(level = "debug", skip(response))]
async fn parse_response<T>(response: reqwest::Response) -> Result<T>
where
    T: DeserializeOwned,
{
    let body = check_status(response).await?.text().await?;
    debug!(%body, "parsing");
    Ok(serde_json::from_str(&body)?)
}

// {
//     "macAddress": 1250999896491,
//     "name": "Plant Room 2",
//     "ipAddress": "10.0.4.17",
//     "swVersion": "4.1.7",
//     "lastConnectedTime": "2024-05-01T09:12:44Z",
//     "modbusDeviceCount": 6,
//     "deviceStatusSummary": "partial",
//     "disabled": false
// }
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Idc {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub mac_address: u64,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub ip_address: Option<String>,

    #[serde(default)]
    pub sw_version: String,

    // null when the IDC has never connected
    #[serde(default, deserialize_with = "timestamp_or_null")]
    pub last_connected_time: Option<DateTime<Utc>>,

    #[serde(default, deserialize_with = "deserialize_number_from_string")]
    pub modbus_device_count: u32,

    // "online", "offline", "partial", ... only "online" means every device is fine
    #[serde(default)]
    pub device_status_summary: Option<String>,

    #[serde(default, deserialize_with = "deserialize_bool_from_anything")]
    pub disabled: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub enum DeviceType {
    #[serde(rename = "modbusMeter")]
    Meter,
    #[serde(rename = "pulseCounter", alias = "modbusPulseCounter")]
    PulseCounter,
    #[serde(rename = "radioReceiver", alias = "modbusRadioReceiver")]
    RadioReceiver,
    #[serde(other)]
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceStatus {
    Online,
    Offline,
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModbusDevice {
    // DCS database id, only useful for display
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub id: u64,

    // MAC of the owning IDC
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub mac_address: u64,

    // unit/slave ID, unique only within the owning IDC
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub address: u8,

    pub device_type: DeviceType,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub serial_number: Option<String>,

    pub status: DeviceStatus,

    #[serde(default, deserialize_with = "timestamp_or_null")]
    pub status_changed_time: Option<DateTime<Utc>>,
}

/// Parse a DCS timestamp. Most are RFC 3339, but some firmware reports `+0000` style offsets or none at all, in which
/// case the time is UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(ts.with_timezone(&Utc));
    }
    match NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        Ok(naive) => Some(Utc.from_utc_datetime(&naive)),
        Err(error) => {
            warn!(raw, %error, "Unreadable timestamp, treating as missing");
            None
        }
    }
}

fn timestamp_or_null<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw
        .filter(|raw| !raw.trim().is_empty())
        .and_then(|raw| parse_timestamp(raw.trim())))
}

#[test]
fn test_deserialize_idc() {
    let json = r#"{
        "macAddress": 1250999896491,
        "name": "Plant Room 2",
        "ipAddress": "10.0.4.17",
        "swVersion": "4.1.7",
        "lastConnectedTime": "2024-05-01T09:12:44Z",
        "modbusDeviceCount": 6,
        "deviceStatusSummary": "partial",
        "disabled": false
    }"#;

    let idc: Idc = serde_json::from_str(json).unwrap();

    assert_eq!(idc.mac_address, 0x0123_4567_89AB);
    assert_eq!(idc.name, "Plant Room 2");
    assert_eq!(idc.sw_version, "4.1.7");
    assert_eq!(idc.modbus_device_count, 6);
    assert_eq!(
        idc.last_connected_time,
        Some(Utc.with_ymd_and_hms(2024, 5, 1, 9, 12, 44).unwrap())
    );
    assert!(!idc.disabled);
}

#[test]
fn test_deserialize_idc_never_connected() {
    let json = r#"{
        "macAddress": "1250999896491",
        "name": "Spare",
        "swVersion": "3.9.0",
        "lastConnectedTime": null,
        "modbusDeviceCount": "0"
    }"#;

    let idc: Idc = serde_json::from_str(json).unwrap();

    assert_eq!(idc.mac_address, 0x0123_4567_89AB);
    assert_eq!(idc.last_connected_time, None);
    assert_eq!(idc.ip_address, None);
    assert_eq!(idc.device_status_summary, None);
}

#[test]
fn test_deserialize_modbus_device() {
    let json = r#"{
        "id": 8812,
        "macAddress": "1250999896491",
        "address": "100",
        "deviceType": "pulseCounter",
        "description": "Boiler house gas",
        "serialNumber": "PC-00917",
        "status": "offline",
        "statusChangedTime": "2024-05-01T08:00:00+0000"
    }"#;

    let dev: ModbusDevice = serde_json::from_str(json).unwrap();

    assert!(matches!(
        dev,
        ModbusDevice {
            id: 8812,
            mac_address: 0x0123_4567_89AB,
            address: 100,
            device_type: DeviceType::PulseCounter,
            status: DeviceStatus::Offline,
            status_changed_time: Some(_),
            ..
        }
    ));
}

#[test]
fn test_deserialize_unrecognised_enums() {
    let json = r#"{
        "id": 1,
        "macAddress": 1,
        "address": 2,
        "deviceType": "thermostat",
        "status": "commsError",
        "statusChangedTime": ""
    }"#;

    let dev: ModbusDevice = serde_json::from_str(json).unwrap();

    assert_eq!(dev.device_type, DeviceType::Other);
    assert_eq!(dev.status, DeviceStatus::Unknown);
    assert_eq!(dev.status_changed_time, None);
}

#[test]
fn test_parse_timestamp() {
    let expected = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
    assert_eq!(parse_timestamp("2024-05-01T09:00:00Z"), Some(expected));
    assert_eq!(parse_timestamp("2024-05-01T10:00:00+01:00"), Some(expected));
    assert_eq!(parse_timestamp("2024-05-01T10:00:00+0100"), Some(expected));
    assert_eq!(parse_timestamp("2024-05-01T09:00:00"), Some(expected));
    assert_eq!(parse_timestamp("yesterday"), None);
}
