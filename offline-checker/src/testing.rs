//! An in-memory DCS and record builders for tests.

use std::{collections::BTreeSet, sync::Mutex};

use async_trait::async_trait;
use chrono::Utc;

use crate::ident::{DeviceKey, MacAddress};
use crate::model::{Controller, Device, DeviceKind, DeviceStatus};
use crate::snapshot::Source;

pub(crate) fn mac(raw: u64) -> MacAddress {
    MacAddress::new(raw).unwrap()
}

/// A connected controller with one device and a "partial" status summary.
pub(crate) fn controller(raw: u64, sw_version: &str) -> Controller {
    Controller {
        mac: mac(raw),
        name: format!("IDC {raw:X}"),
        ip_address: Some("10.0.0.1".to_owned()),
        sw_version: sw_version.to_owned(),
        last_connected: Some(Utc::now()),
        modbus_device_count: 1,
        status_summary: Some("partial".to_owned()),
        disabled: false,
    }
}

pub(crate) fn device(idc: u64, slave: u8, kind: DeviceKind, status: DeviceStatus) -> Device {
    Device {
        key: DeviceKey::new(mac(idc), slave),
        id: idc * 1000 + u64::from(slave),
        kind,
        description: Some(format!("Device {slave}")),
        serial_number: Some(format!("SN{slave:04}")),
        status,
        status_changed: None,
    }
}

pub(crate) struct FakeSource {
    // `None` when listing controllers should fail
    controllers: Option<Vec<Controller>>,
    devices: Vec<Device>,
    failing_devices: BTreeSet<MacAddress>,
    fetched: Mutex<Vec<MacAddress>>,
}

impl FakeSource {
    pub(crate) fn new(controllers: Vec<Controller>) -> Self {
        Self {
            controllers: Some(controllers),
            devices: vec![],
            failing_devices: BTreeSet::new(),
            fetched: Mutex::new(vec![]),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            controllers: None,
            ..Self::new(vec![])
        }
    }

    pub(crate) fn with_devices(mut self, devices: Vec<Device>) -> Self {
        self.devices = devices;
        self
    }

    pub(crate) fn failing_devices_for(mut self, idc: MacAddress) -> Self {
        self.failing_devices.insert(idc);
        self
    }

    /// Controllers whose devices were requested, in order.
    pub(crate) fn fetched(&self) -> Vec<MacAddress> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl Source for FakeSource {
    async fn controllers(&self) -> crate::Result<Vec<Controller>> {
        self.controllers
            .clone()
            .ok_or_else(|| "DCS unavailable".into())
    }

    async fn devices(&self, idc: MacAddress) -> crate::Result<Vec<Device>> {
        self.fetched.lock().unwrap().push(idc);

        if self.failing_devices.contains(&idc) {
            return Err("timed out".into());
        }

        Ok(self
            .devices
            .iter()
            .filter(|d| d.key.idc == idc)
            .cloned()
            .collect())
    }
}
