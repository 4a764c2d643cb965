use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::config::DcsConfig;
use crate::ident::{DeviceKey, IdentError, MacAddress};
use crate::model::{Controller, Device};
use crate::Error;

/// Where controller and device records come from.
#[async_trait]
pub trait Source {
    async fn controllers(&self) -> crate::Result<Vec<Controller>>;

    async fn devices(&self, idc: MacAddress) -> crate::Result<Vec<Device>>;
}

/// Everything fetched from the DCS during one check.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    pub controllers: BTreeMap<MacAddress, Controller>,
    pub devices: BTreeMap<DeviceKey, Device>,
}

impl Snapshot {
    /// Fetch enabled controllers, then the devices of every controller worth inspecting.
    ///
    /// A controller which owns a device in `previous_offline` or `ignored` is always inspected, otherwise a device
    /// whose controller has since cleaned up its status summary would never be seen to recover.
    ///
    /// Fetch failures are logged and treated as empty results.
    pub async fn collect<S>(
        source: &S,
        previous_offline: &BTreeSet<DeviceKey>,
        ignored: &BTreeSet<DeviceKey>,
    ) -> Self
    where
        S: Source + ?Sized,
    {
        let controllers: BTreeMap<MacAddress, Controller> = match source.controllers().await {
            Ok(controllers) => controllers
                .into_iter()
                .filter(|c| !c.disabled)
                .map(|c| (c.mac, c))
                .collect(),
            Err(error) => {
                error!(%error, "Failed to fetch IDCs");
                BTreeMap::new()
            }
        };
        info!(count = controllers.len(), "Fetched IDCs");

        let tracked: BTreeSet<MacAddress> = previous_offline
            .iter()
            .chain(ignored)
            .map(|key| key.idc)
            .collect();

        let scope = controllers
            .values()
            .filter(|c| c.worth_inspecting() || tracked.contains(&c.mac))
            .map(|c| c.mac);

        let mut devices = BTreeMap::new();
        for mac in scope {
            match source.devices(mac).await {
                Ok(fetched) => {
                    debug!(%mac, count = fetched.len(), "Fetched devices");
                    devices.extend(fetched.into_iter().map(|d| (d.key, d)));
                }
                Err(error) => warn!(%mac, %error, "Failed to fetch devices"),
            }
        }
        info!(count = devices.len(), "Fetched Modbus devices");

        Snapshot {
            controllers,
            devices,
        }
    }

    pub fn controller(&self, mac: &MacAddress) -> Option<&Controller> {
        self.controllers.get(mac)
    }

    pub fn device(&self, key: &DeviceKey) -> Option<&Device> {
        self.devices.get(key)
    }

    /// The most specific identifier available for `key`: with the kind letter if the device is in this snapshot.
    pub fn device_label(&self, key: &DeviceKey) -> String {
        key.label(self.device(key).map(|d| d.kind))
    }
}

/// [`Source`] backed by a logged-in DCS session.
///
/// Failing to log in is not fatal: every fetch then fails, which [`Snapshot::collect`] treats as an empty result.
#[derive(Debug)]
pub struct Dcs {
    client: Option<dcs_client::Client>,
}

impl Dcs {
    pub async fn connect(config: &DcsConfig) -> Self {
        let client = match dcs_client::Client::login(
            config.url.as_str(),
            &config.username,
            &config.password,
        )
        .await
        {
            Ok(client) => {
                info!(url = %config.url, "Logged in to DCS");
                Some(client)
            }
            Err(error) => {
                error!(url = %config.url, %error, "Failed to log in to DCS");
                None
            }
        };
        Dcs { client }
    }

    pub async fn logout(self) {
        if let Some(client) = self.client {
            if let Err(error) = client.logout().await {
                warn!(%error, "Failed to log out of DCS");
            }
        }
    }

    fn client(&self) -> crate::Result<&dcs_client::Client> {
        self.client.as_ref().ok_or(Error::NotConnected)
    }
}

#[async_trait]
impl Source for Dcs {
    async fn controllers(&self) -> crate::Result<Vec<Controller>> {
        Ok(from_wire(self.client()?.idcs().await?))
    }

    async fn devices(&self, idc: MacAddress) -> crate::Result<Vec<Device>> {
        Ok(from_wire(
            self.client()?.modbus_devices_by_idc(idc.as_u64()).await?,
        ))
    }
}

fn from_wire<W, T>(records: Vec<W>) -> Vec<T>
where
    T: TryFrom<W, Error = IdentError>,
{
    records
        .into_iter()
        .filter_map(|record| match T::try_from(record) {
            Ok(t) => Some(t),
            Err(error) => {
                warn!(%error, "Skipping record with unusable identity");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeviceKind, DeviceStatus};
    use crate::testing::{controller, device, mac, FakeSource};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn drops_disabled_controllers() {
        let mut disabled = controller(0xB, "3.0");
        disabled.disabled = true;
        let source = FakeSource::new(vec![controller(0xA, "3.0"), disabled]);

        let snapshot = Snapshot::collect(&source, &BTreeSet::new(), &BTreeSet::new()).await;

        assert_eq!(snapshot.controllers.keys().copied().collect::<Vec<_>>(), vec![mac(0xA)]);
    }

    #[tokio::test]
    async fn fetches_devices_only_for_suspect_controllers() {
        let source = FakeSource::new(vec![
            controller(0xA, "4.1"),
            controller(0xB, "3.9"),
        ])
        .with_devices(vec![device(0xA, 1, DeviceKind::PulseCounter, DeviceStatus::Offline)]);

        let snapshot = Snapshot::collect(&source, &BTreeSet::new(), &BTreeSet::new()).await;

        assert_eq!(source.fetched(), vec![mac(0xA)]);
        assert_eq!(snapshot.devices.len(), 1);
    }

    #[tokio::test]
    async fn tracked_devices_force_their_controller_into_scope() {
        let source = FakeSource::new(vec![
            controller(0xA, "3.9"),
            controller(0xB, "3.9"),
            controller(0xC, "3.9"),
        ]);
        let previous = BTreeSet::from([DeviceKey::new(mac(0xA), 1)]);
        let ignored = BTreeSet::from([DeviceKey::new(mac(0xB), 2)]);

        Snapshot::collect(&source, &previous, &ignored).await;

        assert_eq!(source.fetched(), vec![mac(0xA), mac(0xB)]);
    }

    #[tokio::test]
    async fn tracked_device_of_missing_controller_is_not_fetched() {
        let source = FakeSource::new(vec![controller(0xA, "3.9")]);
        let previous = BTreeSet::from([DeviceKey::new(mac(0xF), 1)]);

        Snapshot::collect(&source, &previous, &BTreeSet::new()).await;

        assert!(source.fetched().is_empty());
    }

    #[tokio::test]
    async fn controller_fetch_failure_yields_empty_snapshot() {
        let source = FakeSource::failing();

        let snapshot = Snapshot::collect(
            &source,
            &BTreeSet::from([DeviceKey::new(mac(0xA), 1)]),
            &BTreeSet::new(),
        )
        .await;

        assert!(snapshot.controllers.is_empty());
        assert!(snapshot.devices.is_empty());
        assert!(source.fetched().is_empty());
    }

    #[tokio::test]
    async fn device_fetch_failure_only_affects_that_controller() {
        let source = FakeSource::new(vec![controller(0xA, "4.0"), controller(0xB, "4.0")])
            .with_devices(vec![
                device(0xA, 1, DeviceKind::PulseCounter, DeviceStatus::Offline),
                device(0xB, 1, DeviceKind::PulseCounter, DeviceStatus::Offline),
            ])
            .failing_devices_for(mac(0xA));

        let snapshot = Snapshot::collect(&source, &BTreeSet::new(), &BTreeSet::new()).await;

        assert_eq!(
            snapshot.devices.keys().copied().collect::<Vec<_>>(),
            vec![DeviceKey::new(mac(0xB), 1)]
        );
    }

    #[test]
    fn device_label_falls_back_without_kind() {
        let mut snapshot = Snapshot::default();
        let known = device(0xA, 100, DeviceKind::PulseCounter, DeviceStatus::Offline);
        snapshot.devices.insert(known.key, known);

        assert_eq!(
            snapshot.device_label(&DeviceKey::new(mac(0xA), 100)),
            "00:00:00:00:00:0A-P100"
        );
        assert_eq!(
            snapshot.device_label(&DeviceKey::new(mac(0xA), 101)),
            "00:00:00:00:00:0A-101"
        );
    }

    #[test]
    fn unusable_wire_records_are_skipped() {
        let wire = vec![
            dcs_client::Idc {
                mac_address: 0xA,
                name: "ok".to_owned(),
                ip_address: None,
                sw_version: "4.0".to_owned(),
                last_connected_time: None,
                modbus_device_count: 0,
                device_status_summary: None,
                disabled: false,
            },
            dcs_client::Idc {
                mac_address: u64::MAX,
                name: "broken".to_owned(),
                ip_address: None,
                sw_version: "4.0".to_owned(),
                last_connected_time: None,
                modbus_device_count: 0,
                device_status_summary: None,
                disabled: false,
            },
        ];

        let controllers: Vec<Controller> = from_wire(wire);

        assert_eq!(controllers.len(), 1);
        assert_eq!(controllers[0].name, "ok");
    }
}
