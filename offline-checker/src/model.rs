use chrono::{DateTime, Utc};

use crate::ident::{DeviceKey, IdentError, MacAddress};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceKind {
    Meter,
    PulseCounter,
    RadioReceiver,
    Other,
}

impl DeviceKind {
    pub fn letter(self) -> Option<char> {
        match self {
            Self::Meter => Some('M'),
            Self::PulseCounter => Some('P'),
            Self::RadioReceiver => Some('R'),
            Self::Other => None,
        }
    }

    pub fn from_letter(letter: char) -> Option<Self> {
        match letter.to_ascii_uppercase() {
            'M' => Some(Self::Meter),
            'P' => Some(Self::PulseCounter),
            'R' => Some(Self::RadioReceiver),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Meter => "Meter",
            Self::PulseCounter => "Pulse counter",
            Self::RadioReceiver => "Radio receiver",
            Self::Other => "Other",
        }
    }
}

impl From<dcs_client::DeviceType> for DeviceKind {
    fn from(t: dcs_client::DeviceType) -> Self {
        use dcs_client::DeviceType as T;
        match t {
            T::Meter => Self::Meter,
            T::PulseCounter => Self::PulseCounter,
            T::RadioReceiver => Self::RadioReceiver,
            _ => Self::Other,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceStatus {
    Online,
    Offline,
    Unknown,
}

impl From<dcs_client::DeviceStatus> for DeviceStatus {
    fn from(s: dcs_client::DeviceStatus) -> Self {
        use dcs_client::DeviceStatus as S;
        match s {
            S::Online => Self::Online,
            S::Offline => Self::Offline,
            _ => Self::Unknown,
        }
    }
}

/// An IDC as far as offline checking is concerned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Controller {
    pub mac: MacAddress,
    pub name: String,
    pub ip_address: Option<String>,
    pub sw_version: String,

    /// `None` if it has never connected.
    pub last_connected: Option<DateTime<Utc>>,

    pub modbus_device_count: u32,
    pub status_summary: Option<String>,
    pub disabled: bool,
}

impl Controller {
    pub fn sw_major_version(&self) -> Option<u32> {
        let digits: String = self
            .sw_version
            .trim()
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        digits.parse().ok()
    }

    /// Whether this IDC's Modbus devices should be fetched. Only firmware 4 and later reports per-device status, and
    /// there is nothing to look at when the DCS already says every device is online.
    pub fn worth_inspecting(&self) -> bool {
        self.sw_major_version().is_some_and(|major| major >= 4)
            && self.modbus_device_count > 0
            && self.status_summary.as_deref() != Some("online")
    }
}

impl TryFrom<dcs_client::Idc> for Controller {
    type Error = IdentError;

    fn try_from(idc: dcs_client::Idc) -> Result<Self, Self::Error> {
        let mac = MacAddress::new(idc.mac_address)
            .ok_or_else(|| IdentError::Mac(idc.mac_address.to_string()))?;

        Ok(Controller {
            mac,
            name: idc.name,
            ip_address: idc.ip_address,
            sw_version: idc.sw_version,
            last_connected: idc.last_connected_time,
            modbus_device_count: idc.modbus_device_count,
            status_summary: idc.device_status_summary,
            disabled: idc.disabled,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Device {
    pub key: DeviceKey,

    /// DCS database id
    pub id: u64,

    pub kind: DeviceKind,
    pub description: Option<String>,
    pub serial_number: Option<String>,
    pub status: DeviceStatus,
    pub status_changed: Option<DateTime<Utc>>,
}

impl Device {
    pub fn label(&self) -> String {
        self.key.label(Some(self.kind))
    }
}

impl TryFrom<dcs_client::ModbusDevice> for Device {
    type Error = IdentError;

    fn try_from(dev: dcs_client::ModbusDevice) -> Result<Self, Self::Error> {
        let idc = MacAddress::new(dev.mac_address)
            .ok_or_else(|| IdentError::Device(format!("{}-{}", dev.mac_address, dev.address)))?;

        Ok(Device {
            key: DeviceKey::new(idc, dev.address),
            id: dev.id,
            kind: dev.device_type.into(),
            description: dev.description,
            serial_number: dev.serial_number,
            status: dev.status.into(),
            status_changed: dev.status_changed_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idc(sw_version: &str, modbus_device_count: u32, summary: Option<&str>) -> Controller {
        Controller {
            mac: MacAddress::new(1).unwrap(),
            name: "Plant Room".to_owned(),
            ip_address: None,
            sw_version: sw_version.to_owned(),
            last_connected: None,
            modbus_device_count,
            status_summary: summary.map(str::to_owned),
            disabled: false,
        }
    }

    #[test]
    fn inspects_modern_idcs_with_unhappy_devices() {
        assert!(idc("4.1.7", 3, Some("partial")).worth_inspecting());
        assert!(idc("5.0", 1, Some("offline")).worth_inspecting());
        assert!(idc("10.2", 1, None).worth_inspecting());
    }

    #[test]
    fn skips_idcs_with_nothing_to_inspect() {
        assert!(!idc("3.9.2", 3, Some("partial")).worth_inspecting());
        assert!(!idc("4.1.7", 0, Some("partial")).worth_inspecting());
        assert!(!idc("4.1.7", 3, Some("online")).worth_inspecting());
        assert!(!idc("", 3, Some("partial")).worth_inspecting());
    }

    #[test]
    fn converts_wire_idc() {
        let wire = dcs_client::Idc {
            mac_address: 0x0123_4567_89AB,
            name: "Plant Room 2".to_owned(),
            ip_address: Some("10.0.4.17".to_owned()),
            sw_version: "4.1.7".to_owned(),
            last_connected_time: None,
            modbus_device_count: 6,
            device_status_summary: Some("partial".to_owned()),
            disabled: true,
        };

        let controller = Controller::try_from(wire).unwrap();

        assert_eq!(controller.mac.to_string(), "01:23:45:67:89:AB");
        assert_eq!(controller.sw_major_version(), Some(4));
        assert!(controller.disabled);
    }

    #[test]
    fn rejects_oversized_mac() {
        let wire = dcs_client::ModbusDevice {
            id: 1,
            mac_address: u64::MAX,
            address: 5,
            device_type: dcs_client::DeviceType::Meter,
            description: None,
            serial_number: None,
            status: dcs_client::DeviceStatus::Offline,
            status_changed_time: None,
        };

        assert!(Device::try_from(wire).is_err());
    }

    #[test]
    fn converts_wire_device() {
        let wire = dcs_client::ModbusDevice {
            id: 8812,
            mac_address: 0x0123_4567_89AB,
            address: 100,
            device_type: dcs_client::DeviceType::PulseCounter,
            description: Some("Boiler house gas".to_owned()),
            serial_number: None,
            status: dcs_client::DeviceStatus::Unknown,
            status_changed_time: None,
        };

        let device = Device::try_from(wire).unwrap();

        assert_eq!(device.label(), "01:23:45:67:89:AB-P100");
        assert_eq!(device.status, DeviceStatus::Unknown);
    }
}
