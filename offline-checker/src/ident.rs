//! Stable, human-readable identifiers for IDCs and their Modbus devices.
//!
//! IDCs are identified by their MAC address, rendered as `01:23:45:67:89:AB`. Modbus devices have no identity of
//! their own which survives being deleted and re-added on the DCS, so they are identified by the IDC they hang off
//! and their slave address: `01:23:45:67:89:AB-P100`. The letter (`M`eter, `P`ulse counter, `R`adio receiver) is
//! only there for humans reading the state file and is ignored when decoding.

use std::{collections::BTreeSet, fmt, str::FromStr};

use itertools::Itertools;
use thiserror::Error;
use tracing::warn;

use crate::model::DeviceKind;

/// Modbus unit/slave address
pub type SlaveId = u8;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentError {
    #[error("`{0}` is not a MAC address")]
    Mac(String),

    #[error("`{0}` is not a Modbus device identifier")]
    Device(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MacAddress(u64);

impl MacAddress {
    const MAX: u64 = 0xFFFF_FFFF_FFFF;

    /// `None` if `raw` does not fit in 48 bits.
    pub fn new(raw: u64) -> Option<Self> {
        (raw <= Self::MAX).then_some(Self(raw))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    fn octets(self) -> [u8; 6] {
        let [_, _, a, b, c, d, e, f] = self.0.to_be_bytes();
        [a, b, c, d, e, f]
    }

    /// Lower-case `0123.4567.89ab` form, as used by the network diagnostics pages.
    pub fn dotted(self) -> String {
        let hex = format!("{:012x}", self.0);
        format!("{}.{}.{}", &hex[0..4], &hex[4..8], &hex[8..12])
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.octets().iter().map(|o| format!("{:02X}", o)).join(":");
        f.write_str(&hex)
    }
}

impl FromStr for MacAddress {
    type Err = IdentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || IdentError::Mac(s.to_owned());

        let grouped = |sep: char, count: usize, width: usize| {
            let groups: Vec<&str> = s.split(sep).collect();
            groups.len() == count && groups.iter().all(|g| g.len() == width)
        };

        let digits = if grouped(':', 6, 2) {
            s.replace(':', "")
        } else if grouped('.', 3, 4) {
            s.replace('.', "")
        } else if s.len() == 12 {
            s.to_owned()
        } else {
            return Err(invalid());
        };

        // `from_str_radix` would also take a leading `+`
        if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }

        u64::from_str_radix(&digits, 16)
            .map(Self)
            .map_err(|_| invalid())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceKey {
    pub idc: MacAddress,
    pub slave: SlaveId,
}

impl DeviceKey {
    pub fn new(idc: MacAddress, slave: SlaveId) -> Self {
        Self { idc, slave }
    }

    /// The identifier including the device-kind letter, when the kind is known.
    pub fn label(&self, kind: Option<DeviceKind>) -> String {
        match kind.and_then(DeviceKind::letter) {
            Some(letter) => format!("{}-{}{}", self.idc, letter, self.slave),
            None => self.to_string(),
        }
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.idc, self.slave)
    }
}

impl FromStr for DeviceKey {
    type Err = IdentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || IdentError::Device(s.to_owned());

        let (mac, slave) = match s.split('-').collect::<Vec<_>>()[..] {
            [mac, slave] => (mac, slave),
            _ => return Err(invalid()),
        };

        let idc = mac.parse().map_err(|_| invalid())?;

        let number = slave
            .strip_prefix(|c: char| DeviceKind::from_letter(c).is_some())
            .unwrap_or(slave);
        if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let slave = number.parse().map_err(|_| invalid())?;

        Ok(Self { idc, slave })
    }
}

/// Decode a comma-joined list of identifiers, dropping (and logging) any which cannot be decoded.
pub fn decode_set<T>(field: &str) -> BTreeSet<T>
where
    T: FromStr<Err = IdentError> + Ord,
{
    field
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse() {
            Ok(ident) => Some(ident),
            Err(error) => {
                warn!(%error, "Discarding unreadable identifier");
                None
            }
        })
        .collect()
}

/// Encode identifiers and join them with commas, sorted by their encoded form so that the output is stable between
/// runs.
pub fn encode_set<'a, T, I, F>(items: I, mut encode: F) -> String
where
    T: 'a,
    I: IntoIterator<Item = &'a T>,
    F: FnMut(&T) -> String,
{
    items.into_iter().map(|item| encode(item)).sorted().join(",")
}
