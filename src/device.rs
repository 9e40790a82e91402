use crate::codec;
use crate::eddystone::{EddystoneFrame, Temperature};
use crate::ranging::calculate_accuracy;
use crate::AdvertisementData;

/// A device identifier. Contains the Bluetooth address in the platform's format, e.g. `AB:CD:EF:01:23:45`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceId(pub(crate) String);

impl DeviceId {
    /// Creates an identifier from an address
    pub fn new(address: impl Into<String>) -> Self {
        DeviceId(address.into())
    }

    /// The device address
    pub fn address(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl From<&str> for DeviceId {
    fn from(address: &str) -> Self {
        DeviceId::new(address)
    }
}

/// A device seen during a scan.
///
/// Devices are owned by the [`DeviceRegistry`][crate::registry::DeviceRegistry]; callbacks receive snapshots.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub(crate) id: DeviceId,
    pub(crate) name: Option<String>,
    pub(crate) rssi: Option<i16>,
    pub(crate) scan_record: Option<Vec<u8>>,
    pub(crate) adv_data: Option<AdvertisementData>,
    pub(crate) beacon: BeaconData,
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({})", name, self.id),
            None => std::fmt::Display::fmt(&self.id, f),
        }
    }
}

impl Device {
    pub(crate) fn new(id: DeviceId) -> Self {
        Device {
            id,
            name: None,
            rssi: None,
            scan_record: None,
            adv_data: None,
            beacon: BeaconData::default(),
        }
    }

    /// This device's unique identifier
    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    /// The device address
    pub fn address(&self) -> &str {
        self.id.address()
    }

    /// The device name.
    ///
    /// Prefers the name in the most recent advertisement over the platform's cached name, which may be stale.
    pub fn name(&self) -> Option<&str> {
        self.advertised_name().or(self.name.as_deref())
    }

    /// The name reported by the platform alongside the advertisement
    pub fn platform_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Checks the device name.
    ///
    /// An advertised name matches if it starts with `name`, since some devices pad it with unprintable bytes. Without
    /// an advertised name the platform name must match exactly.
    pub fn has_name(&self, name: &str) -> bool {
        match self.advertised_name() {
            Some(advertised) => advertised.starts_with(name),
            None => self.name.as_deref() == Some(name),
        }
    }

    fn advertised_name(&self) -> Option<&str> {
        self.adv_data
            .as_ref()
            .and_then(|adv| adv.local_name.as_deref())
            .filter(|name| !name.is_empty())
    }

    /// The signal strength in dBm of the most recent advertisement
    pub fn rssi(&self) -> Option<i16> {
        self.rssi
    }

    /// The scan record the current advertisement was parsed from, or the first one received if none parsed
    pub fn scan_record(&self) -> Option<&[u8]> {
        self.scan_record.as_deref()
    }

    /// The parsed advertisement.
    ///
    /// `None` if no advertisement has been received or the scan record could not be parsed.
    pub fn adv_data(&self) -> Option<&AdvertisementData> {
        self.adv_data.as_ref()
    }

    /// Eddystone fields accumulated from every frame received from this device
    pub fn beacon(&self) -> &BeaconData {
        &self.beacon
    }

    /// Estimated distance in metres, from the beacon's calibrated tx power and the most recent RSSI.
    pub fn distance(&self) -> Option<f64> {
        calculate_accuracy(self.beacon.tx_power, self.rssi)
    }
}

/// Eddystone fields of a beacon.
///
/// A beacon interleaves its frame types across advertising cycles, so each field is filled in by the first frame
/// that carries it and updated by later ones.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BeaconData {
    /// The URL from the most recent URL frame
    pub url: Option<String>,
    /// Calibrated tx power at 0 m from the most recent UID, EID, or URL frame
    pub tx_power: Option<i8>,
    /// UID namespace
    pub nid: Option<[u8; 10]>,
    /// UID instance
    pub bid: Option<[u8; 6]>,
    /// Ephemeral identifier
    pub eid: Option<[u8; 8]>,
    /// Battery voltage in millivolts
    pub voltage: Option<u16>,
    #[allow(missing_docs)]
    pub temperature: Option<Temperature>,
    /// Advertising PDU count
    pub adv_cnt: Option<u32>,
    /// Uptime in 0.1 s units
    pub dsec_cnt: Option<u32>,
}

impl BeaconData {
    /// Merges the fields of a frame.
    pub fn merge(&mut self, frame: &EddystoneFrame) {
        match frame {
            EddystoneFrame::Uid(uid) => {
                self.tx_power = Some(uid.tx_power);
                self.nid = Some(uid.namespace);
                self.bid = Some(uid.instance);
            }
            EddystoneFrame::Eid(eid) => {
                self.tx_power = Some(eid.tx_power);
                self.eid = Some(eid.ephemeral_id);
            }
            EddystoneFrame::Url(url) => {
                self.tx_power = Some(url.tx_power);
                self.url = Some(url.url.clone());
            }
            EddystoneFrame::Tlm(tlm) => {
                self.voltage = Some(tlm.voltage);
                self.temperature = Some(tlm.temperature);
                self.adv_cnt = Some(tlm.adv_cnt);
                self.dsec_cnt = Some(tlm.dsec_cnt);
            }
        }
    }

    /// Returns `true` until an Eddystone frame has been merged.
    pub fn is_empty(&self) -> bool {
        *self == BeaconData::default()
    }

    /// The namespace as upper-case hex
    pub fn nid_hex(&self) -> Option<String> {
        self.nid.map(|nid| codec::hex_encode_upper(&nid))
    }

    /// The instance as upper-case hex
    pub fn bid_hex(&self) -> Option<String> {
        self.bid.map(|bid| codec::hex_encode_upper(&bid))
    }

    /// The full 16-byte UID as upper-case hex, namespace first
    pub fn uid(&self) -> Option<String> {
        Some(self.nid_hex()? + &self.bid_hex()?)
    }

    /// The full 16-byte UID as Base64
    pub fn uid_base64(&self) -> Option<String> {
        let mut uid = self.nid?.to_vec();
        uid.extend(self.bid?);
        Some(codec::base64_encode(&uid))
    }

    /// The ephemeral identifier as upper-case hex
    pub fn eid_hex(&self) -> Option<String> {
        self.eid.map(|eid| codec::hex_encode_upper(&eid))
    }

    /// The ephemeral identifier as Base64
    pub fn eid_base64(&self) -> Option<String> {
        self.eid.map(|eid| codec::base64_encode(&eid))
    }

    /// The beacon name used by the Google Proximity Beacon API, `beacons/4!<eid>`
    pub fn eid_google(&self) -> Option<String> {
        self.eid.map(|eid| format!("beacons/4!{}", codec::hex_encode(&eid)))
    }
}
