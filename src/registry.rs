//! The table of devices seen during the current scan.

use std::collections::HashMap;

use tracing::{debug, trace};
use uuid::Uuid;

use crate::codec;
use crate::device::{Device, DeviceId};
use crate::radio::{RawAdvertisement, RawSighting};
use crate::AdvertisementData;

/// What the registry did with a sighting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Sighting {
    /// First sighting of this device; it should be reported
    New(DeviceId),
    /// Repeat sighting; the device was updated and should be reported
    Updated(DeviceId),
    /// Repeat sighting dropped by the duplicate policy
    Duplicate,
    /// The device does not advertise any service in the service filter
    Filtered,
}

impl Sighting {
    /// The device to report, if any
    pub fn reported(&self) -> Option<&DeviceId> {
        match self {
            Sighting::New(id) | Sighting::Updated(id) => Some(id),
            Sighting::Duplicate | Sighting::Filtered => None,
        }
    }
}

/// Devices keyed by address.
///
/// The registry applies the reporting policy: an optional service filter and a report-once switch that overrides
/// the per-scan duplicate setting.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<DeviceId, Device>,
    service_filter: Option<Vec<Uuid>>,
    report_once: bool,
}

impl DeviceRegistry {
    /// Creates an empty registry with no filter that reports repeat sightings.
    pub fn new() -> Self {
        Default::default()
    }

    /// Only report devices advertising at least one of `services`. An empty list reports nothing.
    pub fn filter_devices_by_service(&mut self, services: &[Uuid]) {
        self.service_filter = Some(services.to_vec());
    }

    /// Removes the service filter.
    pub fn clear_service_filter(&mut self) {
        self.service_filter = None;
    }

    /// Report each device only once per scan, regardless of the scan's duplicate setting.
    pub fn report_device_once(&mut self, report_once: bool) {
        self.report_once = report_once;
    }

    /// Looks up a device
    pub fn get(&self, id: &DeviceId) -> Option<&Device> {
        self.devices.get(id)
    }

    /// Iterates over all known devices in arbitrary order
    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    #[allow(missing_docs)]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[allow(missing_docs)]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Forgets every device.
    pub fn clear(&mut self) {
        self.devices.clear();
    }

    /// Applies `f` to a known device, returning its result.
    pub(crate) fn update_device<T>(&mut self, id: &DeviceId, f: impl FnOnce(&mut Device) -> T) -> Option<T> {
        self.devices.get_mut(id).map(f)
    }

    /// Merges a sighting into the table.
    ///
    /// A repeat sighting updates the signal strength and the platform name when one is given. A sighting that
    /// carries an advertisement replaces the stored one along with its scan record; if the record cannot be parsed
    /// the device is left without advertisement data. A scan record identical to the one the stored advertisement
    /// came from is not parsed again.
    pub fn record(&mut self, sighting: RawSighting, allow_duplicates: bool) -> Sighting {
        let RawSighting {
            address,
            name,
            rssi,
            advertisement,
        } = sighting;
        let id = DeviceId::new(address);
        let carries_advertisement = !matches!(advertisement, RawAdvertisement::None);

        let (parsed, scan_record) = match advertisement {
            RawAdvertisement::None => (None, None),
            RawAdvertisement::Parsed(adv) => (Some(adv), None),
            RawAdvertisement::ScanRecord(bytes) => (None, Some(bytes)),
            RawAdvertisement::Base64ScanRecord(text) => match codec::base64_decode(&text) {
                Ok(bytes) => (None, Some(bytes)),
                Err(err) => {
                    debug!("discarding scan record from {}: {}", id, err);
                    (None, None)
                }
            },
        };

        let existing = self.devices.get(&id);
        let adv_data = match (parsed, &scan_record) {
            (Some(adv), _) => Some(adv),
            (None, Some(record)) => match existing {
                Some(device) if device.adv_data.is_some() && device.scan_record.as_ref() == Some(record) => {
                    trace!("{} sent the same scan record", id);
                    device.adv_data.clone()
                }
                _ => match AdvertisementData::from_scan_record(record) {
                    Ok(adv) => Some(adv),
                    Err(err) => {
                        debug!("unparseable scan record from {}: {}", id, err);
                        None
                    }
                },
            },
            (None, None) => None,
        };

        let effective = if carries_advertisement {
            adv_data.as_ref()
        } else {
            existing.and_then(|d| d.adv_data.as_ref())
        };
        if !self.matches_service_filter(effective) {
            trace!("{} filtered by service", id);
            return Sighting::Filtered;
        }

        let report_once = self.report_once;
        if let Some(device) = self.devices.get_mut(&id) {
            if !allow_duplicates || report_once {
                return Sighting::Duplicate;
            }
            device.rssi = rssi;
            if name.is_some() {
                device.name = name;
            }
            if carries_advertisement {
                device.scan_record = scan_record;
                device.adv_data = adv_data;
            }
            return Sighting::Updated(id);
        }

        let mut device = Device::new(id.clone());
        device.name = name;
        device.rssi = rssi;
        device.scan_record = scan_record;
        device.adv_data = adv_data;
        debug!("discovered {}", device);
        self.devices.insert(id.clone(), device);
        Sighting::New(id)
    }

    fn matches_service_filter(&self, adv: Option<&AdvertisementData>) -> bool {
        let Some(filter) = &self.service_filter else {
            return true;
        };
        adv.is_some_and(|adv| adv.services.iter().any(|uuid| filter.contains(uuid)))
    }
}
