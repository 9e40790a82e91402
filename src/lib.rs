#![warn(missing_docs)]

//! Eddystone-ble decodes [Eddystone] beacon advertisements and manages Bluetooth Low Energy (BLE) GATT sessions on top
//! of a platform radio driver.
//!
//! The crate does not talk to Bluetooth hardware itself. Platform bindings implement the callback-based [`Radio`]
//! trait, and everything above it (advertisement parsing, the device table, frame decoding, connection state and GATT
//! discovery) is platform independent.
//!
//! [Eddystone]: https://github.com/google/eddystone/blob/master/protocol-specification.md
//!
//! # Usage
//!
//! ```rust,no_run
//!# use std::rc::Rc;
//!# use eddystone_ble::radio::Radio;
//!# use eddystone_ble::EddystoneScanner;
//!# fn run<R: Radio + 'static>(radio: Rc<R>) -> eddystone_ble::Result<()> {
//!let scanner = EddystoneScanner::new(radio);
//!scanner.start_scan(|result| match result {
//!    Ok(device) => println!(
//!        "{}: url={:?} uid={:?} distance={:?}",
//!        device,
//!        device.beacon().url,
//!        device.beacon().uid(),
//!        device.distance()
//!    ),
//!    Err(err) => eprintln!("scan error: {}", err),
//!})?;
//!#     Ok(())
//!# }
//! ```
//!
//! # Overview
//!
//! - Advertisements:
//!   - [Parsing][AdvertisementData::from_scan_record] GAP scan records
//!   - [Decoding][eddystone::decode] Eddystone UID, EID, URL and TLM frames
//!   - [Estimating distance][ranging::calculate_accuracy] from signal strength
//! - Discovery:
//!   - [Scanning][ScanController::start_scan] with de-duplication and service filtering
//!   - [Scanning for beacons][EddystoneScanner::start_scan], accumulating frames per device
//! - Accessing remote GATT services:
//!   - [Connecting][GattSessionManager::connect] and tracking connection state
//!   - [Discovering][GattSessionManager::discover_services] services, characteristics and descriptors
//!   - Reading, writing and subscribing to characteristics and descriptors by UUID
//! - [Advertising][Advertiser] as an Eddystone-UID beacon
//!
//! # Callbacks and futures
//!
//! Every operation reports its outcome exactly once through a callback, and every callback runs on the thread that
//! drives the radio. Operations that complete once also have an `_async` form returning a future, for hosts that run
//! an executor alongside the radio's event loop.
//!
//! # Feature flags
//!
//! The `serde` feature is available to enable serializing/deserializing device identifiers and decoded
//! advertisement data.

mod ad;
pub mod advertisement;
pub mod btuuid;
pub mod codec;
pub mod device;
pub mod eddystone;
pub mod error;
pub mod future;
mod join;
pub mod radio;
pub mod ranging;
pub mod registry;
pub mod scan;
pub mod session;

use std::collections::HashMap;

pub use advertisement::{Advertiser, EddystoneUid};
pub use btuuid::BluetoothUuidExt;
pub use device::{BeaconData, Device, DeviceId};
pub use eddystone::EddystoneFrame;
pub use error::Error;
pub use radio::Radio;
pub use registry::DeviceRegistry;
pub use scan::{EddystoneScanner, ScanController, ScanOptions};
pub use session::{GattSessionManager, ServiceSelection, SessionState};
pub use uuid::Uuid;

/// Convenience alias for a result with [`Error`]
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Data included in a Bluetooth advertisement or scan reponse.
///
/// Every field is unset unless the corresponding structure was present and well formed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AdvertisementData {
    /// The (possibly shortened) local name of the device (CSS §A.1.2)
    pub local_name: Option<String>,
    /// Manufacturer specific data, including the leading company identifier (CSS §A.1.4)
    pub manufacturer_data: Option<Vec<u8>>,
    /// Advertised GATT service UUIDs in order of appearance (CSS §A.1.1)
    pub services: Vec<Uuid>,
    /// Service associated data (CSS §A.1.11)
    pub service_data: HashMap<Uuid, Vec<u8>>,
    /// Transmitted power level (CSS §A.1.5)
    pub tx_power_level: Option<i8>,
    /// Whether the advertising packet was connectable, when the radio reports it
    pub is_connectable: Option<bool>,
}

impl AdvertisementData {
    /// Splits the manufacturer specific data into company identifier and payload.
    pub fn manufacturer(&self) -> Option<ManufacturerData> {
        let data = self.manufacturer_data.as_deref()?;
        if data.len() < 2 {
            return None;
        }
        Some(ManufacturerData {
            company_id: codec::le_u16_at(data, 0),
            data: data[2..].to_vec(),
        })
    }
}

/// Manufacturer specific data included in Bluetooth advertisements. See the Bluetooth Core Specification Supplement
/// §A.1.4 for details.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ManufacturerData {
    /// Company identifier (defined [here](https://www.bluetooth.com/specifications/assigned-numbers/company-identifiers/))
    pub company_id: u16,
    /// Manufacturer specific data
    pub data: Vec<u8>,
}

/// GATT characteristic properties as defined in the Bluetooth Core Specification, Vol 3, Part G, §3.3.1.1.
/// Extended properties are also included as defined in §3.3.3.1.
#[allow(missing_docs)]
#[non_exhaustive]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CharacteristicProperties {
    pub broadcast: bool,
    pub read: bool,
    pub write_without_response: bool,
    pub write: bool,
    pub notify: bool,
    pub indicate: bool,
    pub authenticated_signed_writes: bool,
    pub extended_properties: bool,
    pub reliable_write: bool,
    pub writable_auxiliaries: bool,
}

impl CharacteristicProperties {
    /// Decodes the property bits reported by the radio.
    ///
    /// Extended properties are in the upper bits.
    pub fn from_bits(bits: u32) -> Self {
        let bit = |n: u32| bits & (1 << n) != 0;
        CharacteristicProperties {
            broadcast: bit(0),
            read: bit(1),
            write_without_response: bit(2),
            write: bit(3),
            notify: bit(4),
            indicate: bit(5),
            authenticated_signed_writes: bit(6),
            extended_properties: bit(7),
            reliable_write: bit(8),
            writable_auxiliaries: bit(9),
        }
    }

    /// Encodes back to the radio's bit layout.
    pub fn to_bits(self) -> u32 {
        [
            self.broadcast,
            self.read,
            self.write_without_response,
            self.write,
            self.notify,
            self.indicate,
            self.authenticated_signed_writes,
            self.extended_properties,
            self.reliable_write,
            self.writable_auxiliaries,
        ]
        .iter()
        .enumerate()
        .fold(0, |bits, (n, &set)| bits | (u32::from(set) << n))
    }

    /// Returns `true` if the characteristic can deliver values without being read.
    pub fn can_subscribe(self) -> bool {
        self.notify || self.indicate
    }
}
