//! The platform radio driver boundary.
//!
//! Everything above this module is platform independent. A host embeds the crate by implementing [`Radio`] over its
//! BLE stack (a Cordova bridge, a JNI binding, a test double). All operations are non-blocking: the driver accepts a
//! completion callback and invokes it later, possibly synchronously from inside the call.

use std::collections::HashMap;

use uuid::Uuid;

use crate::{AdvertisementData, CharacteristicProperties, Result};

/// A completion callback, invoked exactly once.
pub type Callback<T> = Box<dyn FnOnce(Result<T>)>;

/// An event callback, invoked once per event until the operation is stopped.
pub type Listener<T> = Box<dyn FnMut(Result<T>)>;

/// Opaque connection handle issued by the radio driver when a device connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceHandle(pub u64);

/// Opaque handle of a service, characteristic, or descriptor within a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttributeHandle(pub u64);

/// Advertisement payload as delivered with a sighting.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RawAdvertisement {
    /// The driver delivered no advertisement payload
    #[default]
    None,
    /// The driver parsed the advertisement itself
    Parsed(AdvertisementData),
    /// A raw GAP scan record
    ScanRecord(Vec<u8>),
    /// A GAP scan record encoded as Base64
    Base64ScanRecord(String),
}

/// One advertisement received while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSighting {
    /// The device address, in whatever form the platform uses
    pub address: String,
    /// The device name as cached by the platform
    pub name: Option<String>,
    /// Received signal strength in dBm
    pub rssi: Option<i16>,
    /// The advertisement payload
    pub advertisement: RawAdvertisement,
}

/// Connection states reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Connection in progress
    Connecting,
    /// Connected
    Connected,
    /// Disconnection in progress
    Disconnecting,
}

impl ConnectionState {
    /// Maps the numeric state codes used by Android-style drivers.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(ConnectionState::Disconnected),
            1 => Some(ConnectionState::Connecting),
            2 => Some(ConnectionState::Connected),
            3 => Some(ConnectionState::Disconnecting),
            _ => None,
        }
    }
}

/// A connection state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectInfo {
    /// The connection handle
    pub device: DeviceHandle,
    /// The new state
    pub state: ConnectionState,
}

/// A GATT service reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RemoteService {
    #[allow(missing_docs)]
    pub handle: AttributeHandle,
    #[allow(missing_docs)]
    pub uuid: Uuid,
}

/// A GATT characteristic reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RemoteCharacteristic {
    #[allow(missing_docs)]
    pub handle: AttributeHandle,
    #[allow(missing_docs)]
    pub uuid: Uuid,
    /// Properties decoded with [`CharacteristicProperties::from_bits`]
    pub properties: CharacteristicProperties,
}

/// A GATT descriptor reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RemoteDescriptor {
    #[allow(missing_docs)]
    pub handle: AttributeHandle,
    #[allow(missing_docs)]
    pub uuid: Uuid,
}

/// Options for enabling or disabling notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NotificationOptions {
    /// Also write the Client Characteristic Configuration descriptor. Some devices only work when this is disabled.
    pub write_config_descriptor: bool,
}

impl Default for NotificationOptions {
    fn default() -> Self {
        NotificationOptions {
            write_config_descriptor: true,
        }
    }
}

/// Payload for one advertising PDU when acting as a peripheral.
///
/// Service UUIDs are upper-case strings and service data is Base64, the forms platform advertising APIs accept.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AdvertiseData {
    #[allow(missing_docs)]
    pub service_uuids: Vec<String>,
    #[allow(missing_docs)]
    pub service_data: HashMap<String, String>,
    #[allow(missing_docs)]
    pub include_device_name: bool,
    #[allow(missing_docs)]
    pub include_tx_power_level: bool,
}

/// Advertising parameters when acting as a peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertiseSettings {
    /// Payload of the advertising PDU
    pub broadcast_data: AdvertiseData,
    /// Payload of the scan response PDU
    pub scan_response_data: AdvertiseData,
    /// Transmit power in dBm
    pub tx_power_level: i8,
    #[allow(missing_docs)]
    pub connectable: bool,
}

/// The platform BLE driver.
///
/// Errors from the driver are passed to callers unchanged, so implementations should create them with
/// [`Error::radio`][crate::Error::radio] carrying the platform's message.
pub trait Radio {
    /// Starts scanning.
    ///
    /// `services` limits the scan to devices advertising those services when non-empty. The listener receives one
    /// `Ok` per advertisement and an `Err` for each scan failure, until [`stop_scan`][Radio::stop_scan] is called.
    /// Sightings already queued may still be delivered after that.
    fn start_scan(&self, services: &[Uuid], listener: Listener<RawSighting>);

    /// Stops scanning.
    fn stop_scan(&self);

    /// Connects to the device with the given address. The listener receives every state change of the connection.
    fn connect(&self, address: &str, listener: Listener<ConnectInfo>);

    /// Closes the connection and releases the handle.
    fn close(&self, device: DeviceHandle);

    /// Reads the signal strength of a connected device.
    fn rssi(&self, device: DeviceHandle, callback: Callback<i16>);

    /// Lists all primary services of a connected device.
    fn services(&self, device: DeviceHandle, callback: Callback<Vec<RemoteService>>);

    /// Lists the characteristics of a service.
    fn characteristics(
        &self,
        device: DeviceHandle,
        service: AttributeHandle,
        callback: Callback<Vec<RemoteCharacteristic>>,
    );

    /// Lists the descriptors of a characteristic.
    fn descriptors(
        &self,
        device: DeviceHandle,
        characteristic: AttributeHandle,
        callback: Callback<Vec<RemoteDescriptor>>,
    );

    #[allow(missing_docs)]
    fn read_characteristic(&self, device: DeviceHandle, characteristic: AttributeHandle, callback: Callback<Vec<u8>>);

    #[allow(missing_docs)]
    fn write_characteristic(
        &self,
        device: DeviceHandle,
        characteristic: AttributeHandle,
        value: Vec<u8>,
        callback: Callback<()>,
    );

    #[allow(missing_docs)]
    fn write_characteristic_without_response(
        &self,
        device: DeviceHandle,
        characteristic: AttributeHandle,
        value: Vec<u8>,
        callback: Callback<()>,
    );

    /// Enables notifications. The listener receives each notified value until notifications are disabled.
    fn enable_notification(
        &self,
        device: DeviceHandle,
        characteristic: AttributeHandle,
        options: NotificationOptions,
        listener: Listener<Vec<u8>>,
    );

    #[allow(missing_docs)]
    fn disable_notification(
        &self,
        device: DeviceHandle,
        characteristic: AttributeHandle,
        options: NotificationOptions,
        callback: Callback<()>,
    );

    #[allow(missing_docs)]
    fn read_descriptor(&self, device: DeviceHandle, descriptor: AttributeHandle, callback: Callback<Vec<u8>>);

    #[allow(missing_docs)]
    fn write_descriptor(
        &self,
        device: DeviceHandle,
        descriptor: AttributeHandle,
        value: Vec<u8>,
        callback: Callback<()>,
    );

    /// Resets the platform BLE stack. Every open connection is lost.
    fn reset(&self, callback: Callback<()>);

    /// Starts advertising as a peripheral.
    fn start_advertise(&self, settings: AdvertiseSettings, callback: Callback<()>);

    /// Stops advertising.
    fn stop_advertise(&self, callback: Callback<()>);
}
