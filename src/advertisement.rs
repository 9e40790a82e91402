//! Advertising as an Eddystone-UID beacon.

use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, info, warn};

use crate::btuuid::services::EDDYSTONE;
use crate::btuuid::BluetoothUuidExt;
use crate::codec;
use crate::error::{ErrorKind, FrameKind};
use crate::radio::{AdvertiseData, AdvertiseSettings, Radio};
use crate::{Error, Result};

/// Transmit power advertised when none is configured, in dBm at 0 m
pub const DEFAULT_TX_POWER_LEVEL: i8 = -26;

/// A validated Eddystone-UID beacon identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EddystoneUid {
    namespace: [u8; 10],
    instance: [u8; 6],
}

impl EddystoneUid {
    /// Parses a namespace of exactly 20 and an instance of exactly 12 upper-case hex digits.
    pub fn new(namespace: &str, instance: &str) -> Result<Self> {
        let namespace = parse_hex::<10>(namespace).ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidParameter,
                None,
                "Invalid namespace, must be 10 hex bytes",
            )
        })?;
        let instance = parse_hex::<6>(instance).ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidParameter,
                None,
                "Invalid instance, must be 6 hex bytes",
            )
        })?;
        Ok(EddystoneUid { namespace, instance })
    }

    #[allow(missing_docs)]
    pub fn namespace(&self) -> &[u8; 10] {
        &self.namespace
    }

    #[allow(missing_docs)]
    pub fn instance(&self) -> &[u8; 6] {
        &self.instance
    }

    /// The UID frame: type byte, transmit power, namespace, instance.
    pub fn service_data(&self, tx_power_level: i8) -> Vec<u8> {
        let mut data = Vec::with_capacity(18);
        data.push(FrameKind::Uid.type_byte());
        data.push(tx_power_level as u8);
        data.extend_from_slice(&self.namespace);
        data.extend_from_slice(&self.instance);
        data
    }

    /// Advertising parameters publishing this identity. The same payload is used for the advertisement and the scan
    /// response.
    pub fn settings(&self, tx_power_level: i8) -> AdvertiseSettings {
        let uuid = EDDYSTONE.to_upper_string();
        let service_data = codec::base64_encode(&self.service_data(tx_power_level));
        let data = AdvertiseData {
            service_uuids: vec![uuid.clone()],
            service_data: HashMap::from([(uuid, service_data)]),
            include_device_name: false,
            include_tx_power_level: false,
        };
        AdvertiseSettings {
            broadcast_data: data.clone(),
            scan_response_data: data,
            tx_power_level,
            connectable: false,
        }
    }
}

fn parse_hex<const N: usize>(text: &str) -> Option<[u8; N]> {
    if text.len() != 2 * N || !text.bytes().all(|b| matches!(b, b'0'..=b'9' | b'A'..=b'F')) {
        return None;
    }
    let mut bytes = [0u8; N];
    hex::decode_to_slice(text, &mut bytes).ok()?;
    Some(bytes)
}

/// Publishes an Eddystone-UID advertisement through the radio.
///
/// Only one advertisement may be active at a time.
pub struct Advertiser<R> {
    radio: Rc<R>,
    advertising: Rc<Cell<bool>>,
    tx_power_level: i8,
}

impl<R> std::fmt::Debug for Advertiser<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Advertiser")
            .field("advertising", &self.advertising.get())
            .field("tx_power_level", &self.tx_power_level)
            .finish()
    }
}

impl<R: Radio + 'static> Advertiser<R> {
    /// Creates an advertiser using [`DEFAULT_TX_POWER_LEVEL`].
    pub fn new(radio: Rc<R>) -> Self {
        Advertiser {
            radio,
            advertising: Rc::new(Cell::new(false)),
            tx_power_level: DEFAULT_TX_POWER_LEVEL,
        }
    }

    /// Sets the transmit power used by later advertisements.
    pub fn set_tx_power_level(&mut self, tx_power_level: i8) {
        self.tx_power_level = tx_power_level;
    }

    #[allow(missing_docs)]
    pub fn tx_power_level(&self) -> i8 {
        self.tx_power_level
    }

    /// Returns `true` once the radio has confirmed the advertisement, until it is stopped.
    pub fn is_advertising(&self) -> bool {
        self.advertising.get()
    }

    /// Validates the beacon identity and starts advertising it.
    ///
    /// Fails with [`ErrorKind::AlreadyAdvertising`] while an advertisement is active, before the identity is looked
    /// at, and with [`ErrorKind::InvalidParameter`] for a malformed identity.
    pub fn start_advertise(&self, namespace: &str, instance: &str, callback: impl FnOnce(Result<()>) + 'static) {
        if self.advertising.get() {
            return callback(Err(ErrorKind::AlreadyAdvertising.into()));
        }
        match EddystoneUid::new(namespace, instance) {
            Ok(uid) => self.advertise_uid(&uid, callback),
            Err(err) => callback(Err(err)),
        }
    }

    /// Starts advertising an already validated identity.
    pub fn advertise_uid(&self, uid: &EddystoneUid, callback: impl FnOnce(Result<()>) + 'static) {
        if self.advertising.get() {
            return callback(Err(ErrorKind::AlreadyAdvertising.into()));
        }

        let settings = uid.settings(self.tx_power_level);
        debug!("advertising settings: {:?}", settings);
        let advertising = self.advertising.clone();
        self.radio.start_advertise(
            settings,
            Box::new(move |result| {
                match &result {
                    Ok(()) => info!("advertising started"),
                    Err(err) => warn!("failed to start advertising: {}", err),
                }
                advertising.set(result.is_ok());
                callback(result)
            }),
        );
    }

    /// Stops advertising.
    pub fn stop_advertise(&self, callback: impl FnOnce(Result<()>) + 'static) {
        self.advertising.set(false);
        self.radio.stop_advertise(Box::new(move |result| {
            if let Err(err) = &result {
                warn!("failed to stop advertising: {}", err);
            }
            callback(result)
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAMESPACE: &str = "00112233445566778899";
    const INSTANCE: &str = "AABBCCDDEEFF";

    #[test]
    fn validates_identity() {
        assert!(EddystoneUid::new(NAMESPACE, INSTANCE).is_ok());

        let err = EddystoneUid::new("0011223344556677889", INSTANCE).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert_eq!(err.message(), "Invalid namespace, must be 10 hex bytes");

        let err = EddystoneUid::new(NAMESPACE, "aabbccddeeff").unwrap_err();
        assert_eq!(err.message(), "Invalid instance, must be 6 hex bytes");

        assert!(EddystoneUid::new("0011223344556677889G", INSTANCE).is_err());
        assert!(EddystoneUid::new(NAMESPACE, "AABBCCDDEEFF00").is_err());
    }

    #[test]
    fn service_data_layout() {
        let uid = EddystoneUid::new(NAMESPACE, INSTANCE).unwrap();
        let data = uid.service_data(DEFAULT_TX_POWER_LEVEL);
        assert_eq!(data.len(), 18);
        assert_eq!(&data[..2], &[0x00, 0xe6]);
        assert_eq!(&data[2..12], uid.namespace());
        assert_eq!(&data[12..], &[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
    }

    #[test]
    fn settings_publish_base64_service_data() {
        let uid = EddystoneUid::new(NAMESPACE, INSTANCE).unwrap();
        let settings = uid.settings(-26);
        let key = "0000FEAA-0000-1000-8000-00805F9B34FB";
        assert_eq!(settings.broadcast_data.service_uuids, [key]);
        assert_eq!(settings.broadcast_data, settings.scan_response_data);
        assert_eq!(settings.tx_power_level, -26);

        let encoded = &settings.broadcast_data.service_data[key];
        assert_eq!(codec::base64_decode(encoded).unwrap(), uid.service_data(-26));
    }
}
