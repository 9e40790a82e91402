use tracing::trace;
use uuid::Uuid;

use crate::codec;
use crate::error::ErrorKind;
use crate::{AdvertisementData, BluetoothUuidExt, Error, Result};

const INCOMPLETE_16BIT_SERVICES: u8 = 0x02;
const COMPLETE_16BIT_SERVICES: u8 = 0x03;
const INCOMPLETE_32BIT_SERVICES: u8 = 0x04;
const COMPLETE_32BIT_SERVICES: u8 = 0x05;
const INCOMPLETE_128BIT_SERVICES: u8 = 0x06;
const COMPLETE_128BIT_SERVICES: u8 = 0x07;
const SHORTENED_LOCAL_NAME: u8 = 0x08;
const COMPLETE_LOCAL_NAME: u8 = 0x09;
const TX_POWER_LEVEL: u8 = 0x0a;
const SERVICE_DATA_16BIT: u8 = 0x16;
const SERVICE_DATA_32BIT: u8 = 0x20;
const SERVICE_DATA_128BIT: u8 = 0x21;
const MANUFACTURER_SPECIFIC_DATA: u8 = 0xff;

impl AdvertisementData {
    /// Parses a GAP scan record (Bluetooth Core Specification, Vol 3, Part C, §11).
    ///
    /// The record is a list of structures, each a length octet followed by a type octet and `length - 1` data octets.
    /// A zero length octet ends the record. Structures of unknown type, and known structures whose data is malformed,
    /// are skipped. A structure whose declared length runs past the end of the record makes the whole record
    /// unusable and fails with [`ErrorKind::Truncated`].
    pub fn from_scan_record(record: &[u8]) -> Result<Self> {
        let mut adv = AdvertisementData::default();
        let mut pos = 0;
        while pos < record.len() {
            let len = usize::from(codec::u8_at(record, pos));
            pos += 1;
            if len == 0 {
                break;
            }

            let end = pos + len;
            if end > record.len() {
                return Err(Error::new(
                    ErrorKind::Truncated,
                    None,
                    format!(
                        "structure at offset {} declares {} bytes but only {} remain",
                        pos - 1,
                        len,
                        record.len() - pos
                    ),
                ));
            }

            adv.apply_structure(codec::u8_at(record, pos), &record[pos + 1..end]);
            pos = end;
        }
        Ok(adv)
    }

    /// Parses a Base64-encoded scan record, as delivered by platform bindings that cannot pass raw bytes.
    pub fn from_base64_scan_record(record: &str) -> Result<Self> {
        Self::from_scan_record(&codec::base64_decode(record)?)
    }

    fn apply_structure(&mut self, ad_type: u8, data: &[u8]) {
        match ad_type {
            INCOMPLETE_16BIT_SERVICES | COMPLETE_16BIT_SERVICES => self.push_services(ad_type, data, 2),
            INCOMPLETE_32BIT_SERVICES | COMPLETE_32BIT_SERVICES => self.push_services(ad_type, data, 4),
            INCOMPLETE_128BIT_SERVICES | COMPLETE_128BIT_SERVICES => self.push_services(ad_type, data, 16),
            SHORTENED_LOCAL_NAME | COMPLETE_LOCAL_NAME => {
                self.local_name = Some(String::from_utf8_lossy(data).into_owned());
            }
            TX_POWER_LEVEL => match data.first() {
                Some(_) => self.tx_power_level = Some(codec::i8_at(data, 0)),
                None => trace!("skipping empty tx power level"),
            },
            SERVICE_DATA_16BIT => self.insert_service_data(ad_type, data, 2),
            SERVICE_DATA_32BIT => self.insert_service_data(ad_type, data, 4),
            SERVICE_DATA_128BIT => self.insert_service_data(ad_type, data, 16),
            MANUFACTURER_SPECIFIC_DATA => self.manufacturer_data = Some(data.to_vec()),
            _ => trace!("skipping advertisement structure of type {:#04x}", ad_type),
        }
    }

    fn push_services(&mut self, ad_type: u8, data: &[u8], width: usize) {
        if data.len() % width != 0 {
            trace!(
                "skipping service list of type {:#04x}: {} bytes is not a multiple of {}",
                ad_type,
                data.len(),
                width
            );
            return;
        }
        self.services
            .extend(data.chunks_exact(width).filter_map(Uuid::from_gap_bytes));
    }

    fn insert_service_data(&mut self, ad_type: u8, data: &[u8], width: usize) {
        if data.len() < width {
            trace!("skipping service data of type {:#04x}: {} bytes", ad_type, data.len());
            return;
        }
        let (uuid, value) = data.split_at(width);
        if let Some(uuid) = Uuid::from_gap_bytes(uuid) {
            self.service_data.insert(uuid, value.to_vec());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btuuid::services;

    #[test]
    fn expands_short_service_uuids() {
        let record = [0x03, 0x03, 0xaa, 0xfe, 0x05, 0x05, 0x78, 0x56, 0x34, 0x12, 0x00];
        let adv = AdvertisementData::from_scan_record(&record).unwrap();
        let services: Vec<String> = adv.services.iter().map(|u| u.to_string()).collect();
        assert_eq!(
            services,
            [
                "0000feaa-0000-1000-8000-00805f9b34fb",
                "12345678-0000-1000-8000-00805f9b34fb"
            ]
        );
    }

    #[test]
    fn keeps_service_order_and_duplicates() {
        let record = [0x05, 0x02, 0x0f, 0x18, 0xaa, 0xfe, 0x03, 0x03, 0x0f, 0x18];
        let adv = AdvertisementData::from_scan_record(&record).unwrap();
        assert_eq!(
            adv.services,
            [services::BATTERY, services::EDDYSTONE, services::BATTERY]
        );
    }

    #[test]
    fn reads_128bit_uuids_in_record_order() {
        let mut record = vec![0x11, 0x07];
        record.extend(0x00u8..0x10);
        let adv = AdvertisementData::from_scan_record(&record).unwrap();
        assert_eq!(adv.services.len(), 1);
        assert_eq!(adv.services[0].to_string(), "00010203-0405-0607-0809-0a0b0c0d0e0f");
    }

    #[test]
    fn reads_name_and_tx_power() {
        let record = [0x05, 0x09, b'B', b'e', b'a', b'n', 0x02, 0x0a, 0xf4];
        let adv = AdvertisementData::from_scan_record(&record).unwrap();
        assert_eq!(adv.local_name.as_deref(), Some("Bean"));
        assert_eq!(adv.tx_power_level, Some(-12));
        assert!(adv.services.is_empty());
        assert!(adv.service_data.is_empty());
        assert_eq!(adv.manufacturer_data, None);
        assert_eq!(adv.is_connectable, None);
    }

    #[test]
    fn reads_service_data_of_every_width() {
        let mut record = vec![
            0x06, 0x16, 0xaa, 0xfe, 0x10, 0xee, 0x02, // 16-bit
            0x06, 0x20, 0x78, 0x56, 0x34, 0x12, 0x01, // 32-bit
            0x12, 0x21,
        ];
        record.extend(0x00u8..0x10);
        record.push(0x7f);
        let adv = AdvertisementData::from_scan_record(&record).unwrap();
        assert_eq!(adv.service_data[&services::EDDYSTONE], vec![0x10, 0xee, 0x02]);
        assert_eq!(adv.service_data[&Uuid::from_u32(0x12345678)], vec![0x01]);
        let long = Uuid::parse_str("00010203-0405-0607-0809-0a0b0c0d0e0f").unwrap();
        assert_eq!(adv.service_data[&long], vec![0x7f]);
    }

    #[test]
    fn later_service_data_overwrites() {
        let record = [0x04, 0x16, 0xaa, 0xfe, 0x01, 0x04, 0x16, 0xaa, 0xfe, 0x02];
        let adv = AdvertisementData::from_scan_record(&record).unwrap();
        assert_eq!(adv.service_data.len(), 1);
        assert_eq!(adv.service_data[&services::EDDYSTONE], vec![0x02]);
    }

    #[test]
    fn keeps_raw_manufacturer_data() {
        let record = [0x05, 0xff, 0x4c, 0x00, 0x02, 0x15];
        let adv = AdvertisementData::from_scan_record(&record).unwrap();
        assert_eq!(adv.manufacturer_data, Some(vec![0x4c, 0x00, 0x02, 0x15]));
        let manufacturer = adv.manufacturer().unwrap();
        assert_eq!(manufacturer.company_id, 0x004c);
        assert_eq!(manufacturer.data, vec![0x02, 0x15]);
    }

    #[test]
    fn skips_unknown_and_malformed_structures() {
        let record = [
            0x02, 0x01, 0x06, // flags, not parsed
            0x04, 0x03, 0xaa, 0xfe, 0x01, // odd-length 16-bit list
            0x02, 0x16, 0xaa, // service data too short for its UUID
            0x01, 0x0a, // tx power without a value
            0x03, 0x03, 0x0f, 0x18,
        ];
        let adv = AdvertisementData::from_scan_record(&record).unwrap();
        assert_eq!(adv.services, [services::BATTERY]);
        assert!(adv.service_data.is_empty());
        assert_eq!(adv.tx_power_level, None);
    }

    #[test]
    fn zero_length_ends_the_record() {
        let record = [0x03, 0x03, 0xaa, 0xfe, 0x00, 0x03, 0x03, 0x0f, 0x18];
        let adv = AdvertisementData::from_scan_record(&record).unwrap();
        assert_eq!(adv.services, [services::EDDYSTONE]);
    }

    #[test]
    fn overrun_aborts_the_parse() {
        let record = [0x03, 0x03, 0xaa, 0xfe, 0x09, 0x09, b'x'];
        let err = AdvertisementData::from_scan_record(&record).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Truncated);
    }

    #[test]
    fn parses_base64_records() {
        // 0x03 0x03 0xaa 0xfe
        let adv = AdvertisementData::from_base64_scan_record("AwOq/g==").unwrap();
        assert_eq!(adv.services, [services::EDDYSTONE]);
    }
}
