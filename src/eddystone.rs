//! Eddystone frame decoding.
//!
//! An Eddystone beacon advertises its frames as service data under the [`EDDYSTONE`] service UUID. The first byte
//! of the service data identifies the frame type; see the
//! [Eddystone protocol specification](https://github.com/google/eddystone/blob/master/protocol-specification.md).
//!
//! ```
//! use eddystone_ble::eddystone::{self, EddystoneFrame};
//!
//! let frame = eddystone::decode(&[0x10, 0xeb, 0x01, b'e', b'x', 0x07]).unwrap();
//! assert!(matches!(frame, EddystoneFrame::Url(ref url) if url.url == "https://www.ex.com"));
//! ```

use crate::btuuid::services::EDDYSTONE;
use crate::codec;
use crate::error::{FrameError, FrameKind};
use crate::AdvertisementData;

const UID_MIN_LEN: usize = 18;
const EID_MIN_LEN: usize = 10;
const URL_MIN_LEN: usize = 4;
const TLM_LEN: usize = 14;

const TLM_VERSION: u8 = 0x00;
const TEMPERATURE_UNKNOWN: u16 = 0x8000;

const URL_SCHEMES: [&str; 4] = ["http://www.", "https://www.", "http://", "https://"];

const URL_SUFFIXES: [&str; 14] = [
    ".com/", ".org/", ".edu/", ".net/", ".info/", ".biz/", ".gov/", ".com", ".org", ".edu", ".net", ".info", ".biz",
    ".gov",
];

/// A decoded Eddystone frame
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EddystoneFrame {
    /// Eddystone-UID
    Uid(UidFrame),
    /// Eddystone-EID
    Eid(EidFrame),
    /// Eddystone-URL
    Url(UrlFrame),
    /// Eddystone-TLM
    Tlm(TlmFrame),
}

/// An Eddystone-UID frame: a static 16-byte beacon identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UidFrame {
    /// Calibrated tx power at 0 m, in dBm
    pub tx_power: i8,
    /// 10-byte namespace identifier
    pub namespace: [u8; 10],
    /// 6-byte instance identifier
    pub instance: [u8; 6],
}

/// An Eddystone-EID frame: a rotating 8-byte ephemeral identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EidFrame {
    /// Calibrated tx power at 0 m, in dBm
    pub tx_power: i8,
    /// 8-byte ephemeral identifier
    pub ephemeral_id: [u8; 8],
}

/// An Eddystone-URL frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UrlFrame {
    /// Calibrated tx power at 0 m, in dBm
    pub tx_power: i8,
    /// The expanded URL
    pub url: String,
}

/// An unencrypted Eddystone-TLM frame.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TlmFrame {
    /// Battery voltage in millivolts
    pub voltage: u16,
    /// Beacon temperature
    pub temperature: Temperature,
    /// Advertising PDUs sent since power-up or reboot
    pub adv_cnt: u32,
    /// Time since power-up or reboot, in 0.1 s units
    pub dsec_cnt: u32,
}

/// Beacon temperature as reported in a TLM frame.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Temperature {
    /// The beacon has no thermometer
    Unknown,
    /// Degrees Celsius
    Celsius(f64),
}

impl Temperature {
    /// Decodes the signed 8.8 fixed-point representation used on the wire, with `0x8000` meaning unknown.
    pub fn from_fixed_point(raw: u16) -> Self {
        if raw == TEMPERATURE_UNKNOWN {
            Temperature::Unknown
        } else {
            Temperature::Celsius(f64::from(raw as i16) / 256.0)
        }
    }

    /// Returns the temperature in degrees Celsius, if known.
    pub fn celsius(&self) -> Option<f64> {
        match self {
            Temperature::Unknown => None,
            Temperature::Celsius(c) => Some(*c),
        }
    }
}

impl EddystoneFrame {
    /// The frame type
    pub fn kind(&self) -> FrameKind {
        match self {
            EddystoneFrame::Uid(_) => FrameKind::Uid,
            EddystoneFrame::Eid(_) => FrameKind::Eid,
            EddystoneFrame::Url(_) => FrameKind::Url,
            EddystoneFrame::Tlm(_) => FrameKind::Tlm,
        }
    }

    /// The calibrated tx power, for frame types that carry one.
    pub fn tx_power(&self) -> Option<i8> {
        match self {
            EddystoneFrame::Uid(f) => Some(f.tx_power),
            EddystoneFrame::Eid(f) => Some(f.tx_power),
            EddystoneFrame::Url(f) => Some(f.tx_power),
            EddystoneFrame::Tlm(_) => None,
        }
    }

    /// Decodes the Eddystone service data carried by an advertisement, if it has any.
    pub fn from_advertisement(adv: &AdvertisementData) -> Option<Result<Self, FrameError>> {
        adv.service_data.get(&EDDYSTONE).map(|data| decode(data))
    }
}

/// Decodes one Eddystone frame from the service data published under the Eddystone service UUID.
///
/// [`FrameError::Empty`] and [`FrameError::UnknownFrameType`] mean the data is not an Eddystone frame; every other
/// error is a recognized frame that failed validation.
pub fn decode(data: &[u8]) -> Result<EddystoneFrame, FrameError> {
    let Some(&type_byte) = data.first() else {
        return Err(FrameError::Empty);
    };
    match FrameKind::from_type_byte(type_byte) {
        Some(FrameKind::Uid) => decode_uid(data).map(EddystoneFrame::Uid),
        Some(FrameKind::Eid) => decode_eid(data).map(EddystoneFrame::Eid),
        Some(FrameKind::Url) => decode_url(data).map(EddystoneFrame::Url),
        Some(FrameKind::Tlm) => decode_tlm(data).map(EddystoneFrame::Tlm),
        None => Err(FrameError::UnknownFrameType(type_byte)),
    }
}

fn check_min_len(kind: FrameKind, data: &[u8], min: usize) -> Result<(), FrameError> {
    if data.len() < min {
        Err(FrameError::Truncated { kind, len: data.len() })
    } else {
        Ok(())
    }
}

fn decode_uid(data: &[u8]) -> Result<UidFrame, FrameError> {
    check_min_len(FrameKind::Uid, data, UID_MIN_LEN)?;
    let mut namespace = [0; 10];
    namespace.copy_from_slice(&data[2..12]);
    let mut instance = [0; 6];
    instance.copy_from_slice(&data[12..18]);
    Ok(UidFrame {
        tx_power: codec::i8_at(data, 1),
        namespace,
        instance,
    })
}

fn decode_eid(data: &[u8]) -> Result<EidFrame, FrameError> {
    check_min_len(FrameKind::Eid, data, EID_MIN_LEN)?;
    let mut ephemeral_id = [0; 8];
    ephemeral_id.copy_from_slice(&data[2..10]);
    Ok(EidFrame {
        tx_power: codec::i8_at(data, 1),
        ephemeral_id,
    })
}

fn decode_url(data: &[u8]) -> Result<UrlFrame, FrameError> {
    check_min_len(FrameKind::Url, data, URL_MIN_LEN)?;
    let scheme = codec::u8_at(data, 2);
    let mut url = URL_SCHEMES
        .get(usize::from(scheme))
        .ok_or(FrameError::InvalidScheme(scheme))?
        .to_string();
    for &c in &data[3..] {
        match c {
            0..=13 => url.push_str(URL_SUFFIXES[usize::from(c)]),
            32..=126 => url.push(char::from(c)),
            _ => return Err(FrameError::InvalidCharacter(c)),
        }
    }
    Ok(UrlFrame {
        tx_power: codec::i8_at(data, 1),
        url,
    })
}

fn decode_tlm(data: &[u8]) -> Result<TlmFrame, FrameError> {
    check_min_len(FrameKind::Tlm, data, 2)?;
    let version = codec::u8_at(data, 1);
    if version != TLM_VERSION {
        return Err(FrameError::UnsupportedVersion(version));
    }
    if data.len() != TLM_LEN {
        return Err(FrameError::Truncated {
            kind: FrameKind::Tlm,
            len: data.len(),
        });
    }
    Ok(TlmFrame {
        voltage: codec::be_u16_at(data, 2),
        temperature: Temperature::from_fixed_point(codec::be_u16_at(data, 4)),
        adv_cnt: codec::be_u32_at(data, 6),
        dsec_cnt: codec::be_u32_at(data, 10),
    })
}
