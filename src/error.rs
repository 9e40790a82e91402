//! Eddystone-ble errors

/// The error type for beacon decoding and BLE session operations
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    message: String,
}

impl Error {
    pub(crate) fn new(
        kind: ErrorKind,
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
        message: impl Into<String>,
    ) -> Self {
        Error {
            kind,
            source,
            message: message.into(),
        }
    }

    /// Creates an error reported by the radio driver.
    ///
    /// Radio drivers surface their failures as opaque strings; the message is passed through to the caller unchanged.
    pub fn radio(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::Other, None, message)
    }

    /// Returns the corresponding [ErrorKind] for this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the message for this error.
    ///
    /// For lookup failures this is the UUID or composite key that could not be resolved.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.message.is_empty(), &self.source) {
            (true, None) => write!(f, "{}", &self.kind),
            (false, None) => write!(f, "{}: {}", &self.kind, &self.message),
            (true, Some(err)) => write!(f, "{}: {}", &self.kind, err),
            (false, Some(err)) => write!(f, "{}: {} ({})", &self.kind, &self.message, err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|x| {
            let x: &(dyn std::error::Error + 'static) = &**x;
            x
        })
    }
}

/// A list of general categories of error.
#[non_exhaustive]
#[derive(Debug, displaydoc::Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// advertisement truncated
    Truncated,
    /// invalid Eddystone frame: {0}
    Frame(FrameError),
    /// the radio is already scanning
    AlreadyScanning,
    /// the radio is already advertising
    AlreadyAdvertising,
    /// the device is already connected
    AlreadyConnected,
    /// the device was disconnected
    Disconnected,
    /// the device isn't connected
    NotConnected,
    /// not ready
    NotReady,
    /// service not found
    ServiceNotFound,
    /// characteristic not found
    CharacteristicNotFound,
    /// descriptor not found
    DescriptorNotFound,
    /// device not found
    DeviceNotFound,
    /// invalid parameter
    InvalidParameter,
    /// an internal error has occured
    Internal,
    /// radio error
    Other,
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error {
            kind,
            source: None,
            message: String::new(),
        }
    }
}

impl From<FrameError> for Error {
    fn from(err: FrameError) -> Self {
        ErrorKind::Frame(err).into()
    }
}

/// Eddystone frame types, identified by the first byte of the service data.
#[derive(Debug, displaydoc::Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FrameKind {
    /// UID
    Uid,
    /// EID
    Eid,
    /// URL
    Url,
    /// TLM
    Tlm,
}

impl FrameKind {
    /// The frame type byte
    pub const fn type_byte(self) -> u8 {
        match self {
            FrameKind::Uid => 0x00,
            FrameKind::Url => 0x10,
            FrameKind::Tlm => 0x20,
            FrameKind::Eid => 0x30,
        }
    }

    /// Looks up the frame kind for a frame type byte.
    pub const fn from_type_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(FrameKind::Uid),
            0x10 => Some(FrameKind::Url),
            0x20 => Some(FrameKind::Tlm),
            0x30 => Some(FrameKind::Eid),
            _ => None,
        }
    }
}

/// Eddystone frame decoding errors.
///
/// [`FrameError::Empty`] and [`FrameError::UnknownFrameType`] mean the service data is not an Eddystone frame at all;
/// the remaining variants describe a recognized frame that failed validation.
#[derive(Debug, displaydoc::Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameError {
    /// empty service data
    Empty,
    /// unknown frame type: {0:#04x}
    UnknownFrameType(u8),
    /// {kind} frame: invalid byteLength: {len}
    Truncated {
        /// The frame being decoded
        kind: FrameKind,
        /// The length of the service data
        len: usize,
    },
    /// URL frame: invalid prefix: {0}
    InvalidScheme(u8),
    /// URL frame: invalid character: {0}
    InvalidCharacter(u8),
    /// TLM frame: unknown version: {0}
    UnsupportedVersion(u8),
}

impl FrameError {
    /// Returns `true` if the service data was recognized as an Eddystone frame.
    pub fn is_eddystone(&self) -> bool {
        !matches!(self, FrameError::Empty | FrameError::UnknownFrameType(_))
    }
}

impl std::error::Error for FrameError {}
