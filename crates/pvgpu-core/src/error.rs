//! PV transport error types.

use std::fmt;

use crate::caps::PvCaps;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PvError {
    /// Shared page setup failed (allocation, address echo, mapping).
    Setup(&'static str),
    /// Host speaks a different protocol version.
    Version { major: u16, minor: u16 },
    /// Not enough free space on the command ring for the message.
    RingFull,
    /// Host did not complete `fence` in time; `reported` is the fence it
    /// last completed.
    Timeout { fence: u32, reported: u32 },
    /// Host completed the request with a non-zero status.
    Protocol(i32),
    /// Encoded payload exceeds the message limit.
    EncodingTooLarge { words: usize, max: usize },
    /// Operation needs a capability that was not negotiated.
    NotNegotiated(PvCaps),
    /// Engine index outside the shared page slot table.
    InvalidEngine(usize),
    /// Message or argument block could not be decoded.
    Malformed(&'static str),
    /// Invalid configuration.
    Config(&'static str),
    /// OS error with errno.
    Os(i32),
}

impl fmt::Display for PvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Setup(what) => write!(f, "shared page setup failed: {}", what),
            Self::Version { major, minor } => {
                write!(f, "unsupported PV version {}.{}", major, minor)
            }
            Self::RingFull => write!(f, "command ring full"),
            Self::Timeout { fence, reported } => {
                write!(f, "fence {} timed out; reported fence={}", fence, reported)
            }
            Self::Protocol(status) => write!(f, "host returned status {}", status),
            Self::EncodingTooLarge { words, max } => {
                write!(f, "encoding too large: {} words (max {})", words, max)
            }
            Self::NotNegotiated(caps) => write!(f, "capability {} not negotiated", caps),
            Self::InvalidEngine(id) => write!(f, "invalid engine {}", id),
            Self::Malformed(what) => write!(f, "malformed message: {}", what),
            Self::Config(what) => write!(f, "invalid config: {}", what),
            Self::Os(e) => write!(f, "OS error: errno {}", e),
        }
    }
}

impl std::error::Error for PvError {}

impl From<std::io::Error> for PvError {
    fn from(e: std::io::Error) -> Self {
        Self::Os(e.raw_os_error().unwrap_or(0))
    }
}

pub type Result<T> = std::result::Result<T, PvError>;
