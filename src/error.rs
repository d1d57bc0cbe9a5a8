use thiserror::Error;

use crate::device::MacAddress;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Why an advertisement from a registered device was dropped.
///
/// Traffic from unknown addresses is not an error; [`Dispatcher::handle`]
/// returns `Ok(None)` for it.
///
/// [`Dispatcher::handle`]: crate::Dispatcher::handle
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("payload truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("advertisement carries no BTHome service data")]
    NoMatchingRecord,

    #[error("unsupported BTHome version {0}")]
    UnsupportedVersion(u8),

    #[error("packet is encrypted but no bind key is configured")]
    MissingKey,

    #[error("plaintext packet from a device configured with a bind key")]
    Unencrypted,

    #[error("authentication tag did not verify")]
    AuthenticationFailed,

    #[error("counter {counter} is not newer than last accepted {last}")]
    ReplayOrDuplicate { counter: u32, last: u32 },

    #[error("object {0:#04x} has no known width")]
    UnknownTagWidth(u8),

    #[error("object {tag:#04x} declared {found} bytes, expected {expected}")]
    WidthMismatch { tag: u8, expected: usize, found: usize },

    #[error("payload of {len} bytes exceeds the CCM limit of {max}")]
    PayloadTooLong { len: usize, max: usize },
}

/// Problems with user supplied device configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid MAC address {0:?}")]
    InvalidAddress(String),

    #[error("invalid bind key: expected 32 hex characters")]
    InvalidBindKey,

    #[error("device {0} is already registered")]
    DuplicateAddress(MacAddress),
}
