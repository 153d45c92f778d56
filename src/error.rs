use thiserror::Error;

/// Failures the router core can report back to a caller. Most routing
/// outcomes (rejected, released, accepted) are delivery dispositions, not
/// errors — see [`crate::delivery::DeliveryOutcome`]. Only conditions that
/// prevent a requested operation from completing land here.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RouterError {
    #[error("mask-bit table exhausted: no free inter-router link slot")]
    MaskBitsExhausted,

    #[error("router capability present on a non-inter-router connection")]
    NonRouterConnection,

    #[error("outgoing endpoint link source address is not mobile-class")]
    NonMobileSource,

    #[error("outgoing endpoint link has no source address and is not dynamic")]
    MissingDynamicSource,

    #[error("invalid router configuration: {0}")]
    InvalidConfig(String),

    #[error("malformed configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),
}
