//! Error taxonomy for the ROHC core (§7).
//!
//! Every fallible entry point returns `Result<T>` instead of panicking. A
//! malformed or hostile input (bad CID, truncated header, SDVL overflow)
//! is ordinary network behavior, not a library bug, so it is always
//! reported through this enum rather than `unwrap`/`expect`/`assert`.

use thiserror::Error;

/// Crate-local result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// A ROHC core error (§7).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Truncated header, bad IP version, SDVL overflow, or any other
    /// structurally invalid input. The offending context, if any, is left
    /// unchanged.
    #[error("malformed input: {0}")]
    Malformed(String),

    /// An IR packet named a profile ID not present in the registry.
    #[error("unknown profile id {0:#06x}")]
    UnknownProfile(u16),

    /// A non-IR packet arrived for a CID with no established context.
    #[error("no context for CID {0}")]
    NoContext(u16),

    /// The CRC carried in a packet did not match the CRC recomputed over
    /// the reconstructed header.
    #[error("CRC mismatch for CID {0}")]
    CrcMismatch(u16),

    /// The caller-supplied output buffer was too small to hold the result.
    #[error("output buffer too small: need {need}, have {have}")]
    OutputTooSmall {
        /// Bytes required.
        need: usize,
        /// Bytes actually available.
        have: usize,
    },

    /// The context table was full when a new CID was needed, and no LRU
    /// entry was evictable (e.g. because it is itself in active use).
    #[error("no free context slot (max_cid exhausted)")]
    TransientResource,
}

impl Error {
    /// Build a [`Error::Malformed`] from a `Display`-able reason.
    pub fn malformed(reason: impl std::fmt::Display) -> Self {
        Error::Malformed(reason.to_string())
    }
}
