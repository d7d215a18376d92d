// Allow uppercase acronyms for industry-standard terms like SCSI, SMR, ZBC
#![allow(clippy::upper_case_acronyms)]

//! A SCSI Zoned Block Device target implementing the Zone Domains / Zone
//! Realms command-set family, backed by a single plain file.
//!
//! The crate is loaded into a user-space SCSI target runtime as a command
//! handler: the host delivers CDBs with scatter-gather buffers
//! ([`scsi::Request`]) and receives status plus sense data
//! ([`scsi::CmdOutput`]). A standalone CLI (`zdtarget`) formats, inspects
//! and exercises backing files without a host runtime attached.

pub mod activation;
pub mod config;
pub mod device;
pub mod handlers;
pub mod meta;
pub mod profile;
pub mod realm;
pub mod scsi;
pub mod zone;

// Re-export the main entry points for convenience
pub use config::DeviceConfig;
pub use device::ZdDevice;
pub use profile::{DeviceModel, DeviceType};

use thiserror::Error;

/// Setup-time errors: configuration, geometry, backing-file and metadata
/// problems. Command-time failures never surface here — they become SCSI
/// sense data instead.
#[derive(Debug, Error)]
pub enum ZdError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("geometry error: {0}")]
    Geometry(#[from] meta::format::GeometryError),

    #[error("backing store error: {0}")]
    Meta(#[from] meta::MetaError),

    #[error("metadata validation failed: {0}")]
    Validate(#[from] meta::validate::ValidateError),

    #[error("backing file has no valid metadata")]
    NotFormatted,
}

pub type ZdResult<T> = Result<T, ZdError>;
