//! Mirrors OpenGApps release artifacts to local storage and/or a remote
//! upload endpoint, verifying each artifact against its published MD5.

pub mod core;
pub mod transport;

pub use crate::core::config::{Config, GappsConfig, QueueConfig};
pub use crate::core::error::{Error, ErrorKind, ParseError, Result, TransferError};
pub use crate::core::model::{Android, Package, Platform, ReleaseAsset, Variant};
pub use crate::core::parser::{form_package, parse_asset, parse_checksum_sidecar, parse_package_parts, NameFormat};
pub use crate::core::queue::DownloadQueue;
