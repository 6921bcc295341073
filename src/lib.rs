pub mod database;
pub mod container;
pub mod metadata;
pub mod pid;
pub mod crypto;
pub mod decrypt;
pub mod codec;
pub mod rewrite;
pub mod engine;
pub mod batch;
pub mod naming;
pub mod error;

#[cfg(test)]
mod testutil;

pub use container::{Container, Record, RecordKind};
pub use metadata::{Compression, Encryption, FormatMetadata};
pub use pid::{DeviceSerial, Pid};
pub use crypto::ContentKey;
pub use decrypt::{DecryptedRecord, KeystreamMode, RecordDecryptor};
pub use engine::{inspect, load_container, remove_drm, remove_drm_with, BookInfo, UnlockOptions, Unlocked};
pub use error::{DecodeFailure, DrmError, FormatError};
