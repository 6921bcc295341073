//! High-level unlock API, the primary embedding surface.
//!
//! ```no_run
//! use unmobi::engine::{load_container, remove_drm};
//!
//! let bytes = std::fs::read("book.azw")?;
//! let container = load_container(&bytes)?;
//! let unlocked = remove_drm(&container, "B001A1B2C3D4E5F6")?;
//! std::fs::write("book-nodrm.azw", &unlocked.data)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::codec::validate_text_length;
use crate::container::Container;
use crate::crypto::voucher;
use crate::database::DatabaseKind;
use crate::decrypt::{decrypt_records, KeystreamMode};
use crate::error::{DrmError, FormatError};
use crate::metadata::{exth, Compression, DrmBlock, Encryption, FormatMetadata};
use crate::pid::{self, DeviceSerial, Pid};
use crate::rewrite::{rebuild, RewriteOptions};

/// First bytes of record 1 in a Print Replica (PDF-backed) book.
const PRINT_REPLICA_MAGIC: &[u8; 4] = b"%MOP";

// ── UnlockOptions ─────────────────────────────────────────────────────────────

/// Configuration for [`remove_drm_with`].
#[derive(Debug, Clone)]
pub struct UnlockOptions {
    pub keystream:         KeystreamMode,
    /// Decompress the decrypted text and check it against the declared length.
    pub verify_text:       bool,
    pub lift_restrictions: bool,
    /// Tried after the PIDs derived from the serial.
    pub extra_pids:        Vec<Pid>,
}

impl Default for UnlockOptions {
    fn default() -> Self {
        Self {
            keystream:         KeystreamMode::Cumulative,
            verify_text:       true,
            lift_restrictions: false,
            extra_pids:        Vec::new(),
        }
    }
}

// ── Unlocked ──────────────────────────────────────────────────────────────────

/// A successfully unlocked book.
#[derive(Debug, Clone)]
pub struct Unlocked {
    pub title:         String,
    /// The complete DRM-free container, same length as the input.
    pub data:          Vec<u8>,
    /// PID whose voucher held the content key.
    pub pid:           Pid,
    pub print_replica: bool,
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

pub fn load_container(bytes: &[u8]) -> Result<Container<'_>, FormatError> {
    let container = Container::parse(bytes)?;
    debug!(
        kind = ?container.kind(),
        records = container.record_count(),
        bytes = container.len(),
        "loaded container"
    );
    Ok(container)
}

pub fn remove_drm(container: &Container, serial: &str) -> Result<Unlocked, DrmError> {
    remove_drm_with(container, serial, &UnlockOptions::default())
}

pub fn remove_drm_with(
    container: &Container,
    serial:    &str,
    options:   &UnlockOptions,
) -> Result<Unlocked, DrmError> {
    let serial = DeviceSerial::parse(serial)?;
    let meta = FormatMetadata::extract(container)?;
    meta.require_pid_scheme()?;
    let title = meta.title(container);

    let seed = meta.exth.pid_seed();
    let mut candidates = pid::candidates(&serial, seed.as_ref());
    for extra in &options.extra_pids {
        if !candidates.contains(extra) {
            candidates.push(*extra);
        }
    }

    let (key, pid) = voucher::resolve(container, &meta, &candidates)?;
    let records = decrypt_records(container, &meta, &key, options.keystream)?;
    if options.verify_text {
        validate_text_length(container, &meta, &records)?;
    }
    let print_replica = records.first().is_some_and(|r| r.data.starts_with(PRINT_REPLICA_MAGIC));

    let rewrite = RewriteOptions { lift_restrictions: options.lift_restrictions };
    let data = rebuild(container, &records, &meta, &rewrite)?;

    info!(%title, %pid, print_replica, "removed DRM");
    Ok(Unlocked { title, data, pid, print_replica })
}

// ── Inspection ────────────────────────────────────────────────────────────────

/// Serializable summary of a book's headers, for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct BookInfo {
    pub title:          String,
    pub database_name:  String,
    pub kind:           DatabaseKind,
    pub created:        Option<DateTime<Utc>>,
    pub modified:       Option<DateTime<Utc>>,
    pub record_count:   usize,
    pub compression:    Compression,
    pub encryption:     Encryption,
    pub text_length:    u32,
    pub text_records:   u16,
    pub format_version: Option<u32>,
    pub codepage:       u32,
    pub author:         Option<String>,
    pub publisher:      Option<String>,
    pub drm:            Option<DrmBlock>,
    /// EXTH 209 in hex; present when the book is bound to a book PID.
    pub tamper_keys:    Option<String>,
    pub exth_tags:      Vec<u32>,
}

pub fn inspect(container: &Container) -> Result<BookInfo, DrmError> {
    let meta = FormatMetadata::extract(container)?;
    let header = &container.header;
    Ok(BookInfo {
        title:          meta.title(container),
        database_name:  header.name(),
        kind:           header.kind,
        created:        header.created_at(),
        modified:       header.modified_at(),
        record_count:   container.record_count(),
        compression:    meta.compression,
        encryption:     meta.encryption,
        text_length:    meta.text_length,
        text_records:   meta.text_record_count,
        format_version: meta.mobi.as_ref().map(|m| m.format_version),
        codepage:       meta.codepage(),
        author:         meta.exth_string(exth::tag::AUTHOR),
        publisher:      meta.exth_string(exth::tag::PUBLISHER),
        drm:            meta.drm().filter(DrmBlock::is_present),
        tamper_keys:    meta.exth.get(exth::tag::TAMPER_KEYS).map(|e| hex::encode(&e.data)),
        exth_tags:      meta.exth.tags(),
    })
}
