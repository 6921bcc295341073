//! Emit the unlocked container.
//!
//! The output is a byte copy of the input with four edits: the encryption
//! field cleared, the voucher bytes zeroed, the DRM pointers reset, and the
//! decrypted text records spliced over their ciphertext. Record lengths never
//! change, so the record directory is reused as is.

use tracing::debug;

use crate::container::Container;
use crate::decrypt::DecryptedRecord;
use crate::error::DrmError;
use crate::metadata::{exth, FormatMetadata, DRM_FIELDS, ENCRYPTION_FIELD, NO_DRM_OFFSET};

#[derive(Debug, Clone, Default)]
pub struct RewriteOptions {
    /// Reset the clipping limit and text-to-speech EXTH flags.
    pub lift_restrictions: bool,
}

const CLIPPING_UNLIMITED: u32 = 100;
const TTS_ENABLED:        u32 = 0;

pub fn rebuild(
    container: &Container,
    records:   &[DecryptedRecord],
    meta:      &FormatMetadata,
    options:   &RewriteOptions,
) -> Result<Vec<u8>, DrmError> {
    let mut out = container.bytes().to_vec();
    let base = container.record(0)?.offset;

    // ── Record 0 ─────────────────────────────────────────────────────────────
    out[base + ENCRYPTION_FIELD.start..base + ENCRYPTION_FIELD.end].fill(0);

    if let Some(drm) = meta.drm() {
        if drm.is_present() {
            let vouchers = drm.range();
            out[base + vouchers.start..base + vouchers.end].fill(0);
        }
        let fields = &mut out[base + DRM_FIELDS.start..base + DRM_FIELDS.end];
        fields.fill(0);
        fields[..4].copy_from_slice(&NO_DRM_OFFSET.to_be_bytes());
    }

    if options.lift_restrictions {
        patch_exth(&mut out, base, meta, exth::tag::CLIPPING_LIMIT, CLIPPING_UNLIMITED);
        patch_exth(&mut out, base, meta, exth::tag::TTS_DISABLED, TTS_ENABLED);
    }

    // ── Text records ─────────────────────────────────────────────────────────
    for record in records {
        let slot = container.record(record.index)?;
        if slot.len != record.data.len() {
            return Err(DrmError::RecordLength {
                index:    record.index,
                expected: slot.len,
                actual:   record.data.len(),
            });
        }
        out[slot.range()].copy_from_slice(&record.data);
    }

    debug!(bytes = out.len(), records = records.len(), "rebuilt container");
    Ok(out)
}

/// Overwrite an EXTH value in place, keeping its stored width.
fn patch_exth(out: &mut [u8], base: usize, meta: &FormatMetadata, tag: u32, value: u32) {
    let Some(entry) = meta.exth.get(tag) else { return };
    let width = entry.data.len();
    if width == 0 || width > 4 {
        return;
    }
    let start = base + entry.offset;
    out[start..start + width].copy_from_slice(&value.to_be_bytes()[4 - width..]);
    debug!(tag, value, "patched EXTH restriction");
}
