//! Many books, one serial.
//!
//! Books share no state, so with the `parallel` feature each one is unlocked
//! on the Rayon pool. Without it the loop runs sequentially. Either way the
//! results come back in input order and one failing book never affects the
//! others.

use crate::engine::{load_container, remove_drm_with, UnlockOptions, Unlocked};
use crate::error::DrmError;

fn unlock_one(bytes: &[u8], serial: &str, options: &UnlockOptions) -> Result<Unlocked, DrmError> {
    let container = load_container(bytes)?;
    remove_drm_with(&container, serial, options)
}

/// Unlock every book in `books` with `serial`; one result per book, in order.
pub fn unlock_all(books: &[&[u8]], serial: &str, options: &UnlockOptions) -> Vec<Result<Unlocked, DrmError>> {
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;

        books
            .par_iter()
            .map(|bytes| unlock_one(bytes, serial, options))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        books
            .iter()
            .map(|bytes| unlock_one(bytes, serial, options))
            .collect()
    }
}
