//! Shared time helper (SPEC_FULL.md §0). A thin wrapper around
//! [`Instant::now`] so every crate reads the clock through one seam instead
//! of calling `std::time::Instant::now()` ad hoc at each call site.

use std::time::Instant;

pub fn now() -> Instant {
    Instant::now()
}
