#![deny(
    missing_docs,
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications
)]

//! HTTPS Certificate Expiry
//!
//! Checks how many days are left before the TLS certificates of many domain
//! names expire, at most a fixed number of handshakes at a time.

pub use outcome::ProbeOutcome;
pub use probe::{days_until, Probe, ProbeError, TlsProbe, DEFAULT_PORT};
pub use result_map::ResultMap;
pub use runner::{BatchError, BatchRunner, DEFAULT_CONCURRENCY};

mod outcome;
mod probe;
mod result_map;
mod runner;
