//! Fuzz testing for the user-facing parsers.
//!
//! Query parameters, flags and uploaded file names all reach these functions
//! unfiltered. They must never panic, and their output must keep the
//! invariants the server relies on.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! cargo +nightly install cargo-fuzz
//! cargo +nightly fuzz run fuzz_parsers -- -max_total_time=60
//! ```

#![no_main]

use libfuzzer_sys::fuzz_target;
use webprobe::handlers::sanitize_filename;
use webprobe::listener::BandwidthLimit;
use webprobe::units::{format_bytes, parse_bytes, parse_duration};

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(bytes) = parse_bytes(s) {
        let _ = format_bytes(bytes);
    }
    let _ = parse_duration(s);
    let _ = s.parse::<BandwidthLimit>();

    let name = sanitize_filename(s);
    assert!(!name.is_empty());
    assert!(name.len() <= 255);
    assert!(!name.contains('/'));
    assert!(!name.contains('\\'));
    assert!(!name.starts_with(['.', '_', ' ']));
    assert!(!name.ends_with(['.', '_', ' ']));
});
