//! Human-readable values for log fields

use std::time::Duration;

/// Format a duration as `us`, `ms` or `s` depending on magnitude
pub fn duration(d: Duration) -> String {
    if d < Duration::from_millis(1) {
        format!("{}us", d.as_micros())
    } else if d < Duration::from_secs(1) {
        format!("{}ms", d.as_millis())
    } else {
        format!("{:.2}s", d.as_secs_f64())
    }
}

/// Format the bit rate of `bytes` moved in `elapsed`
pub fn bandwidth(bytes: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return "-".to_string();
    }
    let bits = (bytes as f64 * 8.0) / secs;
    if bits < 1_000_000.0 {
        format!("{:.0}kb/s", bits / 1_000.0)
    } else if bits < 1_000_000_000.0 {
        format!("{:.2}Mb/s", bits / 1_000_000.0)
    } else {
        format!("{:.2}Gb/s", bits / 1_000_000_000.0)
    }
}

/// Format a byte count with binary units
pub fn size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;

    match bytes {
        b if b < KIB => format!("{b}B"),
        b if b < MIB => format!("{}kB", b / KIB),
        b if b < 100 * MIB => format!("{:.1}MB", b as f64 / MIB as f64),
        b if b < GIB => format!("{}MB", b / MIB),
        b => format!("{:.2}GB", b as f64 / GIB as f64),
    }
}
