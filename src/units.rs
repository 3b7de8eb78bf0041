/// Converts a Kubernetes CPU quantity string into cores.
///
/// Accepts nanocore (`"1500000n"`), millicore (`"250m"`) and plain core
/// (`"2"`, `"0.5"`) notation. Unparseable input maps to `0.0` so a single
/// malformed sample never poisons an aggregation pass.
pub fn normalize_cpu_cores(quantity: &str) -> f64 {
    let quantity = quantity.trim();
    if quantity.is_empty() {
        return 0.0;
    }

    if let Some(nanos) = quantity.strip_suffix('n') {
        return nanos.parse::<f64>().map(|n| n / 1_000_000_000.0).unwrap_or(0.0);
    }
    if let Some(micros) = quantity.strip_suffix('u') {
        return micros.parse::<f64>().map(|u| u / 1_000_000.0).unwrap_or(0.0);
    }
    if let Some(millis) = quantity.strip_suffix('m') {
        return millis.parse::<f64>().map(|m| m / 1_000.0).unwrap_or(0.0);
    }

    quantity.parse::<f64>().unwrap_or(0.0)
}

/// Converts a Kubernetes memory quantity string into bytes.
///
/// Binary suffixes (`Ki`, `Mi`, `Gi`, `Ti`) and decimal suffixes
/// (`K`, `M`, `G`, `T`) are both accepted; bare numbers are taken as bytes.
/// Unparseable input maps to `0.0`.
pub fn normalize_memory_bytes(quantity: &str) -> f64 {
    const SUFFIXES: &[(&str, f64)] = &[
        ("Ki", 1024.0),
        ("Mi", 1024.0 * 1024.0),
        ("Gi", 1024.0 * 1024.0 * 1024.0),
        ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("K", 1_000.0),
        ("M", 1_000_000.0),
        ("G", 1_000_000_000.0),
        ("T", 1_000_000_000_000.0),
    ];

    let quantity = quantity.trim();
    if quantity.is_empty() {
        return 0.0;
    }

    for (suffix, multiplier) in SUFFIXES {
        if let Some(value) = quantity.strip_suffix(suffix) {
            return value.parse::<f64>().map(|v| v * multiplier).unwrap_or(0.0);
        }
    }

    quantity.parse::<f64>().unwrap_or(0.0)
}

/// Formats a byte count as mebibytes with two decimals, for report rows.
pub fn bytes_to_mebibytes(bytes: f64) -> f64 {
    bytes / (1024.0 * 1024.0)
}
