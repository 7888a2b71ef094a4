//! Human-readable byte/duration formatting for log lines and CLI summaries.

/// Render a byte count as e.g. `2.00 MiB`, matching the `proxmox-human-byte`
/// convention of binary (1024-based) units.
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[unit])
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

/// Render a fraction in `[0, 1]` as a percentage string, e.g. `42.5%`.
pub fn human_percent(fraction: f64) -> String {
    format!("{:.1}%", fraction * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_bytes() {
        assert_eq!(human_bytes(0), "0 B");
        assert_eq!(human_bytes(1023), "1023 B");
        assert_eq!(human_bytes(1024), "1.00 KiB");
        assert_eq!(human_bytes(2 * 1024 * 1024), "2.00 MiB");
    }

    #[test]
    fn formats_percent() {
        assert_eq!(human_percent(0.425), "42.5%");
    }
}
