const BYTES_PER_MB: f64 = 1_000_000.0;

/// Decimal megabytes, the unit thresholds and log lines are expressed in.
pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

pub fn format_mb(mb: f64) -> String {
    format!("{mb:.1}MB")
}

pub fn format_gb(mb: f64) -> String {
    format!("{:.2}GB", mb / 1000.0)
}

pub fn format_duration_ms(elapsed: std::time::Duration) -> String {
    format!("{:.1}ms", elapsed.as_secs_f64() * 1000.0)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn mb_is_decimal() {
        assert_eq!(bytes_to_mb(500_000_000), 500.0);
        assert_eq!(format_mb(bytes_to_mb(1_234_567)), "1.2MB");
    }

    #[test]
    fn gb_from_mb() {
        assert_eq!(format_gb(250_000.0), "250.00GB");
    }

    #[test]
    fn duration_millis() {
        assert_eq!(format_duration_ms(Duration::from_micros(2500)), "2.5ms");
    }
}
