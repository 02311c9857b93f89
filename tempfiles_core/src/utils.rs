//! Human-readable formatting helpers

use chrono::Duration;

pub fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{} B", bytes);
    }

    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }

    let suffix = "KMGTPE".as_bytes()[exp] as char;
    format!("{:.1} {}B", bytes as f64 / div as f64, suffix)
}

pub fn format_duration(duration: Duration) -> String {
    let minutes = duration.num_minutes();
    if minutes < 1 {
        return "less than a minute".to_string();
    }

    let hours = duration.num_hours();
    if hours >= 1 && minutes % 60 == 0 {
        return plural(hours, "hour");
    }
    if hours >= 1 {
        return format!("{} {}", plural(hours, "hour"), plural(minutes % 60, "minute"));
    }

    plural(minutes, "minute")
}

fn plural(value: i64, unit: &str) -> String {
    if value == 1 {
        format!("1 {}", unit)
    } else {
        format!("{} {}s", value, unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(10 * 1024 * 1024), "10.0 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::seconds(30)), "less than a minute");
        assert_eq!(format_duration(Duration::minutes(1)), "1 minute");
        assert_eq!(format_duration(Duration::minutes(45)), "45 minutes");
        assert_eq!(format_duration(Duration::hours(1)), "1 hour");
        assert_eq!(format_duration(Duration::hours(24)), "24 hours");
        assert_eq!(format_duration(Duration::minutes(90)), "1 hour 30 minutes");
    }
}
