//! Colors and formatting helpers for the live view.

use ratatui::style::Color;

pub const HEADER: Color = Color::Cyan;
pub const ACTIVE: Color = Color::Green;
pub const LIMIT: Color = Color::Red;
pub const DIM: Color = Color::DarkGray;

/// Burn-rate color: green below 80% utilization, yellow below 100%, red
/// beyond.
pub fn burn_color(burn_rate: f64) -> Color {
    if burn_rate < 0.8 {
        Color::Green
    } else if burn_rate < 1.0 {
        Color::Yellow
    } else {
        Color::Red
    }
}

/// Compact token count: 1.23K / 4.56M / 7.89B.
pub fn format_tokens(n: u64) -> String {
    if n >= 1_000_000_000 {
        format!("{:.2}B", n as f64 / 1e9)
    } else if n >= 1_000_000 {
        format!("{:.2}M", n as f64 / 1e6)
    } else if n >= 1_000 {
        format!("{:.2}K", n as f64 / 1e3)
    } else {
        n.to_string()
    }
}

/// Unix seconds as local `HH:MM`.
pub fn format_clock(unix: i64) -> String {
    use chrono::TimeZone;
    chrono::Local
        .timestamp_opt(unix, 0)
        .single()
        .map(|dt| dt.format("%H:%M").to_string())
        .unwrap_or_else(|| "--:--".to_string())
}

/// Seconds as `1h23m` / `45m` / `12s`.
pub fn format_duration(secs: i64) -> String {
    if secs >= 3_600 {
        format!("{}h{:02}m", secs / 3_600, (secs % 3_600) / 60)
    } else if secs >= 60 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_tokens() {
        assert_eq!(format_tokens(950), "950");
        assert_eq!(format_tokens(1_500), "1.50K");
        assert_eq!(format_tokens(2_340_000), "2.34M");
        assert_eq!(format_tokens(7_890_000_000), "7.89B");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(12), "12s");
        assert_eq!(format_duration(300), "5m");
        assert_eq!(format_duration(4_980), "1h23m");
    }

    #[test]
    fn test_burn_color_thresholds() {
        assert_eq!(burn_color(0.2), Color::Green);
        assert_eq!(burn_color(0.9), Color::Yellow);
        assert_eq!(burn_color(1.5), Color::Red);
    }
}
