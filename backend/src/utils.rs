/// Parse ISO8601 duration string (PT1H2M3S) to total seconds.
/// Returns `None` for anything that is not a time-only duration, e.g. `P0D` on live streams.
pub fn parse_iso8601_duration_to_seconds(duration_str: &str) -> Option<i64> {
    let duration_part = duration_str.strip_prefix("PT")?;
    if duration_part.is_empty() {
        return None;
    }

    let mut total_seconds = 0.0;
    let mut current_number = String::new();

    for ch in duration_part.chars() {
        if ch.is_ascii_digit() || ch == '.' {
            current_number.push(ch);
        } else {
            let num = current_number.parse::<f64>().ok()?;
            match ch {
                'H' => total_seconds += num * 3600.0,
                'M' => total_seconds += num * 60.0,
                'S' => total_seconds += num,
                _ => return None,
            }
            current_number.clear();
        }
    }

    if !current_number.is_empty() {
        return None;
    }

    Some(total_seconds as i64)
}

/// Seconds to `H:MM:SS`, or `M:SS` below one hour.
pub fn format_duration(total_seconds: i64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

pub fn normalize_duration(duration_str: &str) -> Option<String> {
    parse_iso8601_duration_to_seconds(duration_str).map(format_duration)
}

/// YouTube ids are 11 chars today; the stores accept up to 20.
pub fn is_valid_video_id(video_id: &str) -> bool {
    (11..=20).contains(&video_id.len())
        && video_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// "AI & Technology" -> "ai_technology"
pub fn category_slug(name: &str) -> String {
    let cleaned: String = name
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c.is_whitespace())
        .collect();

    cleaned.split_whitespace().collect::<Vec<_>>().join("_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pt_durations() {
        assert_eq!(parse_iso8601_duration_to_seconds("PT15M51S"), Some(951));
        assert_eq!(parse_iso8601_duration_to_seconds("PT1H2M3S"), Some(3723));
        assert_eq!(parse_iso8601_duration_to_seconds("PT45S"), Some(45));
        assert_eq!(parse_iso8601_duration_to_seconds("PT2H"), Some(7200));
    }

    #[test]
    fn rejects_non_time_durations() {
        assert_eq!(parse_iso8601_duration_to_seconds("P0D"), None);
        assert_eq!(parse_iso8601_duration_to_seconds(""), None);
        assert_eq!(parse_iso8601_duration_to_seconds("PT"), None);
        assert_eq!(parse_iso8601_duration_to_seconds("PT12"), None);
    }

    #[test]
    fn formats_like_the_player() {
        assert_eq!(format_duration(951), "15:51");
        assert_eq!(format_duration(3723), "1:02:03");
        assert_eq!(format_duration(5), "0:05");
        assert_eq!(normalize_duration("PT4M"), Some("4:00".to_string()));
    }

    #[test]
    fn video_id_shape() {
        assert!(is_valid_video_id("dQw4w9WgXcQ"));
        assert!(is_valid_video_id("abc-DEF_123456789012"));
        assert!(!is_valid_video_id("short"));
        assert!(!is_valid_video_id("abc-DEF_1234567890123"));
        assert!(!is_valid_video_id("dQw4w9WgXc!"));
    }

    #[test]
    fn slugs_category_names() {
        assert_eq!(category_slug("AI & Technology"), "ai_technology");
        assert_eq!(category_slug("Fitness & Health"), "fitness_health");
        assert_eq!(category_slug("  Marketing  "), "marketing");
        assert_eq!(category_slug("!!!"), "");
    }
}
