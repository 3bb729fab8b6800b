//! Timestamp and identifier helpers for game API payloads

use chrono::{DateTime, NaiveDateTime, Utc};

const FORMATS: [&str; 4] = ["%Y%m%dT%H%M%S%.f", "%Y%m%dT%H%M%S", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"];

/// Returned for missing or unparseable timestamps; predates any season window
pub fn sentinel() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_577_836_800, 0).unwrap_or_default()
}

/// Parse compact (`20250904T080000.000Z`) or ISO-8601 timestamps, assuming UTC
pub fn parse_api_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return sentinel();
    };
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return parsed.with_timezone(&Utc);
    }
    let naive = raw.trim_end_matches('Z');
    FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(naive, format).ok())
        .map(|parsed| parsed.and_utc())
        .unwrap_or_else(sentinel)
}

/// Stable identifier of a regular war: start minute plus the clan tag suffix
pub fn generate_war_tag(start: DateTime<Utc>, clan_tag: &str) -> String {
    let clan: Vec<char> = clan_tag.trim_start_matches('#').chars().collect();
    let suffix: String = clan[clan.len().saturating_sub(3)..].iter().collect();
    let mut tag = format!("{}_{}", start.format("%Y%m%dT%H%M"), suffix);
    tag.truncate(20);
    tag
}

/// Attack count inferred from capital gold looted when the API reports none
pub fn estimate_capital_attacks(destroyed: i64) -> i64 {
    match destroyed {
        d if d <= 0 => 0,
        d if d <= 4_000 => 1,
        d if d <= 8_000 => 2,
        d if d <= 12_000 => 3,
        d if d <= 16_000 => 4,
        d if d <= 20_000 => 5,
        _ => 6,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_compact_and_iso_timestamps() {
        let expected = Utc.with_ymd_and_hms(2025, 9, 4, 8, 0, 0).unwrap();
        assert_eq!(parse_api_timestamp(Some("20250904T080000.000Z")), expected);
        assert_eq!(parse_api_timestamp(Some("20250904T080000Z")), expected);
        assert_eq!(parse_api_timestamp(Some("2025-09-04T08:00:00Z")), expected);
        assert_eq!(parse_api_timestamp(Some("2025-09-04T08:00:00")), expected);
    }

    #[test]
    fn test_garbage_yields_sentinel() {
        let sentinel = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_api_timestamp(None), sentinel);
        assert_eq!(parse_api_timestamp(Some("")), sentinel);
        assert_eq!(parse_api_timestamp(Some("next tuesday")), sentinel);
    }

    #[test]
    fn test_war_tag_shape() {
        let start = Utc.with_ymd_and_hms(2025, 9, 4, 8, 0, 0).unwrap();
        assert_eq!(generate_war_tag(start, "#2PQ8RYL"), "20250904T0800_RYL");
        assert_eq!(generate_war_tag(start, "AB"), "20250904T0800_AB");
    }

    #[test]
    fn test_capital_attack_estimates() {
        assert_eq!(estimate_capital_attacks(0), 0);
        assert_eq!(estimate_capital_attacks(4_000), 1);
        assert_eq!(estimate_capital_attacks(4_001), 2);
        assert_eq!(estimate_capital_attacks(19_999), 5);
        assert_eq!(estimate_capital_attacks(35_000), 6);
    }
}
