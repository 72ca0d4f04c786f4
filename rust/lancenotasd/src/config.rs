use std::path::PathBuf;
use tracing::metadata::LevelFilter;

/// Number of grading periods in an academic year.
pub const MAX_TRIMESTER: i64 = 3;
/// Upper bound of a lesson score.
pub const MAX_SCORE: f64 = 10.0;
/// How many missing (lesson, assignment) items a rejected close reports.
pub const CLOSE_ISSUE_LIMIT: usize = 6;

pub const MIN_ACADEMIC_YEAR: i64 = 2000;
pub const MAX_ACADEMIC_YEAR: i64 = 2100;

#[derive(Debug, Clone)]
pub struct Settings {
    pub workspace: Option<PathBuf>,
    pub log_level: LevelFilter,
}

impl Settings {
    /// Reads `LANCENOTAS_WORKSPACE` and `LANCENOTAS_LOG`. Call after `dotenvy::dotenv()`.
    pub fn from_env() -> Self {
        let workspace = std::env::var("LANCENOTAS_WORKSPACE")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);
        let log_level = std::env::var("LANCENOTAS_LOG")
            .ok()
            .as_deref()
            .and_then(parse_level)
            .unwrap_or(LevelFilter::INFO);
        Self {
            workspace,
            log_level,
        }
    }
}

fn parse_level(raw: &str) -> Option<LevelFilter> {
    raw.trim().parse::<LevelFilter>().ok()
}

/// Clamps a requested trimester into `1..=MAX_TRIMESTER`.
pub fn clamp_trimester(t: i64) -> i64 {
    t.clamp(1, MAX_TRIMESTER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_level_accepts_known_names_only() {
        assert_eq!(parse_level(" Debug "), Some(LevelFilter::DEBUG));
        assert_eq!(parse_level("off"), Some(LevelFilter::OFF));
        assert_eq!(parse_level("verbose"), None);
    }

    #[test]
    fn clamp_trimester_bounds() {
        assert_eq!(clamp_trimester(0), 1);
        assert_eq!(clamp_trimester(2), 2);
        assert_eq!(clamp_trimester(9), MAX_TRIMESTER);
    }
}
