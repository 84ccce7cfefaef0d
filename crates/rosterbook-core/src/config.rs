// Configuration loading and parsing (config/rosterbook.toml).

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;

use crate::lineup::LineupRules;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },
}

// ---------------------------------------------------------------------------
// Assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub db_path: String,
    pub proposal_ttl_minutes: i64,
    pub lineups: LineupRules,
    pub import_batch_size: usize,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Config {
    pub fn proposal_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.proposal_ttl_minutes)
    }
}

impl Default for Config {
    fn default() -> Self {
        assemble(ConfigFile::default())
    }
}

// ---------------------------------------------------------------------------
// rosterbook.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    database: DatabaseSection,
    trades: TradesSection,
    lineups: LineupsSection,
    import: ImportSection,
    logging: LoggingSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct DatabaseSection {
    path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct TradesSection {
    proposal_ttl_minutes: i64,
}

impl Default for TradesSection {
    fn default() -> Self {
        Self {
            proposal_ttl_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct LineupsSection {
    max_starts_per_entrant: u32,
    championship_week: u32,
    championship_extra_starts: u32,
}

impl Default for LineupsSection {
    fn default() -> Self {
        let rules = LineupRules::default();
        Self {
            max_starts_per_entrant: rules.max_starts_per_entrant,
            championship_week: rules.championship_week,
            championship_extra_starts: rules.championship_extra_starts,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct ImportSection {
    batch_size: usize,
}

impl Default for ImportSection {
    fn default() -> Self {
        Self { batch_size: 500 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct LoggingSection {
    filter: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            filter: "rosterbook=info,rosterbook_app=info,rosterbook_core=info".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load `config/rosterbook.toml` relative to `base_dir`. A missing file
/// yields the built-in defaults.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join("rosterbook.toml");
    let file = match std::fs::read_to_string(&path) {
        Ok(text) => toml::from_str(&text).map_err(|e| ConfigError::ParseError {
            path: path.clone(),
            source: e,
        })?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => ConfigFile::default(),
        Err(e) => return Err(ConfigError::Io { path, source: e }),
    };
    let config = assemble(file);
    validate(&config)?;
    Ok(config)
}

/// Convenience wrapper: loads config relative to the current working directory.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|e| ConfigError::Io {
        path: PathBuf::from("."),
        source: e,
    })?;
    load_config_from(&cwd)
}

fn assemble(file: ConfigFile) -> Config {
    Config {
        db_path: file.database.path.unwrap_or_else(default_db_path),
        proposal_ttl_minutes: file.trades.proposal_ttl_minutes,
        lineups: LineupRules {
            max_starts_per_entrant: file.lineups.max_starts_per_entrant,
            championship_week: file.lineups.championship_week,
            championship_extra_starts: file.lineups.championship_extra_starts,
        },
        import_batch_size: file.import.batch_size,
        log_filter: file.logging.filter,
    }
}

/// `rosterbook.db` in the platform data directory, or the working directory
/// when no home directory can be determined.
fn default_db_path() -> String {
    ProjectDirs::from("org", "rosterbook", "rosterbook")
        .map(|dirs| dirs.data_dir().join("rosterbook.db"))
        .unwrap_or_else(|| PathBuf::from("rosterbook.db"))
        .display()
        .to_string()
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// One season.
const MAX_PROPOSAL_TTL_MINUTES: i64 = 366 * 24 * 60;

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.db_path.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "database.path".into(),
            message: "must not be empty".into(),
        });
    }

    if !(1..=MAX_PROPOSAL_TTL_MINUTES).contains(&config.proposal_ttl_minutes) {
        return Err(ConfigError::ValidationError {
            field: "trades.proposal_ttl_minutes".into(),
            message: format!(
                "must be between 1 and {MAX_PROPOSAL_TTL_MINUTES}, got {}",
                config.proposal_ttl_minutes
            ),
        });
    }

    let positive: &[(&str, usize)] = &[
        ("import.batch_size", config.import_batch_size),
        ("lineups.championship_week", config.lineups.championship_week as usize),
    ];
    for (name, val) in positive {
        if *val == 0 {
            return Err(ConfigError::ValidationError {
                field: name.to_string(),
                message: "must be > 0".into(),
            });
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    /// Fresh temp directory with an empty `config/` inside.
    fn scratch(name: &str) -> PathBuf {
        let tmp = std::env::temp_dir().join(name);
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("config")).unwrap();
        tmp
    }

    fn write_config(base: &Path, text: &str) {
        fs::write(base.join("config").join("rosterbook.toml"), text).unwrap();
    }

    #[test]
    fn missing_file_uses_defaults() {
        let tmp = scratch("rosterbook_config_defaults");
        let config = load_config_from(&tmp).unwrap();
        assert_eq!(config.proposal_ttl_minutes, 60);
        assert_eq!(config.import_batch_size, 500);
        assert_eq!(config.lineups, LineupRules::default());
        assert!(config.db_path.ends_with("rosterbook.db"));
        assert_eq!(config.proposal_ttl(), chrono::Duration::hours(1));
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn partial_file_overrides_only_given_fields() {
        let tmp = scratch("rosterbook_config_partial");
        write_config(
            &tmp,
            r#"
[database]
path = "data/league.db"

[lineups]
championship_week = 7
"#,
        );
        let config = load_config_from(&tmp).unwrap();
        assert_eq!(config.db_path, "data/league.db");
        assert_eq!(config.lineups.championship_week, 7);
        assert_eq!(config.lineups.max_starts_per_entrant, 2);
        assert_eq!(config.proposal_ttl_minutes, 60);
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_zero_ttl() {
        let tmp = scratch("rosterbook_config_zero_ttl");
        write_config(&tmp, "[trades]\nproposal_ttl_minutes = 0\n");
        match load_config_from(&tmp).unwrap_err() {
            ConfigError::ValidationError { field, .. } => {
                assert_eq!(field, "trades.proposal_ttl_minutes")
            }
            other => panic!("expected ValidationError, got: {other}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_ttl_longer_than_a_season() {
        let tmp = scratch("rosterbook_config_huge_ttl");
        write_config(&tmp, "[trades]\nproposal_ttl_minutes = 9223372036854775807\n");
        match load_config_from(&tmp).unwrap_err() {
            ConfigError::ValidationError { field, .. } => {
                assert_eq!(field, "trades.proposal_ttl_minutes")
            }
            other => panic!("expected ValidationError, got: {other}"),
        }

        write_config(&tmp, "[trades]\nproposal_ttl_minutes = 527040\n");
        assert_eq!(load_config_from(&tmp).unwrap().proposal_ttl(), chrono::Duration::days(366));
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_zero_batch_size() {
        let tmp = scratch("rosterbook_config_zero_batch");
        write_config(&tmp, "[import]\nbatch_size = 0\n");
        match load_config_from(&tmp).unwrap_err() {
            ConfigError::ValidationError { field, .. } => assert_eq!(field, "import.batch_size"),
            other => panic!("expected ValidationError, got: {other}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_empty_db_path() {
        let tmp = scratch("rosterbook_config_empty_path");
        write_config(&tmp, "[database]\npath = \"  \"\n");
        assert!(matches!(
            load_config_from(&tmp).unwrap_err(),
            ConfigError::ValidationError { .. }
        ));
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn parse_error_for_invalid_toml() {
        let tmp = scratch("rosterbook_config_invalid");
        write_config(&tmp, "this is not valid [[[ toml");
        match load_config_from(&tmp).unwrap_err() {
            ConfigError::ParseError { path, .. } => assert!(path.ends_with("rosterbook.toml")),
            other => panic!("expected ParseError, got: {other}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }
}
