// SPDX-License-Identifier: Apache-2.0

//! Per-input configuration: deserialization, defaults and validation.
//!
//! Inputs arrive as opaque maps (YAML or JSON) over the config feed and are
//! deserialized into [`InputConfig`] before a scanner is built. Durations
//! are humantime strings ("10s", "5m"); line and file matchers are compiled
//! at deserialization time so an invalid pattern rejects the whole input.

use std::time::Duration;

use regex::Regex;
use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;

use crate::tail::error::TailError;

pub const LOG_TYPE: &str = "log";
pub const STDIN_TYPE: &str = "stdin";

const KIB: usize = 1024;
const MIB: usize = 1024 * KIB;

pub const DEFAULT_MAX_LINES: usize = 500;
pub const DEFAULT_MULTILINE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Collector selector; only `log` is constructed, `stdin` is reserved.
    #[serde(rename = "type")]
    pub input_type: String,
    /// Topic name stamped on every event this input emits.
    pub name: String,
    pub enabled: bool,
    /// Glob patterns; `**` expands up to a fixed depth when recursion is on.
    pub paths: Vec<String>,
    pub symlinks: bool,
    pub recursive: Recursive,
    pub tail: Tail,
    pub scan: Scan,
    pub scanner: ScannerConfig,
    pub ignore: Ignore,
    pub state: StateConfig,
    pub close: CloseConfig,
    pub backoff: BackoffConfig,
    pub max: Max,
    pub include: Include,
    pub exclude: Exclude,
    pub multiline: Option<MultilineConfig>,
    pub json: Option<JsonConfig>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            input_type: LOG_TYPE.to_string(),
            name: LOG_TYPE.to_string(),
            enabled: true,
            paths: Vec::new(),
            symlinks: false,
            recursive: Recursive::default(),
            tail: Tail::default(),
            scan: Scan::default(),
            scanner: ScannerConfig::default(),
            ignore: Ignore::default(),
            state: StateConfig::default(),
            close: CloseConfig::default(),
            backoff: BackoffConfig::default(),
            max: Max::default(),
            include: Include::default(),
            exclude: Exclude::default(),
            multiline: None,
            json: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Recursive {
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Tail {
    pub files: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Scan {
    #[serde(with = "duration_str")]
    pub frequency: Duration,
    pub sort: ScanSort,
    pub order: ScanOrder,
}

impl Default for Scan {
    fn default() -> Self {
        Self {
            frequency: Duration::from_secs(10),
            sort: ScanSort::None,
            order: ScanOrder::Asc,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanSort {
    #[default]
    #[serde(rename = "")]
    None,
    Modtime,
    Filename,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Cap on concurrently running workers; 0 means unlimited.
    pub limit: u64,
    /// Read chunk size handed to the line splitter.
    pub buffer: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            limit: 0,
            buffer: 16 * KIB,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Ignore {
    /// Skip files whose last modification is older than this; 0 disables.
    #[serde(with = "duration_str")]
    pub older: Duration,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub clean: Clean,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Clean {
    /// Drop states for files inactive this long; 0 disables.
    #[serde(with = "duration_str")]
    pub inactive: Duration,
    /// Drop states whose file vanished or changed identity.
    pub removed: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CloseConfig {
    /// Close the file after this much read inactivity; 0 disables.
    #[serde(with = "duration_str")]
    pub inactive: Duration,
    pub removed: bool,
    pub renamed: bool,
    pub eof: bool,
    /// Hard cap on a single worker's lifetime; 0 disables.
    #[serde(with = "duration_str")]
    pub timeout: Duration,
}

impl Default for CloseConfig {
    fn default() -> Self {
        Self {
            inactive: Duration::from_secs(5 * 60),
            removed: true,
            renamed: false,
            eof: false,
            timeout: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    #[serde(with = "duration_str")]
    pub min: Duration,
    #[serde(with = "duration_str")]
    pub max: Duration,
    pub factor: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(1),
            max: Duration::from_secs(10),
            factor: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Max {
    /// Cap on a single emitted message's content.
    pub bytes: usize,
}

impl Default for Max {
    fn default() -> Self {
        Self { bytes: 10 * MIB }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Include {
    pub lines: RegexList,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Exclude {
    pub lines: RegexList,
    pub files: RegexList,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MultilineConfig {
    #[serde(deserialize_with = "regex_str")]
    pub pattern: Regex,
    #[serde(rename = "match")]
    pub match_mode: MatchMode,
    #[serde(default)]
    pub negate: bool,
    #[serde(default, deserialize_with = "opt_regex_str")]
    pub flush_pattern: Option<Regex>,
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
    #[serde(default = "default_multiline_timeout", with = "duration_str")]
    pub timeout: Duration,
}

fn default_max_lines() -> usize {
    DEFAULT_MAX_LINES
}

fn default_multiline_timeout() -> Duration {
    DEFAULT_MULTILINE_TIMEOUT
}

/// Which side of a line pair the multiline pattern is tested against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    Before,
    After,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct JsonConfig {
    pub message_key: String,
    pub keys_under_root: bool,
    pub overwrite_keys: bool,
    pub add_error_key: bool,
}

impl InputConfig {
    /// Reject configurations whose option combinations cannot work.
    pub fn validate(&self) -> Result<(), TailError> {
        if self.input_type != LOG_TYPE && self.input_type != STDIN_TYPE {
            return Err(TailError::Config(format!(
                "invalid input type: {}",
                self.input_type
            )));
        }

        if self.input_type == LOG_TYPE && self.paths.is_empty() {
            return Err(TailError::Config(
                "each input must have at least one path defined".to_string(),
            ));
        }

        if !self.state.clean.inactive.is_zero() {
            if self.ignore.older.is_zero() {
                return Err(TailError::Config(
                    "ignore.older must be enabled when state.clean.inactive is used".to_string(),
                ));
            }
            if self.state.clean.inactive <= self.ignore.older + self.scan.frequency {
                return Err(TailError::Config(
                    "state.clean.inactive must be > ignore.older + scan.frequency \
                     so only files which are not monitored anymore are removed"
                        .to_string(),
                ));
            }
        }

        if let Some(json) = &self.json {
            if json.message_key.is_empty() {
                if self.multiline.is_some() {
                    return Err(TailError::Config(
                        "json.message_key is required when multiline and the JSON \
                         decoder are used together"
                            .to_string(),
                    ));
                }
                if !self.include.lines.is_empty() || !self.exclude.lines.is_empty() {
                    return Err(TailError::Config(
                        "json.message_key is required when line filtering and the JSON \
                         decoder are used together"
                            .to_string(),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Expand `**` patterns when recursion is enabled; otherwise the
    /// configured patterns are used verbatim.
    pub fn resolve_paths(&self) -> Result<Vec<String>, TailError> {
        if !self.recursive.enabled {
            return Ok(self.paths.clone());
        }

        let mut resolved = Vec::new();
        for path in &self.paths {
            let patterns =
                crate::tail::glob::glob_patterns(path, crate::tail::glob::RECURSIVE_GLOB_DEPTH)?;
            resolved.extend(patterns);
        }
        Ok(resolved)
    }
}

/// A list of pre-compiled matchers, deserialized from pattern strings.
#[derive(Debug, Clone, Default)]
pub struct RegexList(Vec<Regex>);

impl RegexList {
    pub fn new(patterns: &[&str]) -> Result<Self, regex::Error> {
        patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()
            .map(RegexList)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches_any(&self, text: &str) -> bool {
        self.0.iter().any(|re| re.is_match(text))
    }
}

impl<'de> Deserialize<'de> for RegexList {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let patterns = Vec::<String>::deserialize(deserializer)?;
        let compiled = patterns
            .iter()
            .map(|p| Regex::new(p).map_err(|e| de::Error::custom(format!("invalid pattern '{}': {}", p, e))))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RegexList(compiled))
    }
}

fn regex_str<'de, D>(deserializer: D) -> Result<Regex, D::Error>
where
    D: Deserializer<'de>,
{
    let pattern = String::deserialize(deserializer)?;
    Regex::new(&pattern).map_err(de::Error::custom)
}

fn opt_regex_str<'de, D>(deserializer: D) -> Result<Option<Regex>, D::Error>
where
    D: Deserializer<'de>,
{
    let pattern = Option::<String>::deserialize(deserializer)?;
    pattern
        .map(|p| Regex::new(&p).map_err(de::Error::custom))
        .transpose()
}

/// Durations as humantime strings ("10s", "5m") or raw seconds.
mod duration_str {
    use super::*;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DurationVisitor;

        impl Visitor<'_> for DurationVisitor {
            type Value = Duration;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a duration string like \"10s\" or a number of seconds")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                humantime::parse_duration(value).map_err(E::custom)
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(Duration::from_secs(value))
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                u64::try_from(value)
                    .map(Duration::from_secs)
                    .map_err(|_| E::custom("duration must not be negative"))
            }
        }

        deserializer.deserialize_any(DurationVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_yaml(yaml: &str) -> InputConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = from_yaml("paths: [\"/var/log/*.log\"]");

        assert_eq!(config.input_type, "log");
        assert!(config.enabled);
        assert_eq!(config.scan.frequency, Duration::from_secs(10));
        assert_eq!(config.scanner.buffer, 16 * 1024);
        assert_eq!(config.backoff.min, Duration::from_secs(1));
        assert_eq!(config.backoff.max, Duration::from_secs(10));
        assert_eq!(config.backoff.factor, 2);
        assert!(config.close.removed);
        assert!(!config.close.renamed);
        assert!(!config.close.eof);
        assert_eq!(config.max.bytes, 10 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duration_strings() {
        let config = from_yaml(
            r#"
paths: ["/t/*.log"]
scan:
  frequency: 250ms
close:
  inactive: 2m
backoff:
  min: 100ms
  max: 1s
"#,
        );

        assert_eq!(config.scan.frequency, Duration::from_millis(250));
        assert_eq!(config.close.inactive, Duration::from_secs(120));
        assert_eq!(config.backoff.min, Duration::from_millis(100));
    }

    #[test]
    fn test_rejects_unknown_type() {
        let config = from_yaml("type: syslog\npaths: [\"/t/*\"]");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_missing_paths() {
        let config = from_yaml("type: log");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_clean_inactive_requires_ignore_older() {
        let config = from_yaml(
            r#"
paths: ["/t/*"]
state:
  clean:
    inactive: 1h
"#,
        );
        assert!(config.validate().is_err());

        let config = from_yaml(
            r#"
paths: ["/t/*"]
ignore:
  older: 10m
state:
  clean:
    inactive: 1h
"#,
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_clean_inactive_must_exceed_ignore_older_plus_frequency() {
        let config = from_yaml(
            r#"
paths: ["/t/*"]
scan:
  frequency: 10s
ignore:
  older: 1h
state:
  clean:
    inactive: 1h
"#,
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_without_message_key_forbids_multiline() {
        let config = from_yaml(
            r#"
paths: ["/t/*"]
json: {}
multiline:
  pattern: '^\s'
  match: after
"#,
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_without_message_key_forbids_line_filters() {
        let config = from_yaml(
            r#"
paths: ["/t/*"]
json: {}
include:
  lines: ["^ERR"]
"#,
        );
        assert!(config.validate().is_err());

        let config = from_yaml(
            r#"
paths: ["/t/*"]
json:
  message_key: msg
include:
  lines: ["^ERR"]
"#,
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_scan_sort_rejected() {
        let result: Result<InputConfig, _> =
            serde_yaml::from_str("paths: [\"/t/*\"]\nscan:\n  sort: size");
        assert!(result.is_err());
    }

    #[test]
    fn test_scan_sort_values() {
        let config = from_yaml("paths: [\"/t/*\"]\nscan:\n  sort: modtime\n  order: desc");
        assert_eq!(config.scan.sort, ScanSort::Modtime);
        assert_eq!(config.scan.order, ScanOrder::Desc);
    }

    #[test]
    fn test_invalid_regex_rejected_at_parse() {
        let result: Result<InputConfig, _> =
            serde_yaml::from_str("paths: [\"/t/*\"]\ninclude:\n  lines: [\"([\"]");
        assert!(result.is_err());
    }

    #[test]
    fn test_multiline_defaults() {
        let config = from_yaml(
            r#"
paths: ["/t/*"]
multiline:
  pattern: '^\s'
  match: after
"#,
        );
        let ml = config.multiline.unwrap();
        assert_eq!(ml.max_lines, DEFAULT_MAX_LINES);
        assert_eq!(ml.timeout, DEFAULT_MULTILINE_TIMEOUT);
        assert!(!ml.negate);
        assert_eq!(ml.match_mode, MatchMode::After);
    }

    #[test]
    fn test_resolve_paths_recursive() {
        let config = from_yaml(
            r#"
paths: ["/var/log/**/*.log"]
recursive:
  enabled: true
"#,
        );
        let resolved = config.resolve_paths().unwrap();
        assert!(resolved.len() > 1);
        assert!(resolved.contains(&"/var/log/*.log".to_string()));
    }
}
