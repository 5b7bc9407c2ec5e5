// SPDX-License-Identifier: Apache-2.0

//! Recursive glob expansion: `**` is rewritten into a set of fixed-depth
//! `*` patterns so the plain glob walker can evaluate them.

use std::path::PathBuf;

use crate::tail::error::TailError;

/// How many directory levels a `**` may span.
pub const RECURSIVE_GLOB_DEPTH: u8 = 8;

/// Expand a pattern containing a single `**` component into patterns of
/// depth 0..=`depth`. Patterns without `**` pass through unchanged; more
/// than one `**` is rejected.
pub fn glob_patterns(pattern: &str, depth: u8) -> Result<Vec<String>, TailError> {
    if depth == 0 || !pattern.split('/').any(|c| c == "**") {
        return Ok(vec![pattern.to_string()]);
    }

    let parts: Vec<&str> = pattern.split('/').collect();
    let star_count = parts.iter().filter(|c| **c == "**").count();
    if star_count > 1 {
        return Err(TailError::InvalidGlob(format!(
            "multiple ** in {:?}",
            pattern
        )));
    }

    let idx = parts
        .iter()
        .position(|c| *c == "**")
        .unwrap_or(parts.len());
    let prefix = join_segments(&parts[..idx]);
    let suffix = join_segments(&parts[idx + 1..]);

    // A bare "**" on a relative path must not expand to the empty pattern.
    let start = usize::from(prefix.as_os_str().is_empty() && suffix.as_os_str().is_empty());

    let mut patterns = Vec::new();
    for level in start..=usize::from(depth) {
        let mut expanded = prefix.clone();
        for _ in 0..level {
            expanded.push("*");
        }
        if !suffix.as_os_str().is_empty() {
            expanded.push(&suffix);
        }
        patterns.push(expanded.to_string_lossy().into_owned());
    }

    Ok(patterns)
}

fn join_segments(segments: &[&str]) -> PathBuf {
    let mut path = PathBuf::new();
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            // A leading empty segment is the root of an absolute pattern.
            if i == 0 {
                path.push("/");
            }
            continue;
        }
        path.push(segment);
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_pattern_passes_through() {
        let patterns = glob_patterns("/var/log/*.log", RECURSIVE_GLOB_DEPTH).unwrap();
        assert_eq!(patterns, vec!["/var/log/*.log".to_string()]);
    }

    #[test]
    fn test_double_star_expands_to_depth() {
        let patterns = glob_patterns("/var/log/**/*.log", 3).unwrap();
        assert_eq!(
            patterns,
            vec![
                "/var/log/*.log",
                "/var/log/*/*.log",
                "/var/log/*/*/*.log",
                "/var/log/*/*/*/*.log",
            ]
        );
    }

    #[test]
    fn test_trailing_double_star() {
        let patterns = glob_patterns("/data/**", 2).unwrap();
        assert_eq!(patterns, vec!["/data", "/data/*", "/data/*/*"]);
    }

    #[test]
    fn test_bare_double_star_skips_empty_pattern() {
        let patterns = glob_patterns("**", 2).unwrap();
        assert_eq!(patterns, vec!["*", "*/*"]);
    }

    #[test]
    fn test_multiple_double_star_rejected() {
        assert!(glob_patterns("/a/**/b/**/c", 4).is_err());
    }

    #[test]
    fn test_depth_zero_disables_expansion() {
        let patterns = glob_patterns("/a/**/b", 0).unwrap();
        assert_eq!(patterns, vec!["/a/**/b".to_string()]);
    }
}
