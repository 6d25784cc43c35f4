//! Reproducibility stamps: `[tool.uv] exclude-newer` in the metadata block.
//!
//! `uv` ignores distributions uploaded after that timestamp, which pins the
//! resolution of an otherwise unpinned dependency list to a point in time.

use crate::editor;
use crate::pep723::MetadataBlock;
use chrono::{DateTime, FixedOffset, NaiveDate, SecondsFormat, Utc};
use serde::Serialize;
use std::process::Command;
use thiserror::Error;

pub const TOOL_NAMESPACE: &str = "uv";
pub const EXCLUDE_NEWER_KEY: &str = "exclude-newer";

#[derive(Debug, Error)]
pub enum StampError {
    #[error("`{0}` is neither an RFC 3339 timestamp nor a YYYY-MM-DD date")]
    InvalidTimestamp(String),
    #[error("failed to run git: {0}")]
    GitUnavailable(#[from] std::io::Error),
    #[error("git could not resolve revision `{rev}`: {message}")]
    Git { rev: String, message: String },
}

pub type Result<T> = std::result::Result<T, StampError>;

/// Where the stamp comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StampSource {
    Now,
    Timestamp(String),
    /// A calendar day; the stamp is the end of that day.
    Date(String),
    Rev(String),
    Latest,
    Clear,
}

/// What happened to `exclude-newer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Action {
    Created {
        value: String,
    },
    Updated {
        previous: String,
        value: String,
    },
    Deleted {
        previous: Option<String>,
    },
}

impl Action {
    pub fn describe(&self) -> String {
        match self {
            Action::Created { value } => format!("created exclude-newer = {value}"),
            Action::Updated { previous, value } => {
                format!("updated exclude-newer from {previous} to {value}")
            }
            Action::Deleted {
                previous: Some(previous),
            } => format!("removed exclude-newer = {previous}"),
            Action::Deleted { previous: None } => "no exclude-newer to remove".to_string(),
        }
    }
}

/// Turn a source into a timestamp; `None` means "clear the stamp".
pub fn resolve(source: &StampSource) -> Result<Option<DateTime<FixedOffset>>> {
    match source {
        StampSource::Clear => Ok(None),
        StampSource::Now => Ok(Some(Utc::now().fixed_offset())),
        StampSource::Timestamp(text) => parse_timestamp(text).map(Some),
        StampSource::Date(text) => end_of_day(text).map(Some),
        StampSource::Rev(rev) => git_commit_time(rev).map(Some),
        StampSource::Latest => git_commit_time("HEAD").map(Some),
    }
}

/// RFC 3339 first; a bare date falls back to the end of that day.
pub fn parse_timestamp(text: &str) -> Result<DateTime<FixedOffset>> {
    let text = text.trim();
    match DateTime::parse_from_rfc3339(text) {
        Ok(timestamp) => Ok(timestamp),
        Err(_) => end_of_day(text),
    }
}

/// Midnight (UTC) of the day after `date`.
pub fn end_of_day(date: &str) -> Result<DateTime<FixedOffset>> {
    let invalid = || StampError::InvalidTimestamp(date.to_string());
    let day = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").map_err(|_| invalid())?;
    let midnight = day
        .succ_opt()
        .and_then(|next| next.and_hms_opt(0, 0, 0))
        .ok_or_else(invalid)?;
    Ok(midnight.and_utc().fixed_offset())
}

fn git_commit_time(rev: &str) -> Result<DateTime<FixedOffset>> {
    let output = Command::new("git")
        .args(["show", "-s", "--format=%cI", rev])
        .output()?;
    if !output.status.success() {
        return Err(StampError::Git {
            rev: rev.to_string(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    DateTime::parse_from_rfc3339(stdout.trim()).map_err(|e| StampError::Git {
        rev: rev.to_string(),
        message: format!("unexpected commit date `{}`: {e}", stdout.trim()),
    })
}

pub fn format_timestamp(timestamp: &DateTime<FixedOffset>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// Write or clear the stamp, reporting what changed.
pub fn apply(block: &MetadataBlock, timestamp: Option<&DateTime<FixedOffset>>) -> (MetadataBlock, Action) {
    let previous = block
        .tool(TOOL_NAMESPACE)
        .and_then(|table| table.get(EXCLUDE_NEWER_KEY))
        .map(|value| match value.as_str() {
            Some(text) => text.to_string(),
            None => value.to_string(),
        });

    match timestamp {
        Some(timestamp) => {
            let value = format_timestamp(timestamp);
            let next = editor::set_tool_value(
                block,
                TOOL_NAMESPACE,
                EXCLUDE_NEWER_KEY,
                toml::Value::String(value.clone()),
            );
            let action = match previous {
                Some(previous) => Action::Updated { previous, value },
                None => Action::Created { value },
            };
            (next, action)
        }
        None => {
            let (next, _) = editor::remove_tool_value(block, TOOL_NAMESPACE, EXCLUDE_NEWER_KEY);
            (next, Action::Deleted { previous })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_means_end_of_day() {
        let stamp = resolve(&StampSource::Date("2024-10-19".into())).unwrap().unwrap();
        assert_eq!(format_timestamp(&stamp), "2024-10-20T00:00:00+00:00");

        let stamp = end_of_day("2024-12-31").unwrap();
        assert_eq!(format_timestamp(&stamp), "2025-01-01T00:00:00+00:00");
    }

    #[test]
    fn timestamps_keep_their_offset() {
        let stamp = parse_timestamp("2024-03-01T12:30:00+02:00").unwrap();
        assert_eq!(format_timestamp(&stamp), "2024-03-01T12:30:00+02:00");

        let stamp = parse_timestamp("2024-03-01T12:30:00Z").unwrap();
        assert_eq!(format_timestamp(&stamp), "2024-03-01T12:30:00+00:00");

        let stamp = parse_timestamp("2024-03-01").unwrap();
        assert_eq!(format_timestamp(&stamp), "2024-03-02T00:00:00+00:00");
    }

    #[test]
    fn garbage_is_rejected() {
        for text in ["yesterday", "2024-13-01", "2024-02-30T00:00:00"] {
            assert!(matches!(
                parse_timestamp(text),
                Err(StampError::InvalidTimestamp(_))
            ));
        }
    }

    #[test]
    fn clear_resolves_to_none() {
        assert!(resolve(&StampSource::Clear).unwrap().is_none());
        assert!(resolve(&StampSource::Now).unwrap().is_some());
    }

    #[test]
    fn apply_reports_create_update_delete() {
        let first = end_of_day("2024-01-01").unwrap();
        let second = end_of_day("2024-06-01").unwrap();

        let (block, action) = apply(&MetadataBlock::default(), Some(&first));
        assert_eq!(
            action,
            Action::Created {
                value: "2024-01-02T00:00:00+00:00".into()
            }
        );
        assert!(block.serialize().contains("# [tool.uv]\n# exclude-newer = \"2024-01-02T00:00:00+00:00\"\n"));

        let (block, action) = apply(&block, Some(&second));
        assert_eq!(
            action,
            Action::Updated {
                previous: "2024-01-02T00:00:00+00:00".into(),
                value: "2024-06-02T00:00:00+00:00".into(),
            }
        );

        let (block, action) = apply(&block, None);
        assert_eq!(
            action,
            Action::Deleted {
                previous: Some("2024-06-02T00:00:00+00:00".into())
            }
        );
        assert!(block.tool(TOOL_NAMESPACE).is_none());

        let (_, action) = apply(&block, None);
        assert_eq!(action, Action::Deleted { previous: None });
        assert_eq!(action.describe(), "no exclude-newer to remove");
    }

    #[test]
    fn clearing_keeps_other_uv_settings() {
        let block = editor::set_tool_value(
            &MetadataBlock::default(),
            TOOL_NAMESPACE,
            "index-url",
            toml::Value::String("https://example.invalid/simple".into()),
        );
        let (block, _) = apply(&block, Some(&end_of_day("2024-01-01").unwrap()));
        let (block, _) = apply(&block, None);
        let uv = block.tool(TOOL_NAMESPACE).unwrap();
        assert!(uv.contains_key("index-url"));
        assert!(!uv.contains_key(EXCLUDE_NEWER_KEY));
    }
}
