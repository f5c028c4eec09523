//! Composite identifier codec.
//!
//! Resource IDs are ordered tuples of integers joined with `:`
//! (`policyID:conditionID`, `accountID:ruleID`). Entity GUIDs are the
//! unpadded standard base64 form of `{account}|AIOPS|{type}|{id}`.

use std::fmt;

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;

/// Separator between the components of a composite ID.
pub const ID_SEPARATOR: &str = ":";

/// Domain segment of alert entity GUIDs.
const AIOPS_DOMAIN: &str = "AIOPS";

/// Errors raised while decoding identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("an ID must have at least one component")]
    ZeroCount,

    #[error("unable to parse ID {id:?}: expected {expected} components, found {found}")]
    SegmentCount {
        id: String,
        expected: usize,
        found: usize,
    },

    #[error("unable to parse ID {id:?}: component {segment:?} is not an integer")]
    NotAnInteger {
        id: String,
        segment: String,
        /// Components that parsed before the failure.
        parsed: Vec<i64>,
    },

    #[error("unable to parse ID {id:?}: {reason}")]
    Malformed { id: String, reason: String },
}

impl IdError {
    /// The components that were decoded before the error, if any.
    ///
    /// Only for diagnostics; a partially parsed ID is never a valid result.
    pub fn parsed_prefix(&self) -> &[i64] {
        match self {
            IdError::NotAnInteger { parsed, .. } => parsed,
            _ => &[],
        }
    }
}

/// Join integer components with `:`.
pub fn serialize_ids(ids: &[i64]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(ID_SEPARATOR)
}

/// Parse exactly `count` integer components out of `serialized`.
///
/// The input is split into at most `count` parts, so surplus separators end
/// up inside the last component and fail integer parsing.
pub fn parse_ids(serialized: &str, count: usize) -> Result<Vec<i64>, IdError> {
    if count == 0 {
        return Err(IdError::ZeroCount);
    }

    let segments: Vec<&str> = serialized.splitn(count, ID_SEPARATOR).collect();
    if segments.len() != count {
        return Err(IdError::SegmentCount {
            id: serialized.to_string(),
            expected: count,
            found: segments.len(),
        });
    }

    parse_segments(serialized, &segments)
}

/// Parse a variable number of integer components.
///
/// Used where an ID grew a component over time (`policyID` and
/// `policyID:accountID` are both valid alert policy IDs).
pub fn parse_hashed_ids(serialized: &str) -> Result<Vec<i64>, IdError> {
    let segments: Vec<&str> = serialized.split(ID_SEPARATOR).collect();
    parse_segments(serialized, &segments)
}

fn parse_segments(serialized: &str, segments: &[&str]) -> Result<Vec<i64>, IdError> {
    let mut ids = Vec::with_capacity(segments.len());
    for segment in segments {
        match segment.parse::<i64>() {
            Ok(id) => ids.push(id),
            Err(_) => {
                return Err(IdError::NotAnInteger {
                    id: serialized.to_string(),
                    segment: segment.to_string(),
                    parsed: ids,
                })
            }
        }
    }
    Ok(ids)
}

/// Build the GUID of an alert entity.
///
/// `entity_guid("CONDITION", 42, 99)` encodes `99|AIOPS|CONDITION|42`.
pub fn entity_guid(entity_type: &str, id: i64, account_id: i64) -> String {
    let raw = format!("{account_id}|{AIOPS_DOMAIN}|{entity_type}|{id}");
    STANDARD_NO_PAD.encode(raw)
}

/// GUID of an alert condition.
pub fn condition_entity_guid(condition_id: i64, account_id: i64) -> String {
    entity_guid("CONDITION", condition_id, account_id)
}

/// Extract the monitor ID (fourth `|` segment) from a synthetics monitor GUID.
pub fn monitor_id_from_guid(guid: &str) -> Result<String, IdError> {
    let malformed = |reason: &str| IdError::Malformed {
        id: guid.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = guid.trim_end_matches('=');
    let bytes = STANDARD_NO_PAD
        .decode(trimmed)
        .or_else(|_| STANDARD.decode(guid))
        .map_err(|_| malformed("not valid base64"))?;
    let decoded = String::from_utf8(bytes).map_err(|_| malformed("not valid UTF-8"))?;

    let segments: Vec<&str> = decoded.split('|').collect();
    if segments.len() < 4 {
        return Err(malformed("expected at least 4 segments"));
    }
    Ok(segments[3].to_string())
}

/// An import ID split into the resource ID and an optional trailing
/// metadata component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportId {
    pub id: String,
    pub metadata: Option<String>,
}

/// Split an import ID that may carry one extra trailing component.
///
/// With `default_count == 2`, `"1:2"` has no metadata and `"1:2:3"` yields
/// ID `"1:2"` and metadata `"3"`.
pub fn split_import_id(raw: &str, default_count: usize) -> Result<ImportId, IdError> {
    if default_count == 0 {
        return Err(IdError::ZeroCount);
    }

    let segments: Vec<&str> = raw.split(ID_SEPARATOR).collect();
    if segments.len() < default_count || segments.len() > default_count + 1 {
        return Err(IdError::SegmentCount {
            id: raw.to_string(),
            expected: default_count,
            found: segments.len(),
        });
    }

    if segments.len() == default_count {
        return Ok(ImportId {
            id: raw.to_string(),
            metadata: None,
        });
    }

    Ok(ImportId {
        id: segments[..default_count].join(ID_SEPARATOR),
        metadata: segments.last().map(|s| s.to_string()),
    })
}

/// `accountID:ruleID` where the rule ID is opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountScopedId {
    pub account_id: i64,
    pub rule_id: String,
}

impl AccountScopedId {
    pub fn new(account_id: i64, rule_id: impl Into<String>) -> Result<Self, IdError> {
        let rule_id = rule_id.into();
        if rule_id.is_empty() || rule_id.contains(ID_SEPARATOR) {
            return Err(IdError::Malformed {
                id: rule_id,
                reason: "rule ID must be non-empty and must not contain ':'".to_string(),
            });
        }
        Ok(Self {
            account_id,
            rule_id,
        })
    }

    pub fn parse(serialized: &str) -> Result<Self, IdError> {
        let segments: Vec<&str> = serialized.split(ID_SEPARATOR).collect();
        if segments.len() != 2 {
            return Err(IdError::SegmentCount {
                id: serialized.to_string(),
                expected: 2,
                found: segments.len(),
            });
        }

        let account_id = segments[0]
            .parse::<i64>()
            .map_err(|_| IdError::NotAnInteger {
                id: serialized.to_string(),
                segment: segments[0].to_string(),
                parsed: vec![],
            })?;
        Self::new(account_id, segments[1]).map_err(|_| IdError::Malformed {
            id: serialized.to_string(),
            reason: "empty rule ID".to_string(),
        })
    }
}

impl fmt::Display for AccountScopedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.account_id, ID_SEPARATOR, self.rule_id)
    }
}
