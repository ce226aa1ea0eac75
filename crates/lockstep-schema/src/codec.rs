//! Embedding lock metadata into explicit lock files and reading it back.
//!
//! A rich lock carries a JSON block between two comment sentinels ahead of the
//! `@EXPLICIT` marker:
//!
//! ```text
//! # platform: linux-64
//! # @METADATA_INIT
//! # {
//! #   "package_name": "demo",
//! #   ...
//! # }
//! # @METADATA_END
//! @EXPLICIT
//! https://conda.anaconda.org/conda-forge/linux-64/python-3.9.7-hb7a2778_3.tar.bz2
//! ```
//!
//! A lock without the block is a plain lock: it decodes to `metadata: None`.

use crate::lock::{LockError, LockMetadata, EXPLICIT_MARKER};

pub const METADATA_INIT: &str = "@METADATA_INIT";
pub const METADATA_END: &str = "@METADATA_END";

const COMMENT: &str = "#";

/// A decoded explicit lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedLock {
    /// Header lines with any metadata block removed.
    pub header: String,
    pub metadata: Option<LockMetadata>,
    /// Everything after the marker token, byte for byte.
    pub body: String,
}

impl DecodedLock {
    pub fn artifacts(&self) -> Vec<String> {
        self.body
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_owned)
            .collect()
    }
}

/// Embed `metadata` into an explicit lock, replacing any block already present.
///
/// The artifact list after the marker is preserved exactly.
pub fn encode(text: &str, metadata: &LockMetadata) -> Result<String, LockError> {
    let (marker_start, marker_end) = find_marker(text)?;
    let header = strip_metadata_block(&text[..marker_start])?;
    let body = &text[marker_end..];

    let json = serde_json::to_string_pretty(metadata)?;
    let mut out = String::with_capacity(text.len() + json.len() * 2);
    out.push_str(&header);
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&format!("{COMMENT} {METADATA_INIT}\n"));
    for line in json.lines() {
        out.push_str(&format!("{COMMENT} {line}\n"));
    }
    out.push_str(&format!("{COMMENT} {METADATA_END}\n"));
    out.push_str(EXPLICIT_MARKER);
    out.push_str(body);
    Ok(out)
}

/// Split a lock into header, optional metadata, and artifact body.
///
/// Missing marker and a present-but-unparseable block are both
/// `MalformedLockFile`; no sentinels at all is a plain lock.
pub fn decode(text: &str) -> Result<DecodedLock, LockError> {
    let (marker_start, marker_end) = find_marker(text)?;
    let head = &text[..marker_start];

    let metadata = match extract_block(head)? {
        Some(json) => Some(serde_json::from_str::<LockMetadata>(&json).map_err(|e| {
            LockError::MalformedLockFile(format!("corrupted metadata block: {e}"))
        })?),
        None => None,
    };

    Ok(DecodedLock {
        header: strip_metadata_block(head)?,
        metadata,
        body: text[marker_end..].to_owned(),
    })
}

/// The package name a consumer should use for this lock.
///
/// An explicit override is used as given. Without one the embedded name is
/// required. The override never excuses corrupted metadata: that has already
/// failed in [`decode`].
pub fn resolve_package_name(
    decoded: &DecodedLock,
    name_override: Option<&str>,
    source: &str,
) -> Result<String, LockError> {
    package_name_from(decoded.metadata.as_ref(), name_override, source)
}

/// Same as [`resolve_package_name`] for metadata that is already parsed.
pub fn package_name_from(
    metadata: Option<&LockMetadata>,
    name_override: Option<&str>,
    source: &str,
) -> Result<String, LockError> {
    let embedded = metadata.and_then(|m| m.package_name.as_deref());
    match (embedded, name_override) {
        (Some(name), Some(over)) if name != over => {
            tracing::warn!("{source}: lock is for '{name}', using the override '{over}'");
            Ok(over.to_owned())
        }
        (_, Some(over)) => Ok(over.to_owned()),
        (Some(name), None) => Ok(name.to_owned()),
        (None, None) => Err(LockError::PackageNameRequired(source.to_owned())),
    }
}

fn find_marker(text: &str) -> Result<(usize, usize), LockError> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if line.trim() == EXPLICIT_MARKER {
            let start = offset + line.find(EXPLICIT_MARKER).unwrap_or(0);
            return Ok((start, start + EXPLICIT_MARKER.len()));
        }
        offset += line.len();
    }
    Err(LockError::MalformedLockFile(format!(
        "no {EXPLICIT_MARKER} marker found"
    )))
}

fn is_sentinel(line: &str, sentinel: &str) -> bool {
    line.trim()
        .strip_prefix(COMMENT)
        .is_some_and(|rest| rest.trim() == sentinel)
}

/// Locate the sentinel pair in `head`. Returns line indices of INIT and END.
fn sentinel_lines(head: &str) -> Result<Option<(usize, usize)>, LockError> {
    let lines: Vec<&str> = head.lines().collect();
    let init = lines.iter().position(|l| is_sentinel(l, METADATA_INIT));
    let end = lines.iter().position(|l| is_sentinel(l, METADATA_END));
    match (init, end) {
        (None, None) => Ok(None),
        (Some(i), Some(e)) if i < e => Ok(Some((i, e))),
        (Some(_), Some(_)) => Err(LockError::MalformedLockFile(format!(
            "{METADATA_END} appears before {METADATA_INIT}"
        ))),
        (Some(_), None) => Err(LockError::MalformedLockFile(format!(
            "{METADATA_INIT} without {METADATA_END}"
        ))),
        (None, Some(_)) => Err(LockError::MalformedLockFile(format!(
            "{METADATA_END} without {METADATA_INIT}"
        ))),
    }
}

fn extract_block(head: &str) -> Result<Option<String>, LockError> {
    let Some((init, end)) = sentinel_lines(head)? else {
        return Ok(None);
    };
    let json: Vec<&str> = head
        .lines()
        .skip(init + 1)
        .take(end - init - 1)
        .map(|l| {
            let l = l.trim_start();
            let l = l.strip_prefix(COMMENT).unwrap_or(l);
            l.strip_prefix(' ').unwrap_or(l)
        })
        .collect();
    Ok(Some(json.join("\n")))
}

fn strip_metadata_block(head: &str) -> Result<String, LockError> {
    let Some((init, end)) = sentinel_lines(head)? else {
        return Ok(head.to_owned());
    };
    let mut out = String::with_capacity(head.len());
    for (i, line) in head.split_inclusive('\n').enumerate() {
        if i < init || i > end {
            out.push_str(line);
        }
    }
    Ok(out)
}
