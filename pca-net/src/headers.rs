// pca-net/src/headers.rs
use pca_common::error::{PcaError, Result};
use pca_common::model::{ArchiveType, ArtifactHead};
use reqwest::header::{HeaderMap, CONTENT_RANGE, CONTENT_TYPE};

/// Byte range announced by `Content-Range: bytes <start>-<end>/<size>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
    pub size: u64,
}

pub fn parse_content_range(value: &str) -> Result<ContentRange> {
    let bad = || PcaError::Api(format!("Malformed Content-Range header '{value}'"));
    let (_unit, spec) = value.trim().split_once(' ').ok_or_else(bad)?;
    let (range, size) = spec.split_once('/').ok_or_else(bad)?;
    let (start, end) = range.split_once('-').ok_or_else(bad)?;
    Ok(ContentRange {
        start: start.trim().parse().map_err(|_| bad())?,
        end: end.trim().parse().map_err(|_| bad())?,
        size: size.trim().parse().map_err(|_| bad())?,
    })
}

/// `Digest: <algorithm>:<value>`
pub fn parse_digest(value: &str) -> Result<(String, String)> {
    match value.trim().split_once(':') {
        Some((alg, digest)) if !alg.is_empty() && !digest.is_empty() => {
            Ok((alg.to_string(), digest.to_string()))
        }
        _ => Err(PcaError::Api(format!("Malformed Digest header '{value}'"))),
    }
}

/// Archive type is the subtype of `Content-Type: <type>/<archive>`.
pub fn parse_content_type(value: &str) -> Result<ArchiveType> {
    let essence = value.split(';').next().unwrap_or(value).trim();
    match essence.split_once('/') {
        Some((_, subtype)) if !subtype.is_empty() => Ok(ArchiveType::from(subtype.to_string())),
        _ => Err(PcaError::Api(format!(
            "Malformed Content-Type header '{value}'"
        ))),
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str> {
    headers
        .get(name)
        .ok_or_else(|| PcaError::Api(format!("Missing {name} header")))?
        .to_str()
        .map_err(|e| PcaError::Api(format!("Invalid {name} header: {e}")))
}

pub fn parse_artifact_head(headers: &HeaderMap) -> Result<ArtifactHead> {
    let range = parse_content_range(header(headers, CONTENT_RANGE.as_str())?)?;
    let (hash_algorithm, hash_value) = parse_digest(header(headers, "digest")?)?;
    let archive_type = parse_content_type(header(headers, CONTENT_TYPE.as_str())?)?;
    Ok(ArtifactHead {
        size: range.size,
        hash_algorithm,
        hash_value,
        archive_type,
    })
}
