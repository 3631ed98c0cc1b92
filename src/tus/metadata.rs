//! Parsing and encoding of the `Upload-Metadata` and `Upload-Concat` headers

use base64::{engine::general_purpose, Engine as _};
use std::collections::HashMap;

use crate::error::{TusError, TusResult};
use crate::storage::UploadId;

/// Parse `key base64value,key2 base64value2`.
///
/// Pairs with an undecodable or non UTF-8 value are skipped, a key without
/// a value maps to an empty string.
pub fn parse_metadata(header: &str) -> HashMap<String, String> {
    let mut metadata = HashMap::new();

    for element in header.split(',') {
        let element = element.trim();
        let mut parts = element.split_whitespace();
        let key = match parts.next() {
            Some(key) => key,
            None => continue,
        };

        let value = match parts.next() {
            Some(encoded) => match general_purpose::STANDARD.decode(encoded) {
                Ok(decoded) => match String::from_utf8(decoded) {
                    Ok(value) => value,
                    Err(_) => continue,
                },
                Err(_) => continue,
            },
            None => String::new(),
        };
        if parts.next().is_some() {
            continue;
        }

        metadata.insert(key.to_string(), value);
    }

    metadata
}

/// Encode metadata for the `Upload-Metadata` response header, keys sorted
pub fn serialize_metadata(metadata: &HashMap<String, String>) -> String {
    let mut keys: Vec<&String> = metadata.keys().collect();
    keys.sort();

    keys.into_iter()
        .map(|key| format!("{} {}", key, general_purpose::STANDARD.encode(&metadata[key])))
        .collect::<Vec<_>>()
        .join(",")
}

/// Value of an `Upload-Concat` request header
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConcatRequest {
    Partial,
    Final(Vec<UploadId>),
}

/// Parse `partial` or `final;<url> <url> ...`.
///
/// Upload URLs are reduced to their last path segment, which is the upload id.
pub fn parse_concat(header: &str) -> TusResult<ConcatRequest> {
    let header = header.trim();
    if header == "partial" {
        return Ok(ConcatRequest::Partial);
    }

    let urls = header.strip_prefix("final;").ok_or(TusError::InvalidConcat)?;
    let ids: Vec<UploadId> = urls
        .split_whitespace()
        .map(|url| url.trim_end_matches('/').rsplit('/').next().unwrap_or_default())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();

    if ids.is_empty() {
        return Err(TusError::InvalidConcat);
    }
    Ok(ConcatRequest::Final(ids))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_metadata() {
        let metadata = parse_metadata("filename d29ybGRfZG9taW5hdGlvbl9wbGFuLnBkZg==, is_confidential, broken !!!");
        assert_eq!(metadata.get("filename").unwrap(), "world_domination_plan.pdf");
        assert_eq!(metadata.get("is_confidential").unwrap(), "");
        assert!(!metadata.contains_key("broken"));
    }

    #[test]
    fn test_metadata_header_roundtrip_is_sorted() {
        let mut metadata = HashMap::new();
        metadata.insert("type".to_string(), "text/plain".to_string());
        metadata.insert("name".to_string(), "a.txt".to_string());

        let header = serialize_metadata(&metadata);
        assert!(header.starts_with("name "));
        assert_eq!(parse_metadata(&header), metadata);
    }

    #[test]
    fn test_parse_concat() {
        assert_eq!(parse_concat("partial").unwrap(), ConcatRequest::Partial);
        assert_eq!(
            parse_concat("final;http://tus.io/files/a /files/b/").unwrap(),
            ConcatRequest::Final(vec!["a".to_string(), "b".to_string()])
        );
        assert!(matches!(parse_concat("final;"), Err(TusError::InvalidConcat)));
        assert!(matches!(parse_concat("whole"), Err(TusError::InvalidConcat)));
    }
}
