//! Request URI classification and segment name handling.
//!
//! Segment files follow the `<bitrate>Seg<N>-Frag<M><suffix>` naming
//! convention, e.g. `/vod/500Seg3-Frag7.f4f`.

use crate::http::ProtocolError;

/// Marker identifying manifest requests.
pub const MANIFEST_MARKER: &str = ".f4m";
/// Marker identifying video segment requests.
pub const CHUNK_MARKER: &str = "-Frag";

const SEG_TOKEN: &str = "Seg";
const FRAG_TOKEN: &str = "-Frag";
const NOLIST_SUFFIX: &str = "_nolist";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Manifest,
    Segment,
    Other,
}

/// Fields decoded from a segment file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentName {
    /// Bitrate the player asked for; replaced on rewrite.
    pub bitrate: Option<u32>,
    pub segment_no: u32,
    pub fragment_no: u32,
    /// Whatever follows the fragment number (extension, query).
    pub suffix: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUri {
    pub kind: ContentKind,
    /// Directory part, trailing slash included.
    pub path: String,
    pub file_name: String,
    pub segment: Option<SegmentName>,
}

pub fn classify_uri(uri: &str) -> ContentKind {
    if uri.contains(MANIFEST_MARKER) {
        ContentKind::Manifest
    } else if uri.contains(CHUNK_MARKER) {
        ContentKind::Segment
    } else {
        ContentKind::Other
    }
}

/// Split and classify a request URI.
pub fn parse_uri(uri: &str) -> Result<ParsedUri, ProtocolError> {
    let kind = classify_uri(uri);
    let split = uri.rfind('/').map(|i| i + 1).unwrap_or(0);
    let (path, file_name) = uri.split_at(split);

    let segment = match kind {
        ContentKind::Segment => Some(parse_segment_name(file_name)?),
        _ => None,
    };

    Ok(ParsedUri {
        kind,
        path: path.to_owned(),
        file_name: file_name.to_owned(),
        segment,
    })
}

/// Decode `<bitrate>Seg<N>-Frag<M><suffix>`.
pub fn parse_segment_name(file_name: &str) -> Result<SegmentName, ProtocolError> {
    let (bitrate_digits, rest) = split_digits(file_name);
    let bitrate = if bitrate_digits.is_empty() {
        None
    } else {
        Some(bitrate_digits.parse().map_err(|_| ProtocolError::BadRequest)?)
    };

    let rest = rest.strip_prefix(SEG_TOKEN).ok_or(ProtocolError::BadRequest)?;
    let (segment_digits, rest) = split_digits(rest);
    let rest = rest.strip_prefix(FRAG_TOKEN).ok_or(ProtocolError::BadRequest)?;
    let (fragment_digits, suffix) = split_digits(rest);

    if segment_digits.is_empty() || fragment_digits.is_empty() {
        return Err(ProtocolError::BadRequest);
    }

    Ok(SegmentName {
        bitrate,
        segment_no: segment_digits.parse().map_err(|_| ProtocolError::BadRequest)?,
        fragment_no: fragment_digits.parse().map_err(|_| ProtocolError::BadRequest)?,
        suffix: suffix.to_owned(),
    })
}

/// Segment URI for the same segment/fragment at `bitrate`.
///
/// Returns `None` when `parsed` is not a segment.
pub fn rewrite_segment_uri(parsed: &ParsedUri, bitrate: u32) -> Option<String> {
    let segment = parsed.segment.as_ref()?;
    Some(format!(
        "{}{}{}{}{}{}{}",
        parsed.path,
        bitrate,
        SEG_TOKEN,
        segment.segment_no,
        FRAG_TOKEN,
        segment.fragment_no,
        segment.suffix
    ))
}

/// URI of the manifest variant without a bitrate list.
pub fn nolist_manifest_uri(uri: &str) -> String {
    match uri.rfind(MANIFEST_MARKER) {
        Some(pos) => format!("{}{}{}", &uri[..pos], NOLIST_SUFFIX, &uri[pos..]),
        None => uri.to_owned(),
    }
}

fn split_digits(s: &str) -> (&str, &str) {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    s.split_at(end)
}
