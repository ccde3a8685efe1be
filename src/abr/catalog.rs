//! Bitrates advertised by a manifest.

use std::collections::BTreeSet;

const BITRATE_ATTR: &[u8] = b"bitrate=\"";

/// Distinct bitrates (kbit/s) available for a piece of content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitrateCatalog {
    bitrates: BTreeSet<u32>,
}

impl BitrateCatalog {
    /// Collect every `bitrate="<digits>"` attribute in a manifest body.
    ///
    /// Attributes with non-numeric values and a value cut off by the end of
    /// the body are skipped.
    pub fn populate_from_manifest(body: &[u8]) -> Self {
        let mut catalog = Self::default();
        let mut rest = body;

        while let Some(pos) = find(rest, BITRATE_ATTR) {
            let value_start = &rest[pos + BITRATE_ATTR.len()..];
            let Some(close) = value_start.iter().position(|&b| b == b'"') else {
                break;
            };

            if let Some(bitrate) = std::str::from_utf8(&value_start[..close])
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
            {
                catalog.bitrates.insert(bitrate);
            }
            rest = &value_start[close + 1..];
        }

        catalog
    }

    pub fn from_bitrates(bitrates: impl IntoIterator<Item = u32>) -> Self {
        Self {
            bitrates: bitrates.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bitrates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bitrates.len()
    }

    pub fn contains(&self, bitrate: u32) -> bool {
        self.bitrates.contains(&bitrate)
    }

    pub fn lowest(&self) -> Option<u32> {
        self.bitrates.first().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.bitrates.iter().copied()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
