//! ICY metadata framing helpers
//!
//! The ICY sub-protocol embeds a metadata frame every fixed number of raw
//! audio bytes: one length byte `L` (0 = "no change") followed, when
//! nonzero, by exactly `L * 16` bytes of text padded with NULs to the next
//! multiple of 16.

use crate::config::buffer::METADATA_ALIGNMENT;

/// Largest metadata block a single length byte can describe.
const MAX_METADATA_LEN: usize = 255 * METADATA_ALIGNMENT;

/// Round a metadata length up to the next multiple of the alignment.
/// An empty block still occupies one full alignment unit.
pub fn align_metadata_len(len: usize) -> usize {
    if len == 0 {
        return METADATA_ALIGNMENT;
    }
    len + METADATA_ALIGNMENT - (len % METADATA_ALIGNMENT)
}

/// Encode metadata text into a null-padded, 16-byte-aligned block.
///
/// Returns `None` when the text cannot be represented: non-ASCII input or
/// a block too large for the single length byte. Callers drop the update
/// and keep the previous metadata rather than corrupting the stream.
pub fn encode_metadata(text: &str) -> Option<Vec<u8>> {
    if !text.is_ascii() {
        return None;
    }

    let padded = align_metadata_len(text.len());
    if padded > MAX_METADATA_LEN {
        return None;
    }

    let mut block = vec![0u8; padded];
    block[..text.len()].copy_from_slice(text.as_bytes());
    Some(block)
}

/// Decode a raw metadata block: lossy UTF-8 with trailing NUL padding stripped.
pub fn decode_metadata(raw: &[u8]) -> String {
    let end = raw
        .iter()
        .rposition(|&b| b != 0)
        .map(|p| p + 1)
        .unwrap_or(0);
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Parse a metadata string to extract the StreamTitle value.
///
/// ICY metadata format: `StreamTitle='Artist - Song';StreamUrl='...';`
pub fn parse_stream_title(metadata: &str) -> Option<String> {
    let start = metadata.find("StreamTitle='")? + "StreamTitle='".len();
    let end = metadata[start..].find("';")?;
    let title = metadata[start..start + end].trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}
