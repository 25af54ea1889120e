use serde::{Deserialize, Serialize};

use crate::SectionRef;

/// Literal marker appended to truncated text.
#[must_use]
pub fn truncation_marker(reference: &SectionRef) -> String {
    format!("... [TRUNCATED. Full content in {reference}]")
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ChunkedContent {
    pub content: String,
    pub truncated: bool,
    pub original_chars: usize,
    /// `file_id#section_id` of the full section, set only when truncated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pointer: Option<String>,
}

/// Cap `text` at `max_chunk_chars` characters (not bytes).
///
/// Text at or under the budget is returned as-is. Longer text keeps exactly its
/// first `max_chunk_chars` characters followed by [`truncation_marker`].
#[must_use]
pub fn truncate_section_text(text: &str, max_chunk_chars: usize, reference: &SectionRef) -> ChunkedContent {
    let original_chars = text.chars().count();
    if original_chars <= max_chunk_chars {
        return ChunkedContent { content: text.to_string(), truncated: false, original_chars, pointer: None };
    }

    let cut = text.char_indices().nth(max_chunk_chars).map_or(text.len(), |(offset, _)| offset);
    let mut content = text[..cut].to_string();
    content.push_str(&truncation_marker(reference));
    ChunkedContent { content, truncated: true, original_chars, pointer: Some(reference.to_string()) }
}
