use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{KnowledgePack, RouterError, SectionRef};

const SLUG_MAX_CHARS: usize = 48;
const SECTION_HASH_HEX: usize = 12;

fn slugify(value: &str) -> String {
    let mut slug = String::new();
    let mut pending_dash = false;
    for ch in value.chars().flat_map(char::to_lowercase) {
        if ch.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch);
        } else {
            pending_dash = true;
        }
        if slug.chars().count() >= SLUG_MAX_CHARS {
            break;
        }
    }

    if slug.is_empty() {
        "section".to_string()
    } else {
        slug
    }
}

fn normalized_label(label: &str) -> String {
    label.split_whitespace().map(str::to_lowercase).collect::<Vec<_>>().join(" ")
}

/// Derive a section id from its file identity, label, and the label's occurrence
/// index within the file (0 for the first section carrying that label).
///
/// The result depends on nothing else: not ingestion order, clock, or randomness.
#[must_use]
pub fn derive_section_id(file_id: &str, label: &str, occurrence: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(normalized_label(label).as_bytes());
    hasher.update([0x1f]);
    hasher.update(occurrence.to_string().as_bytes());
    let digest_hex = format!("{:x}", hasher.finalize());
    format!("{}-{}", slugify(label), &digest_hex[..SECTION_HASH_HEX])
}

/// Derive a file id from a source-relative path: forward slashes, lowercase,
/// extension dropped.
#[must_use]
pub fn derive_file_id(relative_path: &str) -> String {
    let unified = relative_path.replace('\\', "/");
    let mut components = unified
        .split('/')
        .filter(|component| !component.is_empty() && *component != ".")
        .collect::<Vec<_>>();
    if let Some(last) = components.last_mut() {
        if let Some((stem, _)) = last.rsplit_once('.') {
            if !stem.is_empty() {
                *last = stem;
            }
        }
    }
    components
        .into_iter()
        .map(|component| component.split_whitespace().collect::<Vec<_>>().join("-").to_lowercase())
        .collect::<Vec<_>>()
        .join("/")
}

/// Every citation address the pack's TOC declares.
#[must_use]
pub fn section_id_set(pack: &KnowledgePack) -> BTreeSet<SectionRef> {
    pack.toc.refs().collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct CitationDiff {
    pub added: Vec<SectionRef>,
    pub removed: Vec<SectionRef>,
}

impl CitationDiff {
    #[must_use]
    pub fn is_stable(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[must_use]
pub fn diff_section_ids(before: &KnowledgePack, after: &KnowledgePack) -> CitationDiff {
    let before = section_id_set(before);
    let after = section_id_set(after);
    CitationDiff {
        added: after.difference(&before).cloned().collect(),
        removed: before.difference(&after).cloned().collect(),
    }
}

/// SHA-256 over the pack's JSON encoding, as lowercase hex.
///
/// # Errors
/// Returns [`RouterError::Validation`] when the pack cannot be encoded.
pub fn pack_digest(pack: &KnowledgePack) -> Result<String, RouterError> {
    let bytes = serde_json::to_vec(pack)
        .map_err(|err| RouterError::Validation(format!("pack is not serializable: {err}")))?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

/// Generation id for a pack: `gen_` plus the first 16 hex digits of [`pack_digest`].
///
/// # Errors
/// Returns [`RouterError::Validation`] when the pack cannot be encoded.
pub fn generation_id(pack: &KnowledgePack) -> Result<String, RouterError> {
    let digest = pack_digest(pack)?;
    Ok(format!("gen_{}", &digest[..16]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixture_pack;

    #[test]
    fn section_id_is_stable_and_readable() {
        let first = derive_section_id("oncology/fever", "Neutropenic Fever", 0);
        let second = derive_section_id("oncology/fever", "Neutropenic Fever", 0);
        assert_eq!(first, second);
        assert!(first.starts_with("neutropenic-fever-"));
        assert_eq!(first.len(), "neutropenic-fever-".len() + SECTION_HASH_HEX);
    }

    #[test]
    fn section_id_ignores_label_whitespace_and_case() {
        assert_eq!(
            derive_section_id("f", "Neutropenic   Fever", 0),
            derive_section_id("f", "neutropenic fever", 0)
        );
    }

    #[test]
    fn section_id_separates_files_and_occurrences() {
        let base = derive_section_id("oncology/fever", "Overview", 0);
        assert_ne!(base, derive_section_id("oncology/sepsis", "Overview", 0));
        assert_ne!(base, derive_section_id("oncology/fever", "Overview", 1));
    }

    #[test]
    fn symbol_only_label_gets_placeholder_slug() {
        assert!(derive_section_id("f", "???", 0).starts_with("section-"));
    }

    #[test]
    fn file_id_normalizes_paths() {
        assert_eq!(derive_file_id("./Oncology/Neutropenic Fever.md"), "oncology/neutropenic-fever");
        assert_eq!(derive_file_id("guides\\sepsis.markdown"), "guides/sepsis");
        assert_eq!(derive_file_id("README"), "readme");
    }

    #[test]
    fn identical_packs_have_no_citation_drift() {
        let diff = diff_section_ids(&fixture_pack(), &fixture_pack());
        assert!(diff.is_stable());
    }

    #[test]
    fn relabeled_section_shows_up_in_diff() {
        let before = fixture_pack();
        let mut after = fixture_pack();
        after.toc.files[0].sections[0].section_id = "renamed".to_string();

        let diff = diff_section_ids(&before, &after);
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.removed.len(), 1);
        assert_eq!(diff.added[0].section_id, "renamed");
    }

    #[test]
    fn generation_id_tracks_content() {
        let pack = fixture_pack();
        let first = generation_id(&pack).unwrap_or_else(|err| panic!("digest failed: {err}"));
        let again = generation_id(&pack).unwrap_or_else(|err| panic!("digest failed: {err}"));
        assert_eq!(first, again);
        assert!(first.starts_with("gen_"));

        let mut changed = fixture_pack();
        changed.manifest.version = "2".to_string();
        let other = generation_id(&changed).unwrap_or_else(|err| panic!("digest failed: {err}"));
        assert_ne!(first, other);
    }
}
