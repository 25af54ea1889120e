use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::RouterError;

/// Stable citation address of one section: `(file_id, section_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SectionRef {
    pub file_id: String,
    pub section_id: String,
}

impl SectionRef {
    #[must_use]
    pub fn new(file_id: impl Into<String>, section_id: impl Into<String>) -> Self {
        Self { file_id: file_id.into(), section_id: section_id.into() }
    }
}

impl Display for SectionRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.file_id, self.section_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Manifest {
    pub dataset_id: String,
    pub version: String,
    pub source_type: String,
    #[serde(default)]
    pub archived: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
}

impl Manifest {
    /// Validate the identity fields every ingestion run must stamp.
    ///
    /// # Errors
    /// Returns [`RouterError::Validation`] when `dataset_id`, `version`, or
    /// `source_type` is blank.
    pub fn validate(&self) -> Result<(), RouterError> {
        for (name, value) in [
            ("dataset_id", &self.dataset_id),
            ("version", &self.version),
            ("source_type", &self.source_type),
        ] {
            if value.trim().is_empty() {
                return Err(RouterError::Validation(format!("manifest {name} MUST be non-empty")));
            }
        }
        Ok(())
    }
}

/// Data-sovereignty and sensitive-data flags declared for a whole pack.
///
/// A default value has no active policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct SecurityMetadata {
    #[serde(default)]
    pub residency: Option<String>,
    #[serde(default)]
    pub pii: bool,
    #[serde(default)]
    pub phi: bool,
}

impl SecurityMetadata {
    /// Residency region with surrounding whitespace removed; blank counts as unset.
    #[must_use]
    pub fn residency_region(&self) -> Option<&str> {
        self.residency.as_deref().map(str::trim).filter(|region| !region.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DisambiguationRule {
    pub trigger_terms: BTreeSet<String>,
    pub preferred_sections: Vec<SectionRef>,
    pub boost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct SectionToc {
    pub section_id: String,
    pub label: String,
    #[serde(default)]
    pub aliases: BTreeSet<String>,
    #[serde(default)]
    pub entities: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct FileToc {
    pub file_id: String,
    pub sections: Vec<SectionToc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Toc {
    pub toc_id: String,
    pub files: Vec<FileToc>,
    pub security: SecurityMetadata,
    #[serde(default)]
    pub disambiguation_rules: Vec<DisambiguationRule>,
}

impl Toc {
    /// Every `(file_id, section_id)` pointer declared by this TOC, in declaration order.
    pub fn refs(&self) -> impl Iterator<Item = SectionRef> + '_ {
        self.files.iter().flat_map(|file| {
            file.sections.iter().map(|section| SectionRef::new(&file.file_id, &section.section_id))
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Section {
    pub section_id: String,
    pub label: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub entities: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileContent {
    pub file_id: String,
    pub sections: Vec<Section>,
}

/// Immutable aggregate handed over by the ingestion pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgePack {
    pub manifest: Manifest,
    pub toc: Toc,
    pub content: Vec<FileContent>,
}

impl KnowledgePack {
    #[must_use]
    pub fn section(&self, file_id: &str, section_id: &str) -> Option<&Section> {
        self.content
            .iter()
            .filter(|file| file.file_id == file_id)
            .flat_map(|file| file.sections.iter())
            .find(|section| section.section_id == section_id)
    }

    #[must_use]
    pub fn section_count(&self) -> usize {
        self.content.iter().map(|file| file.sections.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_ref_displays_as_pointer() {
        let reference = SectionRef::new("oncology/fever", "neutropenic-fever-1a2b");
        assert_eq!(reference.to_string(), "oncology/fever#neutropenic-fever-1a2b");
    }

    #[test]
    fn blank_residency_counts_as_unset() {
        let security = SecurityMetadata { residency: Some("  ".to_string()), pii: false, phi: false };
        assert_eq!(security.residency_region(), None);

        let security = SecurityMetadata { residency: Some(" US ".to_string()), pii: false, phi: false };
        assert_eq!(security.residency_region(), Some("US"));
    }

    #[test]
    fn manifest_validation_rejects_blank_dataset_id() {
        let manifest = Manifest {
            dataset_id: " ".to_string(),
            version: "1".to_string(),
            source_type: "markdown".to_string(),
            archived: false,
            created_at: None,
        };

        match manifest.validate() {
            Err(RouterError::Validation(message)) => assert!(message.contains("dataset_id")),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn toc_without_security_metadata_is_rejected() {
        let raw = serde_json::json!({
            "toc_id": "toc_1",
            "files": [],
            "disambiguation_rules": []
        });
        assert!(serde_json::from_value::<Toc>(raw).is_err());
    }
}
