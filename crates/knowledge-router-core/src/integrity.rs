use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::text::normalize_terms;
use crate::{KnowledgePack, RouterError, SectionRef};

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RuleTarget {
    pub rule_index: usize,
    pub section: SectionRef,
}

/// Load-time health probe for one Knowledge Pack.
///
/// Everything except `orphan_sections` blocks serving.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct IntegrityReport {
    pub toc_sections: usize,
    pub content_sections: usize,
    pub manifest_errors: Vec<String>,
    pub broken_pointers: Vec<SectionRef>,
    pub duplicate_file_ids: Vec<String>,
    pub duplicate_section_ids: Vec<SectionRef>,
    pub dangling_rule_targets: Vec<RuleTarget>,
    pub invalid_rules: Vec<String>,
    pub orphan_sections: Vec<SectionRef>,
}

impl IntegrityReport {
    #[must_use]
    pub fn is_servable(&self) -> bool {
        self.manifest_errors.is_empty()
            && self.broken_pointers.is_empty()
            && self.duplicate_file_ids.is_empty()
            && self.duplicate_section_ids.is_empty()
            && self.dangling_rule_targets.is_empty()
            && self.invalid_rules.is_empty()
    }

    #[must_use]
    pub fn fatal_messages(&self) -> Vec<String> {
        let mut messages = self.manifest_errors.clone();
        messages.extend(
            self.broken_pointers
                .iter()
                .map(|reference| format!("toc pointer {reference} has no content section")),
        );
        messages.extend(
            self.duplicate_file_ids.iter().map(|file_id| format!("file_id {file_id} is declared twice")),
        );
        messages.extend(
            self.duplicate_section_ids
                .iter()
                .map(|reference| format!("section {reference} is declared twice")),
        );
        messages.extend(self.dangling_rule_targets.iter().map(|target| {
            format!(
                "disambiguation rule {} prefers missing section {}",
                target.rule_index, target.section
            )
        }));
        messages.extend(self.invalid_rules.iter().cloned());
        messages
    }
}

fn push_duplicates<T, I>(values: I, duplicates: &mut Vec<T>)
where
    T: Ord + Clone,
    I: IntoIterator<Item = T>,
{
    let mut seen = BTreeSet::new();
    for value in values {
        if !seen.insert(value.clone()) && !duplicates.contains(&value) {
            duplicates.push(value);
        }
    }
}

/// Probe every pointer the pack declares against its content.
#[must_use]
pub fn check_integrity(pack: &KnowledgePack) -> IntegrityReport {
    let mut report = IntegrityReport {
        toc_sections: pack.toc.files.iter().map(|file| file.sections.len()).sum(),
        content_sections: pack.section_count(),
        ..IntegrityReport::default()
    };

    if let Err(err) = pack.manifest.validate() {
        report.manifest_errors.push(err.to_string());
    }

    push_duplicates(pack.toc.files.iter().map(|file| file.file_id.clone()), &mut report.duplicate_file_ids);
    push_duplicates(
        pack.content.iter().map(|file| file.file_id.clone()),
        &mut report.duplicate_file_ids,
    );
    push_duplicates(pack.toc.refs(), &mut report.duplicate_section_ids);
    push_duplicates(
        pack.content.iter().flat_map(|file| {
            file.sections.iter().map(|section| SectionRef::new(&file.file_id, &section.section_id))
        }),
        &mut report.duplicate_section_ids,
    );

    let content_refs = pack
        .content
        .iter()
        .flat_map(|file| {
            file.sections.iter().map(|section| SectionRef::new(&file.file_id, &section.section_id))
        })
        .collect::<BTreeSet<_>>();
    let toc_refs = pack.toc.refs().collect::<BTreeSet<_>>();

    report.broken_pointers = toc_refs.difference(&content_refs).cloned().collect();
    report.orphan_sections = content_refs.difference(&toc_refs).cloned().collect();

    for (rule_index, rule) in pack.toc.disambiguation_rules.iter().enumerate() {
        if rule.trigger_terms.is_empty() {
            report
                .invalid_rules
                .push(format!("disambiguation rule {rule_index} has no trigger terms"));
        }
        for term in &rule.trigger_terms {
            if normalize_terms(term).is_empty() {
                report.invalid_rules.push(format!(
                    "disambiguation rule {rule_index} trigger term {term:?} has no word characters"
                ));
            }
        }
        if !rule.boost.is_finite() || rule.boost <= 0.0 {
            report.invalid_rules.push(format!(
                "disambiguation rule {rule_index} boost MUST be finite and > 0, got {}",
                rule.boost
            ));
        }
        for preferred in &rule.preferred_sections {
            if !toc_refs.contains(preferred) {
                report
                    .dangling_rule_targets
                    .push(RuleTarget { rule_index, section: preferred.clone() });
            }
        }
    }

    report
}

/// Run [`check_integrity`] and refuse packs that must not be served.
///
/// # Errors
/// Returns [`RouterError::Integrity`] listing every fatal defect.
pub fn ensure_servable(pack: &KnowledgePack) -> Result<IntegrityReport, RouterError> {
    let report = check_integrity(pack);
    if report.is_servable() {
        return Ok(report);
    }

    let messages = report.fatal_messages();
    tracing::error!(
        dataset_id = %pack.manifest.dataset_id,
        defects = messages.len(),
        "knowledge pack failed integrity check"
    );
    Err(RouterError::Integrity(messages.join("; ")))
}
