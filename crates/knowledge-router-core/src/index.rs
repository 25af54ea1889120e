use std::collections::{BTreeMap, BTreeSet};

use crate::integrity::ensure_servable;
use crate::text::{normalize_all, normalize_terms};
use crate::{KnowledgePack, Manifest, RouterError, Section, SectionRef, SecurityMetadata};

#[derive(Debug, Clone)]
pub(crate) struct IndexedSection {
    pub reference: SectionRef,
    pub label: String,
    pub aliases: BTreeSet<String>,
    pub entities: BTreeSet<String>,
    pub label_terms: BTreeSet<String>,
    pub text_terms: BTreeSet<String>,
    /// Label and body terms together; the text signal scores each term once.
    pub label_text_terms: BTreeSet<String>,
    /// Alias terms, including the canonical label.
    pub alias_terms: BTreeSet<String>,
    pub entity_terms: BTreeSet<String>,
    file_position: usize,
    section_position: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct IndexedRule {
    pub rule_index: usize,
    pub trigger_terms: BTreeSet<String>,
    pub preferred: BTreeSet<usize>,
    pub boost: f64,
}

/// Read-only lookup structures over one Knowledge Pack.
///
/// Built once per generation; nothing mutates it afterwards, so it can be shared
/// behind an `Arc` by any number of concurrent readers.
#[derive(Debug, Clone)]
pub struct CorpusIndex {
    pack: KnowledgePack,
    entries: Vec<IndexedSection>,
    by_ref: BTreeMap<SectionRef, usize>,
    file_sections: BTreeMap<String, Vec<String>>,
    postings: BTreeMap<String, BTreeSet<usize>>,
    alias_phrases: BTreeMap<String, BTreeSet<usize>>,
    entity_tags: BTreeMap<String, BTreeSet<usize>>,
    rules: Vec<IndexedRule>,
}

fn phrase_key(value: &str) -> String {
    value.split_whitespace().map(str::to_lowercase).collect::<Vec<_>>().join(" ")
}

fn content_positions(pack: &KnowledgePack) -> BTreeMap<SectionRef, (usize, usize)> {
    let mut positions = BTreeMap::new();
    for (file_position, file) in pack.content.iter().enumerate() {
        for (section_position, section) in file.sections.iter().enumerate() {
            positions.insert(
                SectionRef::new(&file.file_id, &section.section_id),
                (file_position, section_position),
            );
        }
    }
    positions
}

impl CorpusIndex {
    /// Validate pointer integrity and build every lookup structure.
    ///
    /// # Errors
    /// Returns [`RouterError::Integrity`] when the pack has broken pointers, duplicate
    /// ids, or invalid disambiguation rules.
    pub fn build(pack: KnowledgePack) -> Result<Self, RouterError> {
        ensure_servable(&pack)?;
        let positions = content_positions(&pack);

        let mut entries = Vec::new();
        for file in &pack.toc.files {
            for toc_section in &file.sections {
                let reference = SectionRef::new(&file.file_id, &toc_section.section_id);
                let Some(&(file_position, section_position)) = positions.get(&reference) else {
                    return Err(RouterError::Integrity(format!(
                        "toc pointer {reference} has no content section"
                    )));
                };
                let section = &pack.content[file_position].sections[section_position];

                let mut entities = toc_section.entities.clone();
                entities.extend(section.entities.iter().cloned());

                let label_terms = normalize_terms(&toc_section.label);
                let text_terms = normalize_terms(&section.text);
                let label_text_terms = label_terms.union(&text_terms).cloned().collect();
                let mut alias_terms = normalize_all(toc_section.aliases.iter().map(String::as_str));
                alias_terms.extend(label_terms.iter().cloned());

                entries.push(IndexedSection {
                    reference,
                    label: toc_section.label.clone(),
                    aliases: toc_section.aliases.clone(),
                    entity_terms: normalize_all(entities.iter().map(String::as_str)),
                    entities,
                    label_terms,
                    text_terms,
                    label_text_terms,
                    alias_terms,
                    file_position,
                    section_position,
                });
            }
        }
        entries.sort_by(|lhs, rhs| lhs.reference.cmp(&rhs.reference));

        let mut by_ref = BTreeMap::new();
        let mut file_sections: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut postings: BTreeMap<String, BTreeSet<usize>> = BTreeMap::new();
        let mut alias_phrases: BTreeMap<String, BTreeSet<usize>> = BTreeMap::new();
        let mut entity_tags: BTreeMap<String, BTreeSet<usize>> = BTreeMap::new();

        for (position, entry) in entries.iter().enumerate() {
            by_ref.insert(entry.reference.clone(), position);
            for term in entry.label_text_terms.iter().chain(&entry.alias_terms)
                .chain(&entry.entity_terms)
            {
                postings.entry(term.clone()).or_default().insert(position);
            }
            for alias in entry.aliases.iter().chain(std::iter::once(&entry.label)) {
                alias_phrases.entry(phrase_key(alias)).or_default().insert(position);
            }
            for entity in &entry.entities {
                entity_tags.entry(phrase_key(entity)).or_default().insert(position);
            }
        }

        for file in &pack.toc.files {
            file_sections.insert(
                file.file_id.clone(),
                file.sections.iter().map(|section| section.section_id.clone()).collect(),
            );
        }

        let rules = pack
            .toc
            .disambiguation_rules
            .iter()
            .enumerate()
            .map(|(rule_index, rule)| IndexedRule {
                rule_index,
                trigger_terms: normalize_all(rule.trigger_terms.iter().map(String::as_str)),
                preferred: rule
                    .preferred_sections
                    .iter()
                    .filter_map(|reference| by_ref.get(reference).copied())
                    .collect(),
                boost: rule.boost,
            })
            .collect();

        Ok(Self { pack, entries, by_ref, file_sections, postings, alias_phrases, entity_tags, rules })
    }

    #[must_use]
    pub fn pack(&self) -> &KnowledgePack {
        &self.pack
    }

    #[must_use]
    pub fn manifest(&self) -> &Manifest {
        &self.pack.manifest
    }

    #[must_use]
    pub fn security(&self) -> &SecurityMetadata {
        &self.pack.toc.security
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn section(&self, reference: &SectionRef) -> Option<&Section> {
        self.by_ref.get(reference).map(|&position| self.section_at(position))
    }

    /// Section ids of one file, in TOC order.
    #[must_use]
    pub fn file_sections(&self, file_id: &str) -> &[String] {
        self.file_sections.get(file_id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Sections whose label or an alias equals `alias` (case and spacing folded).
    #[must_use]
    pub fn sections_with_alias(&self, alias: &str) -> Vec<SectionRef> {
        self.refs_for(self.alias_phrases.get(&phrase_key(alias)))
    }

    /// Sections tagged with `entity` (case and spacing folded).
    #[must_use]
    pub fn sections_with_entity(&self, entity: &str) -> Vec<SectionRef> {
        self.refs_for(self.entity_tags.get(&phrase_key(entity)))
    }

    fn refs_for(&self, positions: Option<&BTreeSet<usize>>) -> Vec<SectionRef> {
        positions
            .into_iter()
            .flatten()
            .map(|&position| self.entries[position].reference.clone())
            .collect()
    }

    pub(crate) fn entries(&self) -> &[IndexedSection] {
        &self.entries
    }

    pub(crate) fn rules(&self) -> &[IndexedRule] {
        &self.rules
    }

    pub(crate) fn section_at(&self, position: usize) -> &Section {
        let entry = &self.entries[position];
        &self.pack.content[entry.file_position].sections[entry.section_position]
    }

    /// Positions of sections sharing at least one term with `terms`.
    pub(crate) fn candidates(&self, terms: &BTreeSet<String>) -> BTreeSet<usize> {
        let mut positions = BTreeSet::new();
        for term in terms {
            if let Some(posting) = self.postings.get(term) {
                positions.extend(posting.iter().copied());
            }
        }
        positions
    }
}
