use std::collections::BTreeSet;

use crate::{
    derive_section_id, DisambiguationRule, FileContent, FileToc, KnowledgePack, Manifest, Section,
    SectionRef, SectionToc, SecurityMetadata, Toc,
};

pub(crate) struct FixtureSection<'a> {
    pub label: &'a str,
    pub aliases: &'a [&'a str],
    pub entities: &'a [&'a str],
    pub text: &'a str,
}

fn set(values: &[&str]) -> BTreeSet<String> {
    values.iter().map(|value| (*value).to_string()).collect()
}

pub(crate) fn fixture_ref(file_id: &str, label: &str) -> SectionRef {
    SectionRef::new(file_id, derive_section_id(file_id, label, 0))
}

pub(crate) fn pack_from(
    files: &[(&str, Vec<FixtureSection<'_>>)],
    security: SecurityMetadata,
    rules: Vec<DisambiguationRule>,
) -> KnowledgePack {
    let mut toc_files = Vec::new();
    let mut content = Vec::new();
    for (file_id, sections) in files {
        let mut toc_sections = Vec::new();
        let mut content_sections = Vec::new();
        for section in sections {
            let section_id = derive_section_id(file_id, section.label, 0);
            toc_sections.push(SectionToc {
                section_id: section_id.clone(),
                label: section.label.to_string(),
                aliases: set(section.aliases),
                entities: set(section.entities),
            });
            content_sections.push(Section {
                section_id,
                label: section.label.to_string(),
                text: section.text.to_string(),
                data: None,
                entities: set(section.entities),
            });
        }
        toc_files.push(FileToc { file_id: (*file_id).to_string(), sections: toc_sections });
        content.push(FileContent { file_id: (*file_id).to_string(), sections: content_sections });
    }

    KnowledgePack {
        manifest: Manifest {
            dataset_id: "clinical-guidelines".to_string(),
            version: "1".to_string(),
            source_type: "markdown".to_string(),
            archived: false,
            created_at: None,
        },
        toc: Toc { toc_id: "toc_clinical_guidelines_1".to_string(), files: toc_files, security, disambiguation_rules: rules },
        content,
    }
}

pub(crate) fn fixture_pack() -> KnowledgePack {
    pack_from(
        &[
            (
                "oncology/fever",
                vec![
                    FixtureSection {
                        label: "Neutropenic Fever",
                        aliases: &["febrile neutropenia"],
                        entities: &["neutropenia", "fever"],
                        text: "Neutropenic fever is an oncologic emergency. Start empiric \
                               antibiotics within one hour of fever onset when the absolute \
                               neutrophil count is below 500.",
                    },
                    FixtureSection {
                        label: "Fever Workup",
                        aliases: &["fever evaluation"],
                        entities: &["fever"],
                        text: "Fever workup includes blood cultures, urinalysis and chest imaging.",
                    },
                ],
            ),
            (
                "oncology/sepsis",
                vec![FixtureSection {
                    label: "Sepsis Management",
                    aliases: &["septic shock"],
                    entities: &["sepsis"],
                    text: "Sepsis management begins with fluids and broad spectrum antibiotics. \
                           Fever may be absent.",
                }],
            ),
            (
                "pediatrics/fever",
                vec![FixtureSection {
                    label: "Pediatric Fever",
                    aliases: &["childhood fever"],
                    entities: &["fever", "pediatrics"],
                    text: "Fever in infants under three months requires a full evaluation.",
                }],
            ),
        ],
        SecurityMetadata::default(),
        vec![DisambiguationRule {
            trigger_terms: set(&["fever", "infant"]),
            preferred_sections: vec![fixture_ref("pediatrics/fever", "Pediatric Fever")],
            boost: 2.0,
        }],
    )
}
