//! Knowledge Pack files and reference ingestion from a Markdown directory.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use knowledge_router_core::{
    check_integrity, derive_file_id, derive_section_id, DisambiguationRule, FileContent, FileToc,
    KnowledgePack, Manifest, Section, SectionRef, SectionToc, SecurityMetadata, Toc,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use walkdir::WalkDir;

pub const PACK_SOURCE_FILE: &str = "pack.yaml";
const PREAMBLE_LABEL: &str = "Introduction";

/// Read a Knowledge Pack from its JSON file.
///
/// # Errors
/// Returns an error when the file cannot be read or is not a valid pack.
pub fn read_pack(path: &Path) -> Result<KnowledgePack> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read knowledge pack {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse knowledge pack JSON {}", path.display()))
}

/// Write a Knowledge Pack as pretty JSON, creating parent directories.
///
/// # Errors
/// Returns an error when the pack cannot be serialized or the file cannot be written.
pub fn write_pack(path: &Path, pack: &KnowledgePack) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create pack directory {}", parent.display()))?;
    }
    let mut json = serde_json::to_vec_pretty(pack).context("failed to serialize knowledge pack")?;
    json.push(b'\n');
    fs::write(path, json)
        .with_context(|| format!("failed to write knowledge pack {}", path.display()))
}

/// Section reference by file and heading, as written in `pack.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LabelRef {
    pub file_id: String,
    pub label: String,
    /// Which heading to pick when the label repeats in one file.
    #[serde(default)]
    pub occurrence: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceRule {
    pub trigger_terms: BTreeSet<String>,
    pub preferred: Vec<LabelRef>,
    pub boost: f64,
}

/// Contents of `pack.yaml` at the root of a source directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackSource {
    pub dataset_id: String,
    pub version: String,
    #[serde(default = "default_source_type")]
    pub source_type: String,
    #[serde(default)]
    pub archived: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub security: SecurityMetadata,
    #[serde(default)]
    pub disambiguation_rules: Vec<SourceRule>,
}

fn default_source_type() -> String {
    "markdown".to_string()
}

impl PackSource {
    /// # Errors
    /// Returns an error when `pack.yaml` cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read pack source {}", path.display()))?;
        serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse pack source YAML {}", path.display()))
    }

    fn toc_id(&self) -> String {
        let sanitize = |value: &str| {
            value
                .chars()
                .map(|ch| if ch.is_ascii_alphanumeric() { ch.to_ascii_lowercase() } else { '_' })
                .collect::<String>()
        };
        format!("toc_{}_{}", sanitize(&self.dataset_id), sanitize(&self.version))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ParsedSection {
    label: String,
    text: String,
    aliases: BTreeSet<String>,
    entities: BTreeSet<String>,
}

fn split_list(value: &str) -> impl Iterator<Item = String> + '_ {
    value.split(',').map(str::trim).filter(|item| !item.is_empty()).map(str::to_string)
}

fn strip_prefix_ci<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let head = line.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &line[prefix.len()..])
}

/// Fold one finished paragraph into `section`, lifting metadata lines.
fn absorb_paragraph(section: &mut ParsedSection, paragraph: &str) {
    let mut body = Vec::new();
    for line in paragraph.lines() {
        let trimmed = line.trim();
        if let Some(rest) = strip_prefix_ci(trimmed, "aliases:") {
            section.aliases.extend(split_list(rest));
        } else if let Some(rest) = strip_prefix_ci(trimmed, "entities:") {
            section.entities.extend(split_list(rest));
        } else {
            body.push(line);
        }
    }

    let body = body.join("\n");
    if !body.trim().is_empty() {
        section.text.push_str(body.trim());
        section.text.push_str("\n\n");
    }
}

fn finish_section(sections: &mut Vec<ParsedSection>, mut section: ParsedSection, preamble: bool) {
    section.text = section.text.trim().to_string();
    let is_empty_preamble = preamble
        && section.text.is_empty()
        && section.aliases.is_empty()
        && section.entities.is_empty();
    if !is_empty_preamble {
        sections.push(section);
    }
}

/// Split Markdown into one section per heading. Text ahead of the first heading
/// becomes an "Introduction" section when it is not blank.
fn parse_markdown(content: &str) -> Vec<ParsedSection> {
    use pulldown_cmark::{Event, Parser, Tag, TagEnd};

    let mut sections = Vec::new();
    let mut current = ParsedSection { label: PREAMBLE_LABEL.to_string(), ..ParsedSection::default() };
    let mut in_preamble = true;
    let mut in_heading = false;
    let mut heading_text = String::new();
    let mut paragraph = String::new();

    for event in Parser::new(content) {
        match event {
            Event::Start(Tag::Heading { .. }) => {
                in_heading = true;
                heading_text.clear();
            }
            Event::End(TagEnd::Heading(_)) => {
                in_heading = false;
                let label = heading_text.trim().to_string();
                let next = ParsedSection { label, ..ParsedSection::default() };
                finish_section(&mut sections, std::mem::replace(&mut current, next), in_preamble);
                in_preamble = false;
            }
            Event::Text(text) | Event::Code(text) => {
                if in_heading {
                    heading_text.push_str(&text);
                } else {
                    paragraph.push_str(&text);
                }
            }
            Event::SoftBreak | Event::HardBreak => {
                if in_heading {
                    heading_text.push(' ');
                } else {
                    paragraph.push('\n');
                }
            }
            Event::Start(Tag::Item) => {
                if !paragraph.is_empty() {
                    paragraph.push('\n');
                }
                paragraph.push_str("- ");
            }
            Event::End(TagEnd::Paragraph | TagEnd::Item | TagEnd::CodeBlock) => {
                absorb_paragraph(&mut current, &paragraph);
                paragraph.clear();
            }
            _ => {}
        }
    }
    if !paragraph.trim().is_empty() {
        absorb_paragraph(&mut current, &paragraph);
    }
    finish_section(&mut sections, current, in_preamble);
    sections
}

fn occurrence_key(label: &str) -> String {
    label.split_whitespace().map(str::to_lowercase).collect::<Vec<_>>().join(" ")
}

fn build_file(file_id: &str, parsed: Vec<ParsedSection>) -> (FileToc, FileContent) {
    let mut occurrences: BTreeMap<String, usize> = BTreeMap::new();
    let mut toc_sections = Vec::with_capacity(parsed.len());
    let mut sections = Vec::with_capacity(parsed.len());

    for section in parsed {
        let seen = occurrences.entry(occurrence_key(&section.label)).or_default();
        let section_id = derive_section_id(file_id, &section.label, *seen);
        *seen += 1;

        toc_sections.push(SectionToc {
            section_id: section_id.clone(),
            label: section.label.clone(),
            aliases: section.aliases,
            entities: section.entities.clone(),
        });
        sections.push(Section {
            section_id,
            label: section.label,
            text: section.text,
            data: None,
            entities: section.entities,
        });
    }

    (
        FileToc { file_id: file_id.to_string(), sections: toc_sections },
        FileContent { file_id: file_id.to_string(), sections },
    )
}

fn resolve_label(toc: &[FileToc], target: &LabelRef) -> Result<SectionRef> {
    let file = toc
        .iter()
        .find(|file| file.file_id == target.file_id)
        .ok_or_else(|| anyhow!("disambiguation rule names unknown file {}", target.file_id))?;
    let key = occurrence_key(&target.label);
    file.sections
        .iter()
        .filter(|section| occurrence_key(&section.label) == key)
        .nth(target.occurrence)
        .map(|section| SectionRef::new(&file.file_id, &section.section_id))
        .ok_or_else(|| {
            anyhow!(
                "disambiguation rule names unknown section {:?} (occurrence {}) in {}",
                target.label,
                target.occurrence,
                target.file_id
            )
        })
}

fn is_markdown(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("md") || ext.eq_ignore_ascii_case("markdown"))
}

/// Build a Knowledge Pack from `dir/pack.yaml` and every Markdown file under `dir`.
///
/// Files are visited in sorted path order and section ids depend only on file
/// path, heading text, and heading occurrence, so rebuilding an unchanged
/// directory yields the same citation addresses.
///
/// # Errors
/// Returns an error when `pack.yaml` or a Markdown file cannot be read, two files
/// map to one `file_id`, a rule names a missing section, or the result fails the
/// integrity check.
pub fn build_pack_from_dir(dir: &Path) -> Result<KnowledgePack> {
    let source = PackSource::load(&dir.join(PACK_SOURCE_FILE))?;

    let mut toc_files = Vec::new();
    let mut content = Vec::new();
    let mut seen_file_ids = BTreeSet::new();

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed to walk source directory {}", dir.display()))?;
        let path = entry.path();
        if !entry.file_type().is_file() || !is_markdown(path) {
            continue;
        }

        let relative = path
            .strip_prefix(dir)
            .with_context(|| format!("{} is outside {}", path.display(), dir.display()))?;
        let file_id = derive_file_id(&relative.to_string_lossy());
        if !seen_file_ids.insert(file_id.clone()) {
            bail!("two source files map to file_id {file_id}");
        }

        let markdown = fs::read_to_string(path)
            .with_context(|| format!("failed to read markdown source {}", path.display()))?;
        let (file_toc, file_content) = build_file(&file_id, parse_markdown(&markdown));
        tracing::debug!(file_id = %file_id, sections = file_toc.sections.len(), "ingested markdown file");
        toc_files.push(file_toc);
        content.push(file_content);
    }

    let disambiguation_rules = source
        .disambiguation_rules
        .iter()
        .map(|rule| -> Result<DisambiguationRule> {
            Ok(DisambiguationRule {
                trigger_terms: rule.trigger_terms.clone(),
                preferred_sections: rule
                    .preferred
                    .iter()
                    .map(|target| resolve_label(&toc_files, target))
                    .collect::<Result<Vec<_>>>()?,
                boost: rule.boost,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let pack = KnowledgePack {
        manifest: Manifest {
            dataset_id: source.dataset_id.clone(),
            version: source.version.clone(),
            source_type: source.source_type.clone(),
            archived: source.archived,
            created_at: source.created_at,
        },
        toc: Toc {
            toc_id: source.toc_id(),
            files: toc_files,
            security: source.security.clone(),
            disambiguation_rules,
        },
        content,
    };

    let report = check_integrity(&pack);
    if !report.is_servable() {
        bail!("built pack failed integrity check: {}", report.fatal_messages().join("; "));
    }

    tracing::info!(
        dataset_id = %pack.manifest.dataset_id,
        version = %pack.manifest.version,
        files = pack.toc.files.len(),
        sections = report.toc_sections,
        "knowledge pack built"
    );
    Ok(pack)
}
