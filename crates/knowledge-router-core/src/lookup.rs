use serde::{Deserialize, Serialize};

use crate::pointer::truncate_section_text;
use crate::{CorpusIndex, PolicyDecision, RankedSection, RoutingTrace, SectionRef, TopSection};

/// One exact-match result as handed to a tool-calling client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LookupHit {
    /// `{namespace}:{file_id}#{section_id}`
    pub source: String,
    pub file_id: String,
    pub section_id: String,
    pub label: String,
    pub score: f64,
    pub content: String,
    pub truncated: bool,
    pub original_chars: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pointer: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LookupResult {
    pub query: String,
    pub max_chunk_chars: usize,
    pub count: usize,
    pub results: Vec<LookupHit>,
    pub trace: RoutingTrace,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteResult {
    pub query: String,
    pub count: usize,
    pub sections: Vec<RankedSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopResult {
    pub query: String,
    pub top: Option<TopSection>,
}

/// Outcome of an operation that sits behind the policy gate.
///
/// A denial carries only the gate's decision, never section text or routing output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Gated<T> {
    Denied(PolicyDecision),
    Granted(T),
}

impl<T> Gated<T> {
    #[must_use]
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted(_))
    }

    #[must_use]
    pub fn granted(self) -> Option<T> {
        match self {
            Self::Granted(value) => Some(value),
            Self::Denied(_) => None,
        }
    }

    #[must_use]
    pub fn denial(&self) -> Option<&PolicyDecision> {
        match self {
            Self::Denied(decision) => Some(decision),
            Self::Granted(_) => None,
        }
    }
}

pub type LookupOutcome = Gated<LookupResult>;

#[must_use]
pub fn citation_source(namespace: &str, section: &SectionRef) -> String {
    format!("{namespace}:{}#{}", section.file_id, section.section_id)
}

/// Keep the trace's exact matches, in ranked order, then apply the chunk budget.
///
/// Truncation runs after the ranking is final and never drops or reorders hits.
#[must_use]
pub fn exact_hits(
    trace: &RoutingTrace,
    index: &CorpusIndex,
    namespace: &str,
    max_chunk_chars: usize,
) -> Vec<LookupHit> {
    trace
        .candidates
        .iter()
        .filter(|candidate| candidate.above_threshold)
        .filter_map(|candidate| {
            let section = index.section(&candidate.section)?;
            let chunk = truncate_section_text(&section.text, max_chunk_chars, &candidate.section);
            Some(LookupHit {
                source: citation_source(namespace, &candidate.section),
                file_id: candidate.section.file_id.clone(),
                section_id: candidate.section.section_id.clone(),
                label: candidate.label.clone(),
                score: candidate.score,
                content: chunk.content,
                truncated: chunk.truncated,
                original_chars: chunk.original_chars,
                pointer: chunk.pointer,
            })
        })
        .collect()
}
