//! Deterministic, explainable section routing over a Knowledge Pack.
//!
//! A pack (manifest, TOC with security metadata, content) is indexed once into a
//! [`CorpusIndex`]. Queries are scored lexically by a [`SectionRouter`], gated by a
//! [`PolicyGate`], and truncated under the pointer protocol before release.

mod citation;
mod config;
mod error;
mod index;
mod integrity;
mod lookup;
mod model;
mod pointer;
mod policy;
mod router;
mod snapshot;
mod text;

#[cfg(test)]
mod testing;

pub use citation::{
    derive_file_id, derive_section_id, diff_section_ids, generation_id, pack_digest,
    section_id_set, CitationDiff,
};
pub use config::{
    RouterBackend, RouterConfig, ScoringWeights, DEFAULT_ALIAS_WEIGHT, DEFAULT_ENTITY_WEIGHT,
    DEFAULT_EXACT_MATCH_THRESHOLD, DEFAULT_MAX_CHUNK_CHARS, DEFAULT_TEXT_WEIGHT,
};
pub use error::RouterError;
pub use index::CorpusIndex;
pub use integrity::{check_integrity, ensure_servable, IntegrityReport, RuleTarget};
pub use lookup::{
    citation_source, exact_hits, Gated, LookupHit, LookupOutcome, LookupResult, RouteResult,
    TopResult,
};
pub use model::{
    DisambiguationRule, FileContent, FileToc, KnowledgePack, Manifest, Section, SectionRef,
    SectionToc, SecurityMetadata, Toc,
};
pub use pointer::{truncate_section_text, truncation_marker, ChunkedContent};
pub use policy::{
    CallerAttributes, EnforcementLevel, PolicyDecision, PolicyGate, PolicySummary, ACCESS_GRANTED,
};
pub use router::{
    default_tie_breakers, CandidateTrace, DeterministicRouter, ExcludedSection, RankedSection,
    RoutingTrace, RuleFiring, SectionRouter, SignalBreakdown, TopSection, RULESET_VERSION,
};
pub use snapshot::RouterSnapshot;
pub use text::{normalize_all, normalize_terms};
