use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::index::IndexedSection;
use crate::text::normalize_terms;
use crate::{CorpusIndex, RouterBackend, RouterConfig, ScoringWeights, Section, SectionRef};

pub const RULESET_VERSION: &str = "routing.v1";

#[must_use]
pub fn default_tie_breakers() -> Vec<String> {
    vec![
        "score desc".to_string(),
        "rule_preferred first".to_string(),
        "file_id asc".to_string(),
        "section_id asc".to_string(),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedSection {
    pub rank: usize,
    pub file_id: String,
    pub section_id: String,
    pub label: String,
    pub score: f64,
    pub exact_match: bool,
    pub rule_preferred: bool,
    pub text: String,
    pub aliases: Vec<String>,
    pub entities: Vec<String>,
}

impl RankedSection {
    #[must_use]
    pub fn reference(&self) -> SectionRef {
        SectionRef::new(&self.file_id, &self.section_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopSection {
    pub score: f64,
    pub file_id: String,
    pub section: Section,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct SignalBreakdown {
    pub label_matches: usize,
    pub text_matches: usize,
    /// Distinct query terms found in the label or the body; this is what the text weight scores.
    pub label_text_matches: usize,
    pub alias_matches: usize,
    pub entity_matches: usize,
    pub matched_terms: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateTrace {
    pub rank: usize,
    pub section: SectionRef,
    pub label: String,
    pub signals: SignalBreakdown,
    pub base_score: f64,
    pub boost: f64,
    pub score: f64,
    pub rule_preferred: bool,
    pub above_threshold: bool,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ExcludedSection {
    pub section: SectionRef,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleFiring {
    pub rule_index: usize,
    pub trigger_terms: Vec<String>,
    pub boost: f64,
    pub preferred_sections: Vec<SectionRef>,
}

/// Explainability record for one query against one generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoutingTrace {
    pub query: String,
    pub normalized_terms: Vec<String>,
    pub ruleset_version: String,
    pub backend: RouterBackend,
    pub weights: ScoringWeights,
    pub exact_match_threshold: f64,
    pub tie_breakers: Vec<String>,
    pub fired_rules: Vec<RuleFiring>,
    pub candidates: Vec<CandidateTrace>,
    pub excluded: Vec<ExcludedSection>,
    pub unmatched_sections: usize,
    pub ranking: Vec<SectionRef>,
    pub ordering_trace: Vec<String>,
}

/// Capability set every router backend provides.
pub trait SectionRouter: Send + Sync {
    /// Full ranking of sections with a positive score.
    fn route_query(&self, query: &str) -> Vec<RankedSection>;

    /// Highest-ranked section, if any section scored.
    fn get_top_section(&self, query: &str) -> Option<TopSection>;

    fn get_routing_trace(&self, query: &str) -> RoutingTrace;
}

impl RouterBackend {
    /// Instantiate the statically linked router this backend names.
    #[must_use]
    pub fn build(self, index: Arc<CorpusIndex>, config: &RouterConfig) -> Box<dyn SectionRouter> {
        match self {
            Self::Deterministic => Box::new(DeterministicRouter::new(index, config)),
        }
    }
}

#[derive(Debug, Clone)]
struct ScoredCandidate<'a> {
    position: usize,
    entry: &'a IndexedSection,
    signals: SignalBreakdown,
    base_score: f64,
    boost: f64,
    score: f64,
    rule_preferred: bool,
}

impl ScoredCandidate<'_> {
    fn precedence(lhs: &Self, rhs: &Self) -> Ordering {
        rhs.score
            .total_cmp(&lhs.score)
            .then_with(|| rhs.rule_preferred.cmp(&lhs.rule_preferred))
            .then_with(|| lhs.entry.reference.file_id.cmp(&rhs.entry.reference.file_id))
            .then_with(|| lhs.entry.reference.section_id.cmp(&rhs.entry.reference.section_id))
    }
}

struct Evaluation<'a> {
    terms: BTreeSet<String>,
    fired_rules: Vec<RuleFiring>,
    ranked: Vec<ScoredCandidate<'a>>,
    excluded: Vec<ExcludedSection>,
    unmatched_sections: usize,
}

/// Lexical router: weighted term overlap plus disambiguation boosts, totally ordered.
///
/// A pure function of the index and the query; it holds no mutable state.
#[derive(Debug, Clone)]
pub struct DeterministicRouter {
    index: Arc<CorpusIndex>,
    weights: ScoringWeights,
    exact_match_threshold: f64,
}

fn overlap(query_terms: &BTreeSet<String>, field_terms: &BTreeSet<String>) -> usize {
    query_terms.intersection(field_terms).count()
}

fn count_f64(value: usize) -> f64 {
    f64::from(u32::try_from(value).unwrap_or(u32::MAX))
}

impl DeterministicRouter {
    #[must_use]
    pub fn new(index: Arc<CorpusIndex>, config: &RouterConfig) -> Self {
        Self { index, weights: config.weights, exact_match_threshold: config.exact_match_threshold }
    }

    #[must_use]
    pub fn index(&self) -> &CorpusIndex {
        &self.index
    }

    fn signals(terms: &BTreeSet<String>, entry: &IndexedSection) -> SignalBreakdown {
        let matched_terms = terms
            .iter()
            .filter(|term| {
                entry.label_text_terms.contains(*term)
                    || entry.alias_terms.contains(*term)
                    || entry.entity_terms.contains(*term)
            })
            .cloned()
            .collect();

        SignalBreakdown {
            label_matches: overlap(terms, &entry.label_terms),
            text_matches: overlap(terms, &entry.text_terms),
            label_text_matches: overlap(terms, &entry.label_text_terms),
            alias_matches: overlap(terms, &entry.alias_terms),
            entity_matches: overlap(terms, &entry.entity_terms),
            matched_terms,
        }
    }

    fn base_score(&self, signals: &SignalBreakdown) -> f64 {
        self.weights.text * count_f64(signals.label_text_matches)
            + self.weights.alias * count_f64(signals.alias_matches)
            + self.weights.entity * count_f64(signals.entity_matches)
    }

    fn evaluate(&self, query: &str) -> Evaluation<'_> {
        let terms = normalize_terms(query);
        if terms.is_empty() {
            return Evaluation {
                terms,
                fired_rules: Vec::new(),
                ranked: Vec::new(),
                excluded: Vec::new(),
                unmatched_sections: self.index.len(),
            };
        }

        let entries = self.index.entries();
        let fired = self
            .index
            .rules()
            .iter()
            .filter(|rule| !rule.trigger_terms.is_empty() && rule.trigger_terms.is_subset(&terms))
            .collect::<Vec<_>>();

        let mut candidate_positions = self.index.candidates(&terms);
        for rule in &fired {
            candidate_positions.extend(rule.preferred.iter().copied());
        }

        let mut ranked = Vec::new();
        let mut excluded = Vec::new();
        for position in candidate_positions.iter().copied() {
            let entry = &entries[position];
            let signals = Self::signals(&terms, entry);
            let base_score = self.base_score(&signals);
            let boost: f64 = fired
                .iter()
                .filter(|rule| rule.preferred.contains(&position))
                .map(|rule| rule.boost)
                .sum();
            let score = base_score + boost;

            if score <= 0.0 {
                excluded.push(ExcludedSection {
                    section: entry.reference.clone(),
                    reason: "matched terms carry zero weight".to_string(),
                });
                continue;
            }

            ranked.push(ScoredCandidate {
                position,
                entry,
                signals,
                base_score,
                boost,
                score,
                rule_preferred: boost > 0.0,
            });
        }
        ranked.sort_by(ScoredCandidate::precedence);

        let fired_rules = fired
            .iter()
            .map(|rule| RuleFiring {
                rule_index: rule.rule_index,
                trigger_terms: rule.trigger_terms.iter().cloned().collect(),
                boost: rule.boost,
                preferred_sections: rule
                    .preferred
                    .iter()
                    .map(|&position| entries[position].reference.clone())
                    .collect(),
            })
            .collect();

        Evaluation {
            terms,
            fired_rules,
            ranked,
            excluded,
            unmatched_sections: entries.len() - candidate_positions.len(),
        }
    }

    fn is_exact(&self, score: f64) -> bool {
        score > self.exact_match_threshold
    }

    fn ranked_section(&self, rank: usize, candidate: &ScoredCandidate<'_>) -> RankedSection {
        let section = self.index.section_at(candidate.position);
        RankedSection {
            rank,
            file_id: candidate.entry.reference.file_id.clone(),
            section_id: candidate.entry.reference.section_id.clone(),
            label: candidate.entry.label.clone(),
            score: candidate.score,
            exact_match: self.is_exact(candidate.score),
            rule_preferred: candidate.rule_preferred,
            text: section.text.clone(),
            aliases: candidate.entry.aliases.iter().cloned().collect(),
            entities: candidate.entry.entities.iter().cloned().collect(),
        }
    }

    fn candidate_trace(&self, rank: usize, candidate: &ScoredCandidate<'_>) -> CandidateTrace {
        let signals = &candidate.signals;
        let mut reasons = vec![
            format!(
                "label/text matched {} term(s) (label {}, body {})",
                signals.label_text_matches, signals.label_matches, signals.text_matches
            ),
            format!("alias matched {} term(s)", signals.alias_matches),
            format!("entity matched {} term(s)", signals.entity_matches),
        ];
        if candidate.rule_preferred {
            reasons.push(format!("disambiguation boost +{}", candidate.boost));
        }
        let above_threshold = self.is_exact(candidate.score);
        reasons.push(if above_threshold {
            format!(
                "score {} exceeds exact-match threshold {}",
                candidate.score, self.exact_match_threshold
            )
        } else {
            format!(
                "score {} does not exceed exact-match threshold {}",
                candidate.score, self.exact_match_threshold
            )
        });

        CandidateTrace {
            rank,
            section: candidate.entry.reference.clone(),
            label: candidate.entry.label.clone(),
            signals: signals.clone(),
            base_score: candidate.base_score,
            boost: candidate.boost,
            score: candidate.score,
            rule_preferred: candidate.rule_preferred,
            above_threshold,
            reasons,
        }
    }
}

impl SectionRouter for DeterministicRouter {
    fn route_query(&self, query: &str) -> Vec<RankedSection> {
        self.evaluate(query)
            .ranked
            .iter()
            .enumerate()
            .map(|(index, candidate)| self.ranked_section(index + 1, candidate))
            .collect()
    }

    fn get_top_section(&self, query: &str) -> Option<TopSection> {
        let evaluation = self.evaluate(query);
        let top = evaluation.ranked.first()?;
        Some(TopSection {
            score: top.score,
            file_id: top.entry.reference.file_id.clone(),
            section: self.index.section_at(top.position).clone(),
        })
    }

    fn get_routing_trace(&self, query: &str) -> RoutingTrace {
        let evaluation = self.evaluate(query);
        let candidates = evaluation
            .ranked
            .iter()
            .enumerate()
            .map(|(index, candidate)| self.candidate_trace(index + 1, candidate))
            .collect::<Vec<_>>();
        let ranking = candidates.iter().map(|candidate| candidate.section.clone()).collect();

        RoutingTrace {
            query: query.to_string(),
            normalized_terms: evaluation.terms.into_iter().collect(),
            ruleset_version: RULESET_VERSION.to_string(),
            backend: RouterBackend::Deterministic,
            weights: self.weights,
            exact_match_threshold: self.exact_match_threshold,
            tie_breakers: default_tie_breakers(),
            fired_rules: evaluation.fired_rules,
            candidates,
            excluded: evaluation.excluded,
            unmatched_sections: evaluation.unmatched_sections,
            ranking,
            ordering_trace: vec![
                "normalize: case-fold, split on word boundaries, keep every non-empty token".to_string(),
                "candidates: sections sharing a term via label/text/alias/entity postings"
                    .to_string(),
                "score: text*(label/text matches) + alias*(alias matches) + entity*(entity matches)"
                    .to_string(),
                "boost: rules whose trigger terms are all present in the query".to_string(),
                "sort: precedence tuple with deterministic tie-breakers".to_string(),
            ],
        }
    }
}
