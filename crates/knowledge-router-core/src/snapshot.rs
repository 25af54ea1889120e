use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use crate::citation::generation_id;
use crate::integrity::check_integrity;
use crate::lookup::{exact_hits, Gated, LookupOutcome, LookupResult, RouteResult, TopResult};
use crate::{
    CallerAttributes, CorpusIndex, IntegrityReport, KnowledgePack, Manifest, PolicyDecision,
    PolicyGate, PolicySummary, RouterConfig, RouterError, RoutingTrace, SectionRouter,
};

/// Everything needed to answer queries for one pack generation.
///
/// Immutable once loaded. A new pack means a new snapshot.
pub struct RouterSnapshot {
    generation_id: String,
    namespace: String,
    config: RouterConfig,
    index: Arc<CorpusIndex>,
    router: Box<dyn SectionRouter>,
    policy: PolicyGate,
    integrity: IntegrityReport,
}

impl Debug for RouterSnapshot {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterSnapshot")
            .field("generation_id", &self.generation_id)
            .field("namespace", &self.namespace)
            .field("backend", &self.config.backend)
            .field("sections", &self.index.len())
            .finish_non_exhaustive()
    }
}

impl RouterSnapshot {
    /// Validate `config` and `pack`, index the pack, and wire up the router and gate.
    ///
    /// # Errors
    /// Returns [`RouterError::Config`] for invalid scoring settings and
    /// [`RouterError::Integrity`] when the pack must not be served.
    pub fn load(pack: KnowledgePack, config: &RouterConfig) -> Result<Self, RouterError> {
        config.validate()?;
        let generation_id = generation_id(&pack)?;
        let integrity = check_integrity(&pack);
        let namespace =
            config.namespace.clone().unwrap_or_else(|| pack.manifest.dataset_id.clone());
        let policy = PolicyGate::new(pack.toc.security.clone());

        let index = Arc::new(CorpusIndex::build(pack)?);
        let router = config.backend.build(Arc::clone(&index), config);

        tracing::debug!(
            generation_id = %generation_id,
            sections = index.len(),
            orphans = integrity.orphan_sections.len(),
            backend = config.backend.as_str(),
            "router snapshot loaded"
        );

        Ok(Self { generation_id, namespace, config: config.clone(), index, router, policy, integrity })
    }

    #[must_use]
    pub fn generation_id(&self) -> &str {
        &self.generation_id
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    #[must_use]
    pub fn manifest(&self) -> &Manifest {
        self.index.manifest()
    }

    #[must_use]
    pub fn index(&self) -> &CorpusIndex {
        &self.index
    }

    #[must_use]
    pub fn integrity(&self) -> &IntegrityReport {
        &self.integrity
    }

    /// Run the gate for `caller`; routing only happens once it allows.
    fn admit<T>(&self, caller: &CallerAttributes, release: impl FnOnce() -> T) -> Gated<T> {
        let decision = self.policy.enforce_caller(caller);
        if decision.allowed {
            Gated::Granted(release())
        } else {
            Gated::Denied(decision)
        }
    }

    /// Full ranking with section text, for callers the gate admits.
    #[must_use]
    pub fn route_query(&self, caller: &CallerAttributes, query: &str) -> Gated<RouteResult> {
        self.admit(caller, || {
            let sections = self.router.route_query(query);
            RouteResult { query: query.to_string(), count: sections.len(), sections }
        })
    }

    #[must_use]
    pub fn get_top_section(&self, caller: &CallerAttributes, query: &str) -> Gated<TopResult> {
        self.admit(caller, || TopResult {
            query: query.to_string(),
            top: self.router.get_top_section(query),
        })
    }

    #[must_use]
    pub fn get_routing_trace(&self, caller: &CallerAttributes, query: &str) -> Gated<RoutingTrace> {
        self.admit(caller, || self.router.get_routing_trace(query))
    }

    #[must_use]
    pub fn enforce(
        &self,
        user_region: Option<&str>,
        user_has_phi_clearance: bool,
        user_has_pii_clearance: bool,
    ) -> PolicyDecision {
        self.policy.enforce(user_region, user_has_phi_clearance, user_has_pii_clearance)
    }

    #[must_use]
    pub fn get_policy_summary(&self) -> PolicySummary {
        self.policy.policy_summary()
    }

    /// Policy-gated exact lookup.
    ///
    /// The gate runs before routing; a denied caller gets only the decision.
    /// `max_chunk_chars` falls back to the configured budget.
    ///
    /// # Errors
    /// Returns [`RouterError::Validation`] when `max_chunk_chars` is zero.
    pub fn lookup_exact(
        &self,
        caller: &CallerAttributes,
        query: &str,
        max_chunk_chars: Option<usize>,
    ) -> Result<LookupOutcome, RouterError> {
        let max_chunk_chars = max_chunk_chars.unwrap_or(self.config.max_chunk_chars);
        if max_chunk_chars == 0 {
            return Err(RouterError::Validation("max_chunk_chars MUST be >= 1".to_string()));
        }

        Ok(self.admit(caller, || {
            let trace = self.router.get_routing_trace(query);
            let results = exact_hits(&trace, &self.index, &self.namespace, max_chunk_chars);
            tracing::debug!(
                generation_id = %self.generation_id,
                fired_rules = trace.fired_rules.len(),
                count = results.len(),
                "exact lookup served"
            );
            LookupResult { query: query.to_string(), max_chunk_chars, count: results.len(), results, trace }
        }))
    }
}
