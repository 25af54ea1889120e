use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use knowledge_router_core::{
    CallerAttributes, Gated, KnowledgePack, LookupOutcome, PolicyDecision, PolicySummary,
    RouteResult, RouterBackend, RouterConfig, RouterSnapshot, RoutingTrace, TopResult,
};
use knowledge_router_pack::read_pack;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

pub const API_CONTRACT_VERSION: &str = "api.v1";

/// Result of any query against the serving slot.
///
/// `NotInitialized` is reported until the first pack is published; it is never
/// collapsed into an empty result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum ServeStatus<T> {
    Ready(T),
    NotInitialized,
}

impl<T> ServeStatus<T> {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    #[must_use]
    pub fn ready(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            Self::NotInitialized => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenerationInfo {
    pub contract_version: String,
    pub generation_id: String,
    pub namespace: String,
    pub dataset_id: String,
    pub version: String,
    pub sections: usize,
    pub orphan_sections: usize,
    pub backend: RouterBackend,
}

impl GenerationInfo {
    fn of(snapshot: &RouterSnapshot) -> Self {
        Self {
            contract_version: API_CONTRACT_VERSION.to_string(),
            generation_id: snapshot.generation_id().to_string(),
            namespace: snapshot.namespace().to_string(),
            dataset_id: snapshot.manifest().dataset_id.clone(),
            version: snapshot.manifest().version.clone(),
            sections: snapshot.index().len(),
            orphan_sections: snapshot.integrity().orphan_sections.len(),
            backend: snapshot.config().backend,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublishReceipt {
    pub generation: GenerationInfo,
    pub replaced_generation_id: Option<String>,
}

/// Load a [`RouterConfig`] from YAML and validate it.
///
/// # Errors
/// Returns an error when the file cannot be read, parsed, or fails validation.
pub fn load_config(path: &Path) -> Result<RouterConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read router config {}", path.display()))?;
    let config: RouterConfig = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse router config YAML {}", path.display()))?;
    config.validate().with_context(|| format!("invalid router config {}", path.display()))?;
    Ok(config)
}

/// Serving front for one Knowledge Pack generation at a time.
///
/// Readers clone the current [`RouterSnapshot`] handle and drop the lock before
/// doing any work, so a query sees exactly one generation even while
/// [`KnowledgeRouterApi::publish`] swaps in the next.
#[derive(Debug)]
pub struct KnowledgeRouterApi {
    config: RouterConfig,
    current: RwLock<Option<Arc<RouterSnapshot>>>,
}

impl Default for KnowledgeRouterApi {
    fn default() -> Self {
        Self::new(RouterConfig::default())
    }
}

impl KnowledgeRouterApi {
    #[must_use]
    pub fn new(config: RouterConfig) -> Self {
        Self { config, current: RwLock::new(None) }
    }

    #[must_use]
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Current generation handle, if any pack has been published.
    #[must_use]
    pub fn snapshot(&self) -> Option<Arc<RouterSnapshot>> {
        self.current.read().clone()
    }

    fn with_snapshot<T>(&self, f: impl FnOnce(&RouterSnapshot) -> T) -> ServeStatus<T> {
        match self.snapshot() {
            Some(snapshot) => ServeStatus::Ready(f(&snapshot)),
            None => ServeStatus::NotInitialized,
        }
    }

    /// Validate and index `pack`, then atomically replace the serving generation.
    ///
    /// The previous generation keeps serving if this fails.
    ///
    /// # Errors
    /// Returns an error when the pack fails integrity checks or the config is invalid.
    pub fn publish(&self, pack: KnowledgePack) -> Result<PublishReceipt> {
        let dataset_id = pack.manifest.dataset_id.clone();
        let snapshot = Arc::new(
            RouterSnapshot::load(pack, &self.config)
                .with_context(|| format!("failed to load knowledge pack {dataset_id}"))?,
        );
        let generation = GenerationInfo::of(&snapshot);

        let replaced = self.current.write().replace(snapshot);
        let replaced_generation_id = replaced.map(|previous| previous.generation_id().to_string());

        tracing::info!(
            generation_id = %generation.generation_id,
            replaced = replaced_generation_id.as_deref().unwrap_or("none"),
            dataset_id = %generation.dataset_id,
            version = %generation.version,
            sections = generation.sections,
            "published knowledge pack generation"
        );
        if generation.orphan_sections > 0 {
            tracing::warn!(
                generation_id = %generation.generation_id,
                orphans = generation.orphan_sections,
                "content sections missing from the TOC are not routable"
            );
        }

        Ok(PublishReceipt { generation, replaced_generation_id })
    }

    /// Read a pack JSON file and [`publish`](Self::publish) it.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read or the pack cannot be published.
    pub fn publish_file(&self, path: &Path) -> Result<PublishReceipt> {
        let pack = read_pack(path)?;
        self.publish(pack)
    }

    #[must_use]
    pub fn generation(&self) -> ServeStatus<GenerationInfo> {
        self.with_snapshot(GenerationInfo::of)
    }

    fn log_denial<T>(snapshot: &RouterSnapshot, operation: &str, outcome: &Gated<T>) {
        if let Some(decision) = outcome.denial() {
            tracing::warn!(
                generation_id = %snapshot.generation_id(),
                operation,
                reason = %decision.reason,
                "policy gate denied caller"
            );
        }
    }

    fn gated<T>(
        &self,
        operation: &str,
        run: impl FnOnce(&RouterSnapshot) -> Gated<T>,
    ) -> ServeStatus<Gated<T>> {
        self.with_snapshot(|snapshot| {
            let outcome = run(snapshot);
            Self::log_denial(snapshot, operation, &outcome);
            outcome
        })
    }

    #[must_use]
    pub fn route_query(&self, caller: &CallerAttributes, query: &str) -> ServeStatus<Gated<RouteResult>> {
        self.gated("route_query", |snapshot| snapshot.route_query(caller, query))
    }

    #[must_use]
    pub fn get_top_section(&self, caller: &CallerAttributes, query: &str) -> ServeStatus<Gated<TopResult>> {
        self.gated("get_top_section", |snapshot| snapshot.get_top_section(caller, query))
    }

    #[must_use]
    pub fn get_routing_trace(
        &self,
        caller: &CallerAttributes,
        query: &str,
    ) -> ServeStatus<Gated<RoutingTrace>> {
        self.gated("get_routing_trace", |snapshot| snapshot.get_routing_trace(caller, query))
    }

    #[must_use]
    pub fn enforce(
        &self,
        user_region: Option<&str>,
        user_has_phi_clearance: bool,
        user_has_pii_clearance: bool,
    ) -> ServeStatus<PolicyDecision> {
        self.with_snapshot(|snapshot| {
            let decision =
                snapshot.enforce(user_region, user_has_phi_clearance, user_has_pii_clearance);
            if !decision.allowed {
                tracing::warn!(
                    generation_id = %snapshot.generation_id(),
                    reason = %decision.reason,
                    "policy gate denied caller"
                );
            }
            decision
        })
    }

    #[must_use]
    pub fn get_policy_summary(&self) -> ServeStatus<PolicySummary> {
        self.with_snapshot(RouterSnapshot::get_policy_summary)
    }

    /// Policy-gated exact lookup against the current generation.
    ///
    /// # Errors
    /// Returns an error when `max_chunk_chars` is zero.
    pub fn lookup_exact(
        &self,
        caller: &CallerAttributes,
        query: &str,
        max_chunk_chars: Option<usize>,
    ) -> Result<ServeStatus<LookupOutcome>> {
        let Some(snapshot) = self.snapshot() else {
            return Ok(ServeStatus::NotInitialized);
        };

        let outcome = snapshot.lookup_exact(caller, query, max_chunk_chars)?;
        Self::log_denial(&snapshot, "lookup_exact", &outcome);
        Ok(ServeStatus::Ready(outcome))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::thread;

    use knowledge_router_core::{EnforcementLevel, SecurityMetadata};
    use knowledge_router_pack::{build_pack_from_dir, write_pack};

    use super::*;

    fn fixture_dir() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/clinical-guidelines")
    }

    fn fixture_pack() -> Result<KnowledgePack> {
        build_pack_from_dir(&fixture_dir())
    }

    fn ready<T>(status: ServeStatus<T>) -> T {
        status.ready().unwrap_or_else(|| panic!("expected a published generation"))
    }

    fn clinician() -> CallerAttributes {
        CallerAttributes::new(Some("US"), true, false)
    }

    #[test]
    fn queries_before_publish_report_not_initialized() -> Result<()> {
        let api = KnowledgeRouterApi::default();
        let caller = clinician();
        assert_eq!(api.route_query(&caller, "neutropenic fever"), ServeStatus::NotInitialized);
        assert_eq!(api.get_top_section(&caller, "neutropenic fever"), ServeStatus::NotInitialized);
        assert!(!api.get_routing_trace(&caller, "fever").is_ready());
        assert_eq!(api.enforce(Some("US"), true, true), ServeStatus::NotInitialized);
        assert_eq!(api.get_policy_summary(), ServeStatus::NotInitialized);
        assert_eq!(
            api.lookup_exact(&CallerAttributes::default(), "fever", None)?,
            ServeStatus::NotInitialized
        );

        let json = serde_json::to_value(api.generation())?;
        assert_eq!(json, serde_json::json!({ "status": "not_initialized" }));
        Ok(())
    }

    #[test]
    fn published_pack_serves_top_section() -> Result<()> {
        let api = KnowledgeRouterApi::default();
        let receipt = api.publish(fixture_pack()?)?;
        assert!(receipt.replaced_generation_id.is_none());
        assert_eq!(receipt.generation.namespace, "clinical-guidelines");
        assert_eq!(receipt.generation.contract_version, API_CONTRACT_VERSION);

        let top = ready(api.get_top_section(&clinician(), "neutropenic fever"))
            .granted()
            .and_then(|result| result.top)
            .unwrap_or_else(|| panic!("expected a top section"));
        assert_eq!(top.file_id, "oncology/neutropenic-fever");
        assert_eq!(top.section.label, "Neutropenic Fever");
        assert!(top.score > api.config().exact_match_threshold);
        Ok(())
    }

    #[test]
    fn gated_lookup_denies_without_content() -> Result<()> {
        let api = KnowledgeRouterApi::default();
        api.publish(fixture_pack()?)?;

        let outsider = CallerAttributes::new(Some("EU"), true, false);
        match ready(api.lookup_exact(&outsider, "neutropenic fever", None)?) {
            LookupOutcome::Denied(decision) => {
                assert!(!decision.allowed);
                assert!(decision.reason.contains("requires US, got EU"));
                let json = serde_json::to_string(&decision)?;
                assert!(!json.contains("oncologic emergency"));
            }
            LookupOutcome::Granted(result) => panic!("expected denial, got {result:?}"),
        }

        let clinician = CallerAttributes::new(Some("us"), true, false);
        match ready(api.lookup_exact(&clinician, "neutropenic fever", Some(40))?) {
            LookupOutcome::Granted(result) => {
                assert_eq!(result.count, 1);
                let hit = &result.results[0];
                assert!(hit.source.starts_with("clinical-guidelines:oncology/neutropenic-fever#"));
                assert!(hit.truncated);
                assert!(hit.content.contains("... [TRUNCATED. Full content in oncology/neutropenic-fever#"));
            }
            LookupOutcome::Denied(decision) => panic!("expected grant, got {decision:?}"),
        }
        Ok(())
    }

    #[test]
    fn routing_withholds_text_from_denied_callers() -> Result<()> {
        let api = KnowledgeRouterApi::default();
        api.publish(fixture_pack()?)?;

        for outsider in [CallerAttributes::default(), CallerAttributes::new(Some("EU"), true, true)] {
            let routed = ready(api.route_query(&outsider, "neutropenic fever"));
            let top = ready(api.get_top_section(&outsider, "neutropenic fever"));
            let trace = ready(api.get_routing_trace(&outsider, "neutropenic fever"));
            assert!(!routed.is_granted() && !top.is_granted() && !trace.is_granted());

            let body = format!(
                "{}{}{}",
                serde_json::to_string(&routed)?,
                serde_json::to_string(&top)?,
                serde_json::to_string(&trace)?
            );
            assert!(!body.contains("oncologic emergency"), "section text leaked: {body}");
            assert!(body.contains("residency violation"));
        }

        let routed = ready(api.route_query(&clinician(), "neutropenic fever"))
            .granted()
            .unwrap_or_else(|| panic!("cleared caller should be routed"));
        assert_eq!(routed.sections[0].file_id, "oncology/neutropenic-fever");
        assert!(routed.sections[0].text.contains("oncologic emergency"));
        Ok(())
    }

    #[test]
    fn policy_summary_reflects_fixture_security() -> Result<()> {
        let api = KnowledgeRouterApi::default();
        api.publish(fixture_pack()?)?;
        let summary = ready(api.get_policy_summary());
        assert!(summary.residency_required);
        assert!(summary.phi_protected);
        assert!(!summary.pii_protected);
        assert_eq!(summary.enforcement_level, EnforcementLevel::Strict);
        Ok(())
    }

    #[test]
    fn failed_publish_keeps_previous_generation() -> Result<()> {
        let api = KnowledgeRouterApi::default();
        let first = api.publish(fixture_pack()?)?;

        let mut broken = fixture_pack()?;
        broken.content[0].sections.clear();
        assert!(api.publish(broken).is_err());

        let current = ready(api.generation());
        assert_eq!(current.generation_id, first.generation.generation_id);
        Ok(())
    }

    #[test]
    fn republish_reports_replaced_generation() -> Result<()> {
        let api = KnowledgeRouterApi::default();
        let first = api.publish(fixture_pack()?)?;

        let mut next = fixture_pack()?;
        next.manifest.version = "2026.2".to_string();
        next.toc.security = SecurityMetadata::default();
        let second = api.publish(next)?;

        assert_eq!(second.replaced_generation_id, Some(first.generation.generation_id.clone()));
        assert_ne!(second.generation.generation_id, first.generation.generation_id);
        assert_eq!(ready(api.enforce(Some("EU"), false, false)).reason, "Access granted.");
        Ok(())
    }

    #[test]
    fn readers_observe_one_generation_per_query() -> Result<()> {
        let api = KnowledgeRouterApi::default();
        let permissive = {
            let mut pack = fixture_pack()?;
            pack.toc.security = SecurityMetadata::default();
            pack
        };
        let restricted = fixture_pack()?;
        api.publish(permissive.clone())?;

        thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..200 {
                        let Some(snapshot) = api.snapshot() else {
                            panic!("slot must stay initialized once published");
                        };
                        let summary = snapshot.get_policy_summary();
                        let decision = snapshot.enforce(Some("EU"), false, false);
                        assert_eq!(summary.active_policies == 0, decision.allowed);
                    }
                });
            }
            scope.spawn(|| {
                for round in 0..50 {
                    let pack = if round % 2 == 0 { restricted.clone() } else { permissive.clone() };
                    if let Err(err) = api.publish(pack) {
                        panic!("publish failed: {err}");
                    }
                }
            });
        });
        Ok(())
    }

    #[test]
    fn config_loads_from_yaml_and_rejects_bad_values() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let good = dir.path().join("router.yaml");
        fs::write(
            &good,
            "weights:\n  alias: 4.0\nexact_match_threshold: 12.5\nnamespace: guidelines\n",
        )?;
        let config = load_config(&good)?;
        assert!((config.weights.alias - 4.0).abs() < f64::EPSILON);
        assert!((config.weights.text - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.namespace.as_deref(), Some("guidelines"));

        let bad = dir.path().join("bad.yaml");
        fs::write(&bad, "max_chunk_chars: 0\n")?;
        match load_config(&bad) {
            Err(err) => assert!(format!("{err:#}").contains("max_chunk_chars")),
            Ok(config) => panic!("expected invalid config, got {config:?}"),
        }
        Ok(())
    }

    #[test]
    fn publish_file_reads_pack_json() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("pack.json");
        write_pack(&path, &fixture_pack()?)?;

        let api = KnowledgeRouterApi::default();
        let receipt = api.publish_file(&path)?;
        assert_eq!(receipt.generation.version, "2026.1");
        assert_eq!(receipt.generation.sections, 5);
        Ok(())
    }
}
