use serde::{Deserialize, Serialize};

use crate::SecurityMetadata;

pub const ACCESS_GRANTED: &str = "Access granted.";

/// Caller attributes, already parsed by the transport layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct CallerAttributes {
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub phi_clearance: bool,
    #[serde(default)]
    pub pii_clearance: bool,
}

impl CallerAttributes {
    #[must_use]
    pub fn new(region: Option<&str>, phi_clearance: bool, pii_clearance: bool) -> Self {
        Self { region: region.map(str::to_string), phi_clearance, pii_clearance }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub reason: String,
}

impl PolicyDecision {
    fn granted() -> Self {
        Self { allowed: true, reason: ACCESS_GRANTED.to_string() }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementLevel {
    Permissive,
    Moderate,
    Strict,
}

impl EnforcementLevel {
    #[must_use]
    pub fn from_active_policies(active: usize) -> Self {
        match active {
            0 => Self::Permissive,
            1 => Self::Moderate,
            _ => Self::Strict,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Permissive => "permissive",
            Self::Moderate => "moderate",
            Self::Strict => "strict",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct PolicySummary {
    pub residency_required: bool,
    pub residency: Option<String>,
    pub pii_protected: bool,
    pub phi_protected: bool,
    pub enforcement_level: EnforcementLevel,
    pub active_policies: usize,
}

/// Access-control gate evaluated before any section content is released.
///
/// Pure: no I/O, no logging, no state beyond the pack's [`SecurityMetadata`].
/// All active policies must pass; a denial lists every failing policy.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PolicyGate {
    security: SecurityMetadata,
}

impl PolicyGate {
    #[must_use]
    pub fn new(security: SecurityMetadata) -> Self {
        Self { security }
    }

    #[must_use]
    pub fn security(&self) -> &SecurityMetadata {
        &self.security
    }

    #[must_use]
    pub fn enforce(
        &self,
        user_region: Option<&str>,
        user_has_phi_clearance: bool,
        user_has_pii_clearance: bool,
    ) -> PolicyDecision {
        let mut violations = Vec::new();

        if let Some(required) = self.security.residency_region() {
            let actual = user_region.map(str::trim).filter(|region| !region.is_empty());
            let matches = actual.is_some_and(|region| region.eq_ignore_ascii_case(required));
            if !matches {
                violations.push(format!(
                    "residency violation: requires {required}, got {}",
                    actual.unwrap_or("none")
                ));
            }
        }

        if self.security.phi && !user_has_phi_clearance {
            violations.push("phi violation: pack contains phi and caller lacks phi clearance".to_string());
        }

        if self.security.pii && !user_has_pii_clearance {
            violations.push("pii violation: pack contains pii and caller lacks pii clearance".to_string());
        }

        if violations.is_empty() {
            PolicyDecision::granted()
        } else {
            PolicyDecision { allowed: false, reason: violations.join("; ") }
        }
    }

    #[must_use]
    pub fn enforce_caller(&self, caller: &CallerAttributes) -> PolicyDecision {
        self.enforce(caller.region.as_deref(), caller.phi_clearance, caller.pii_clearance)
    }

    #[must_use]
    pub fn active_policies(&self) -> usize {
        [self.security.residency_region().is_some(), self.security.pii, self.security.phi]
            .into_iter()
            .filter(|active| *active)
            .count()
    }

    #[must_use]
    pub fn policy_summary(&self) -> PolicySummary {
        let active_policies = self.active_policies();
        PolicySummary {
            residency_required: self.security.residency_region().is_some(),
            residency: self.security.residency_region().map(str::to_string),
            pii_protected: self.security.pii,
            phi_protected: self.security.phi,
            enforcement_level: EnforcementLevel::from_active_policies(active_policies),
            active_policies,
        }
    }
}
