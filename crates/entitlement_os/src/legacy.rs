#![forbid(unsafe_code)]

//! Pre-v4 endpoints kept for installed clients. They carry no per-machine
//! state; tier is inferred from the presence of a long enough license key.

use std::collections::BTreeMap;

use entitlement_kernel_contracts::ClientVersion;
use serde::Serialize;

pub const SERVICE_VERSION: &str = "4.0.0";
pub const UPGRADE_URL: &str = "https://polar.sh/clouvel";
pub const UPGRADE_PROMO_CODE: &str = "FIRST01";

/// Strictly longer than this counts as pro on legacy endpoints.
const LEGACY_PRO_KEY_MIN_EXCLUSIVE: usize = 10;

pub const V2_ENDPOINTS: [&str; 7] = [
    "/api/v2/sync",
    "/api/v2/trial/start",
    "/api/v2/project/register",
    "/api/v2/meeting/consume",
    "/api/v2/experiment/assign",
    "/api/v2/heartbeat",
    "/api/v2/check",
];
pub const V3_ENDPOINTS: [&str; 3] = ["/api/manager", "/api/ship", "/api/trial/status"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerProfile {
    pub code: &'static str,
    pub emoji: &'static str,
    pub title: &'static str,
    pub questions: &'static [&'static str],
}

pub const MANAGERS: [ManagerProfile; 8] = [
    ManagerProfile {
        code: "PM",
        emoji: "\u{1f454}",
        title: "Product Manager",
        questions: &[
            "Is this in the PRD?",
            "What is the MVP scope?",
            "What is the acceptance criteria?",
        ],
    },
    ManagerProfile {
        code: "CTO",
        emoji: "\u{1f6e0}\u{fe0f}",
        title: "CTO",
        questions: &[
            "Does this follow existing patterns?",
            "What is the maintenance burden?",
        ],
    },
    ManagerProfile {
        code: "QA",
        emoji: "\u{1f9ea}",
        title: "QA Lead",
        questions: &["What are the edge cases?", "How will you test this?"],
    },
    ManagerProfile {
        code: "CDO",
        emoji: "\u{1f3a8}",
        title: "Design Officer",
        questions: &["Is the UX intuitive?", "Does it match the design system?"],
    },
    ManagerProfile {
        code: "CMO",
        emoji: "\u{1f4e3}",
        title: "Marketing Officer",
        questions: &["How will users discover this?", "Messaging strategy?"],
    },
    ManagerProfile {
        code: "CFO",
        emoji: "\u{1f4b0}",
        title: "CFO",
        questions: &["What is the cost impact?", "ROI calculation?"],
    },
    ManagerProfile {
        code: "CSO",
        emoji: "\u{1f512}",
        title: "Security Officer",
        questions: &["Any security concerns?", "Data protection compliance?"],
    },
    ManagerProfile {
        code: "ERROR",
        emoji: "\u{1f525}",
        title: "Error Prevention",
        questions: &["What could go wrong?", "Recovery plan?"],
    },
];

pub const FREE_MANAGERS: [&str; 1] = ["PM"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LegacyTier {
    Free,
    Pro,
}

impl LegacyTier {
    pub fn from_license_key(key: Option<&str>) -> Self {
        match key {
            Some(k) if k.chars().count() > LEGACY_PRO_KEY_MIN_EXCLUSIVE => LegacyTier::Pro,
            _ => LegacyTier::Free,
        }
    }

    fn active_managers(self) -> Vec<&'static ManagerProfile> {
        match self {
            LegacyTier::Pro => MANAGERS.iter().collect(),
            LegacyTier::Free => MANAGERS
                .iter()
                .filter(|m| FREE_MANAGERS.contains(&m.code))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManagerView {
    pub emoji: &'static str,
    pub title: &'static str,
    pub questions: &'static [&'static str],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissedPerspective {
    pub emoji: &'static str,
    pub hint: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManagerFeedback {
    pub topic: String,
    pub active_managers: Vec<&'static str>,
    pub feedback: BTreeMap<&'static str, ManagerView>,
    pub formatted_output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missed_perspectives: Option<BTreeMap<&'static str, MissedPerspective>>,
    pub tier: LegacyTier,
}

pub fn manager_feedback(topic: Option<&str>, tier: LegacyTier) -> ManagerFeedback {
    let topic = topic.filter(|t| !t.is_empty()).unwrap_or("feature");
    let active = tier.active_managers();

    let mut out = String::from("## \u{1f4a1} C-Level Perspectives\n\n");
    out.push_str(&format!("**Topic**: {topic}\n\n"));
    for m in &active {
        out.push_str(&format!(
            "**{} {}**: {}\n\n",
            m.emoji,
            m.title,
            m.questions.join(" ")
        ));
    }

    let missed: BTreeMap<&'static str, MissedPerspective> = MANAGERS
        .iter()
        .filter(|m| !active.iter().any(|a| a.code == m.code))
        .map(|m| {
            (
                m.code,
                MissedPerspective {
                    emoji: m.emoji,
                    hint: m.title,
                },
            )
        })
        .collect();
    if !missed.is_empty() {
        let codes: Vec<&str> = MANAGERS
            .iter()
            .filter(|m| missed.contains_key(m.code))
            .map(|m| m.code)
            .collect();
        out.push_str("---\n\n");
        out.push_str(&format!(
            "**\u{1f48e} Pro: {} more managers** ({})\n",
            codes.len(),
            codes.join(", ")
        ));
        out.push_str(&format!(
            "\u{2192} {UPGRADE_URL} (code: {UPGRADE_PROMO_CODE})\n"
        ));
    }

    ManagerFeedback {
        topic: topic.to_string(),
        active_managers: active.iter().map(|m| m.code).collect(),
        feedback: active
            .iter()
            .map(|m| {
                (
                    m.code,
                    ManagerView {
                        emoji: m.emoji,
                        title: m.title,
                        questions: m.questions,
                    },
                )
            })
            .collect(),
        formatted_output: out,
        missed_perspectives: (!missed.is_empty()).then_some(missed),
        tier,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShipDecision {
    pub allowed: bool,
    pub tier: LegacyTier,
    pub message: &'static str,
}

/// Shipping is never blocked; only the message differs by tier.
pub fn ship_decision(tier: LegacyTier) -> ShipDecision {
    ShipDecision {
        allowed: true,
        tier,
        message: match tier {
            LegacyTier::Pro => "Pro license verified",
            LegacyTier::Free => "FREE tier - ship allowed",
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FreeTierFeatures {
    pub managers: Vec<&'static str>,
    pub can_code_mode: &'static str,
    pub project_limit: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FreeTierStatus {
    pub tier: LegacyTier,
    pub features: FreeTierFeatures,
    pub upgrade_url: &'static str,
}

pub fn free_tier_status() -> FreeTierStatus {
    FreeTierStatus {
        tier: LegacyTier::Free,
        features: FreeTierFeatures {
            managers: FREE_MANAGERS.to_vec(),
            can_code_mode: "warn",
            project_limit: 1,
        },
        upgrade_url: UPGRADE_URL,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpgradeChanges {
    pub free_managers: &'static str,
    pub can_code: &'static str,
    pub projects: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpgradeRequired {
    pub error: &'static str,
    pub message: String,
    pub min_version: String,
    pub changes: UpgradeChanges,
}

impl UpgradeRequired {
    pub fn for_minimum(minimum: &ClientVersion) -> Self {
        Self {
            error: "upgrade_required",
            message: format!(
                "Clouvel v{minimum}+ required. Run: pip install --upgrade clouvel"
            ),
            min_version: minimum.to_string(),
            changes: UpgradeChanges {
                free_managers: "PM only (was PM, CTO, QA)",
                can_code: "WARN mode (was BLOCK)",
                projects: "1 limit for FREE tier",
            },
        }
    }
}

/// Missing, unparseable or too-old versions are all refused.
pub fn check_client_version(
    header: Option<&str>,
    minimum: &ClientVersion,
) -> Result<ClientVersion, UpgradeRequired> {
    header
        .and_then(|raw| raw.trim().parse::<ClientVersion>().ok())
        .filter(|version| version.satisfies(minimum))
        .ok_or_else(|| UpgradeRequired::for_minimum(minimum))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointIndex {
    pub v2: Vec<&'static str>,
    pub v3: Vec<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceHealth {
    pub status: &'static str,
    pub version: &'static str,
    pub min_client_version: String,
    pub endpoints: EndpointIndex,
}

pub fn service_health(minimum: &ClientVersion) -> ServiceHealth {
    ServiceHealth {
        status: "ok",
        version: SERVICE_VERSION,
        min_client_version: minimum.to_string(),
        endpoints: EndpointIndex {
            v2: V2_ENDPOINTS.to_vec(),
            v3: V3_ENDPOINTS.to_vec(),
        },
    }
}
