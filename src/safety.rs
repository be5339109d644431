//! Risk classification over untrusted text.
//!
//! The classifier is a pure function of (text, policy): identical input under
//! identical policy always yields the same tier. Guardian overrides are
//! absolute (allowed phrases force green, blocked keywords force red) and
//! are applied before any built-in heuristics.

use crate::guardrails::{GuardrailSettings, Strictness};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Three-level risk tier with total ordering: green < yellow < red.
///
/// Tier combination (input vs. output risk) is `Ord::max`, defined here and
/// nowhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Green,
    Yellow,
    Red,
}

impl RiskTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Green => "green",
            RiskTier::Yellow => "yellow",
            RiskTier::Red => "red",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "green" => Some(RiskTier::Green),
            "yellow" => Some(RiskTier::Yellow),
            "red" => Some(RiskTier::Red),
            _ => None,
        }
    }
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifier verdict for one piece of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub tier: RiskTier,
    pub flags: BTreeSet<String>,
    pub explanation: String,
}

impl Classification {
    fn green() -> Self {
        Classification {
            tier: RiskTier::Green,
            flags: BTreeSet::new(),
            explanation: "no concerns".into(),
        }
    }
}

/// The classification seam. Implementations must be deterministic for a
/// given (text, policy) pair; an implementation backed by an external
/// moderation model must cache or otherwise pin its verdicts to honor that.
pub trait SafetyClassifier: Send + Sync {
    fn classify(&self, text: &str, policy: &GuardrailSettings) -> Classification;
}

/// Built-in rule classifier: guardian overrides first, then category phrase
/// lists, then strictness adjustment.
#[derive(Debug, Default, Clone)]
pub struct RuleClassifier;

/// Phrases that indicate self-harm or crisis. Always red.
const SELF_HARM: &[&str] = &[
    "kill myself",
    "hurt myself",
    "hurt yourself",
    "kill yourself",
    "want to die",
    "want to disappear",
    "hate my life",
    "end my life",
    "end it all",
    "suicide",
    "self harm",
    "cut myself",
    "nobody would miss me",
];

/// Phrases that indicate violence toward others or weapons. Always red.
const VIOLENCE: &[&str] = &[
    "kill you",
    "kill him",
    "kill her",
    "kill them",
    "make a bomb",
    "make a weapon",
    "get a gun",
    "stab",
    "shoot someone",
];

/// Personal-information probing. Borderline.
const PERSONAL_INFO: &[&str] = &[
    "my address is",
    "my phone number",
    "home address",
    "where do you live",
    "what school do you go to",
    "send me a picture",
    "keep it a secret from your parents",
];

/// Age-inappropriate substances. Borderline.
const SUBSTANCES: &[&str] = &["drugs", "get drunk", "vape", "cigarette", "smoke weed"];

/// Hostile or distressed language that isn't crisis-level. Borderline.
const HOSTILITY: &[&str] = &[
    "i hate you",
    "shut up",
    "everyone hates me",
    "i got bullied",
    "they bully me",
];

impl RuleClassifier {
    fn scan(text: &str, phrases: &[&str]) -> bool {
        phrases.iter().any(|p| text.contains(p))
    }
}

impl SafetyClassifier for RuleClassifier {
    fn classify(&self, text: &str, policy: &GuardrailSettings) -> Classification {
        let lowered = text.to_lowercase();

        // Guardian allowed phrases win over everything, including blocked
        // keywords that happen to be substrings of an allowed phrase.
        if let Some(phrase) = policy
            .allowed_phrases
            .iter()
            .find(|p| !p.is_empty() && lowered.contains(&p.to_lowercase()))
        {
            let mut flags = BTreeSet::new();
            flags.insert("allowed_phrase".into());
            return Classification {
                tier: RiskTier::Green,
                flags,
                explanation: format!("guardian-allowed phrase matched: {phrase:?}"),
            };
        }

        if let Some(keyword) = policy
            .blocked_keywords
            .iter()
            .find(|k| !k.is_empty() && lowered.contains(&k.to_lowercase()))
        {
            let mut flags = BTreeSet::new();
            flags.insert("blocked_keyword".into());
            return Classification {
                tier: RiskTier::Red,
                flags,
                explanation: format!("guardian-blocked keyword matched: {keyword:?}"),
            };
        }

        let mut flags = BTreeSet::new();
        let mut tier = RiskTier::Green;

        if Self::scan(&lowered, SELF_HARM) {
            flags.insert("self_harm".into());
            tier = RiskTier::Red;
        }
        if Self::scan(&lowered, VIOLENCE) {
            flags.insert("violence".into());
            tier = RiskTier::Red;
        }
        if Self::scan(&lowered, PERSONAL_INFO) {
            flags.insert("personal_info".into());
            tier = tier.max(RiskTier::Yellow);
        }
        if Self::scan(&lowered, SUBSTANCES) {
            flags.insert("substances".into());
            tier = tier.max(RiskTier::Yellow);
        }
        if Self::scan(&lowered, HOSTILITY) {
            flags.insert("hostility".into());
            tier = tier.max(RiskTier::Yellow);
        }

        // High strictness treats any borderline signal as blocking.
        if tier == RiskTier::Yellow && policy.strictness == Strictness::High {
            flags.insert("strictness_promoted".into());
            tier = RiskTier::Red;
        }

        if tier == RiskTier::Green {
            return Classification::green();
        }

        let categories: Vec<&str> = flags.iter().map(String::as_str).collect();
        Classification {
            tier,
            explanation: format!("flagged categories: {}", categories.join(", ")),
            flags,
        }
    }
}
