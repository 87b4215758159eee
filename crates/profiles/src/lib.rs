//! mcpredact_profiles
//!
//! Compliance profiles select which redaction stages run and, for stage 2,
//! which Comprehend entity types are acted on. A profile is resolved once
//! at startup from `Config::compliance_profile` and handed to the PII
//! middleware for the lifetime of the process.

use once_cell::sync::Lazy;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub name: &'static str,
    pub stage1_enabled: bool,
    pub stage2_enabled: bool,
    /// Comprehend entity types stage 2 is allowed to act on. Empty means
    /// "all types the backend reports".
    pub allowed_ner_types: BTreeSet<String>,
}

fn types(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// The default stage-2 entity-type set, excluding categories stage 1's
/// regexes already cover (email, phone, SSN, card numbers, IBANs).
pub fn default_ner_types() -> BTreeSet<String> {
    types(&[
        "NAME",
        "ADDRESS",
        "DATE_TIME",
        "AGE",
        "USERNAME",
        "PASSWORD",
        "IP_ADDRESS",
        "BANK_ACCOUNT_NUMBER",
        "PASSPORT_NUMBER",
        "DRIVER_ID",
        "AWS_ACCESS_KEY",
        "MAC_ADDRESS",
    ])
}

static GDPR: Lazy<Profile> = Lazy::new(|| Profile {
    name: "GDPR",
    stage1_enabled: true,
    stage2_enabled: true,
    allowed_ner_types: types(&["NAME", "ADDRESS", "DATE_TIME", "PASSPORT_NUMBER", "DRIVER_ID"]),
});

static DORA: Lazy<Profile> = Lazy::new(|| Profile {
    name: "DORA",
    stage1_enabled: true,
    stage2_enabled: false,
    allowed_ner_types: BTreeSet::new(),
});

static PCI_DSS: Lazy<Profile> = Lazy::new(|| Profile {
    name: "PCI_DSS",
    stage1_enabled: true,
    stage2_enabled: false,
    allowed_ner_types: BTreeSet::new(),
});

static FULL: Lazy<Profile> = Lazy::new(|| Profile {
    name: "full",
    stage1_enabled: true,
    stage2_enabled: true,
    allowed_ner_types: default_ner_types(),
});

/// Resolve a profile by name (case-sensitive, matching the exact names
/// accepted in `COMPLIANCE_PROFILE`). Unknown names fall back to GDPR and
/// emit a warning so a typo'd profile name doesn't silently under-redact.
pub fn get_profile(name: &str) -> Profile {
    match name {
        "GDPR" => GDPR.clone(),
        "DORA" => DORA.clone(),
        "PCI_DSS" => PCI_DSS.clone(),
        "full" => FULL.clone(),
        other => {
            tracing::warn!(profile = other, "Unknown compliance profile, falling back to GDPR");
            GDPR.clone()
        }
    }
}
