use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

/// Issuance parameters. Every section and field falls back to its default,
/// so an empty file is a valid configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PkiConfig {
    #[serde(default)]
    pub keys: KeySizes,
    #[serde(default)]
    pub validity: ValidityPeriods,
    #[serde(default)]
    pub chain: ChainLimits,
    #[serde(default)]
    pub subject: SubjectDefaults,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KeySizes {
    #[serde(default = "default_root_bits")]
    pub root_bits: u32,
    #[serde(default = "default_key_bits")]
    pub default_bits: u32,
}

impl Default for KeySizes {
    fn default() -> Self {
        Self {
            root_bits: default_root_bits(),
            default_bits: default_key_bits(),
        }
    }
}

fn default_root_bits() -> u32 {
    4096
}

fn default_key_bits() -> u32 {
    2048
}

/// Validity periods, in days
#[derive(Debug, Deserialize, Clone)]
pub struct ValidityPeriods {
    #[serde(default = "default_root_days")]
    pub root: u32,
    #[serde(default = "default_intermediate_days")]
    pub intermediate: u32,
    #[serde(default = "default_node_days")]
    pub node: u32,
    #[serde(default = "default_browser_days")]
    pub browser: u32,
    #[serde(default = "default_backup_days")]
    pub backup: u32,
    #[serde(default = "default_federation_days")]
    pub federation: u32,
    #[serde(default = "default_hosting_days")]
    pub hosting: u32,
    /// Subtracted from `now` for `not_before` (clock skew tolerance)
    #[serde(default = "default_backdate_days")]
    pub backdate: u32,
}

impl Default for ValidityPeriods {
    fn default() -> Self {
        Self {
            root: default_root_days(),
            intermediate: default_intermediate_days(),
            node: default_node_days(),
            browser: default_browser_days(),
            backup: default_backup_days(),
            federation: default_federation_days(),
            hosting: default_hosting_days(),
            backdate: default_backdate_days(),
        }
    }
}

fn default_root_days() -> u32 {
    3650 // 10 years
}

fn default_intermediate_days() -> u32 {
    730
}

fn default_node_days() -> u32 {
    366
}

fn default_browser_days() -> u32 {
    42 // 6 weeks
}

fn default_backup_days() -> u32 {
    366
}

fn default_federation_days() -> u32 {
    28
}

fn default_hosting_days() -> u32 {
    90
}

fn default_backdate_days() -> u32 {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChainLimits {
    #[serde(default = "default_role_max_hops")]
    pub role_max_hops: usize,
    #[serde(default = "default_rotation_max_hops")]
    pub rotation_max_hops: usize,
}

impl Default for ChainLimits {
    fn default() -> Self {
        Self {
            role_max_hops: default_role_max_hops(),
            rotation_max_hops: default_rotation_max_hops(),
        }
    }
}

fn default_role_max_hops() -> usize {
    5
}

fn default_rotation_max_hops() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct SubjectDefaults {
    #[serde(default = "default_root_cn")]
    pub root_common_name: String,
    #[serde(default = "default_root_org")]
    pub root_organization: String,
    #[serde(default = "default_intermediate_ou")]
    pub intermediate_unit: String,
}

impl Default for SubjectDefaults {
    fn default() -> Self {
        Self {
            root_common_name: default_root_cn(),
            root_organization: default_root_org(),
            intermediate_unit: default_intermediate_ou(),
        }
    }
}

fn default_root_cn() -> String {
    "millegrille".to_string()
}

fn default_root_org() -> String {
    "MilleGrille".to_string()
}

fn default_intermediate_ou() -> String {
    "millegrille".to_string()
}

impl PkiConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let config_str =
            fs::read_to_string(path).context(format!("Failed to read config file: {}", path))?;

        let config: PkiConfig =
            toml::from_str(&config_str).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load configuration with default path (pki.toml)
    pub fn load() -> Result<Self> {
        Self::from_file("pki.toml")
    }
}
