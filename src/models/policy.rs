use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::ProtocolClass;
use crate::balancer::Strategy;
use crate::error::{PoolError, Result};

/// Category of automated action requesting a proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    AccountCreation,
    Login,
    OtpRetrieval,
    MessageSend,
    Verification,
    BulkOperation,
    Testing,
    General,
}

impl OperationType {
    pub const ALL: [OperationType; 8] = [
        Self::AccountCreation,
        Self::Login,
        Self::OtpRetrieval,
        Self::MessageSend,
        Self::Verification,
        Self::BulkOperation,
        Self::Testing,
        Self::General,
    ];

    /// Strict parse; `None` for names outside the fixed set
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "account_creation" => Some(Self::AccountCreation),
            "login" => Some(Self::Login),
            "otp_retrieval" => Some(Self::OtpRetrieval),
            "message_send" => Some(Self::MessageSend),
            "verification" => Some(Self::Verification),
            "bulk_operation" => Some(Self::BulkOperation),
            "testing" => Some(Self::Testing),
            "general" => Some(Self::General),
            _ => None,
        }
    }

    /// Parse an operation name; anything unrecognised is `General`
    pub fn from_str(s: &str) -> Self {
        Self::parse(s).unwrap_or(Self::General)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccountCreation => "account_creation",
            Self::Login => "login",
            Self::OtpRetrieval => "otp_retrieval",
            Self::MessageSend => "message_send",
            Self::Verification => "verification",
            Self::BulkOperation => "bulk_operation",
            Self::Testing => "testing",
            Self::General => "general",
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Selection rules for one operation type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionPolicy {
    pub allowed_protocols: Vec<ProtocolClass>,
    pub min_reputation: u8,
    pub strategy: Strategy,
    pub country_match_required: bool,
}

impl SelectionPolicy {
    fn new(
        allowed_protocols: &[ProtocolClass],
        min_reputation: u8,
        strategy: Strategy,
        country_match_required: bool,
    ) -> Self {
        Self {
            allowed_protocols: allowed_protocols.to_vec(),
            min_reputation,
            strategy,
            country_match_required,
        }
    }

    pub fn allows(&self, protocol: ProtocolClass) -> bool {
        self.allowed_protocols.contains(&protocol)
    }
}

/// Partial policy read from a policy file; unset fields keep the default
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyOverride {
    pub allowed_protocols: Option<Vec<ProtocolClass>>,
    pub min_reputation: Option<u8>,
    pub strategy: Option<Strategy>,
    pub country_match_required: Option<bool>,
}

/// Operation type to policy lookup
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyTable {
    policies: HashMap<OperationType, SelectionPolicy>,
}

impl Default for PolicyTable {
    fn default() -> Self {
        use ProtocolClass::{Http, Socks4, Socks5};

        let policies = HashMap::from([
            (
                OperationType::AccountCreation,
                SelectionPolicy::new(&[Socks5, Http], 70, Strategy::WeightedRandom, true),
            ),
            (
                OperationType::Login,
                SelectionPolicy::new(&[Socks5, Http], 60, Strategy::LeastRecentlyUsed, true),
            ),
            (
                OperationType::OtpRetrieval,
                SelectionPolicy::new(&[Socks5, Socks4, Http], 50, Strategy::FastestResponse, false),
            ),
            (
                OperationType::MessageSend,
                SelectionPolicy::new(&[Socks5, Http], 50, Strategy::RoundRobin, false),
            ),
            (
                OperationType::Verification,
                SelectionPolicy::new(&[Socks5, Http], 60, Strategy::BestReputation, true),
            ),
            (
                OperationType::BulkOperation,
                SelectionPolicy::new(&[Socks5, Socks4, Http], 40, Strategy::RoundRobin, false),
            ),
            (
                OperationType::Testing,
                SelectionPolicy::new(&[Socks5, Socks4, Http], 0, Strategy::Random, false),
            ),
            (
                OperationType::General,
                SelectionPolicy::new(&[Socks5, Socks4, Http], 30, Strategy::WeightedRandom, false),
            ),
        ]);

        Self { policies }
    }
}

impl PolicyTable {
    /// Policy for an operation; every operation type always has one
    pub fn get(&self, operation: OperationType) -> SelectionPolicy {
        self.policies
            .get(&operation)
            .cloned()
            .unwrap_or_else(|| Self::default().policies[&OperationType::General].clone())
    }

    pub fn set_strategy(&mut self, operation: OperationType, strategy: Strategy) {
        let mut policy = self.get(operation);
        policy.strategy = strategy;
        self.policies.insert(operation, policy);
    }

    /// Apply overrides keyed by operation name on top of the current table
    pub fn apply_overrides(&mut self, overrides: HashMap<String, PolicyOverride>) -> Result<()> {
        for (name, over) in overrides {
            let operation = OperationType::parse(&name).ok_or_else(|| {
                PoolError::Configuration(format!("unknown operation type in policy file: {}", name))
            })?;

            let mut policy = self.get(operation);
            if let Some(protocols) = over.allowed_protocols {
                if protocols.is_empty() {
                    return Err(PoolError::Configuration(format!(
                        "policy for {} allows no protocol classes",
                        name
                    )));
                }
                policy.allowed_protocols = protocols;
            }
            if let Some(min) = over.min_reputation {
                policy.min_reputation = min.min(100);
            }
            if let Some(strategy) = over.strategy {
                policy.strategy = strategy;
            }
            if let Some(required) = over.country_match_required {
                policy.country_match_required = required;
            }
            self.policies.insert(operation, policy);
        }
        Ok(())
    }

    /// Parse a JSON policy document and merge it over the defaults
    pub fn from_json(raw: &str) -> Result<Self> {
        let overrides: HashMap<String, PolicyOverride> = serde_json::from_str(raw)
            .map_err(|e| PoolError::Configuration(format!("invalid policy file: {}", e)))?;
        let mut table = Self::default();
        table.apply_overrides(overrides)?;
        Ok(table)
    }

    /// Policies in a stable order, for display
    pub fn entries(&self) -> Vec<(OperationType, SelectionPolicy)> {
        OperationType::ALL
            .iter()
            .map(|op| (*op, self.get(*op)))
            .collect()
    }
}
