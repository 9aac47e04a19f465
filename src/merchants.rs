//! Merchant resolution seam.
//!
//! The engine only needs a handful of facts about a merchant: who its
//! super-merchant is, which fee tier applies, and whether it may
//! transact. A directory backed by an ops-managed JSON document covers
//! the platform today; the trait leaves room for a database-backed one.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fees::FeeTier;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerchantProfile {
    pub id: Uuid,
    pub name: String,
    pub super_merchant_id: Uuid,
    pub fee_tier: FeeTier,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuperMerchant {
    pub id: Uuid,
    pub name: String,
    pub active: bool,
}

#[async_trait]
pub trait MerchantDirectory: Send + Sync {
    async fn merchant(&self, id: Uuid) -> Option<MerchantProfile>;
    async fn active_merchants(&self) -> Vec<MerchantProfile>;
    async fn active_super_merchants(&self) -> Vec<SuperMerchant>;
}

/// Directory loaded once at startup from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticMerchantDirectory {
    pub merchants: Vec<MerchantProfile>,
    pub super_merchants: Vec<SuperMerchant>,
}

impl StaticMerchantDirectory {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Fixture pair used by the sandbox deployment and the tests: one
    /// standard-tier merchant under one super-merchant.
    pub fn sandbox() -> Self {
        let super_id = Uuid::from_u128(0x00000000_0000_0000_0000_0000000000a1);
        let merchant_id = Uuid::from_u128(0x00000000_0000_0000_0000_0000000000b2);
        Self {
            merchants: vec![MerchantProfile {
                id: merchant_id,
                name: "Merchant LLC".to_string(),
                super_merchant_id: super_id,
                fee_tier: FeeTier::Standard,
                active: true,
            }],
            super_merchants: vec![SuperMerchant {
                id: super_id,
                name: "Super Merchant Corp".to_string(),
                active: true,
            }],
        }
    }
}

#[async_trait]
impl MerchantDirectory for StaticMerchantDirectory {
    async fn merchant(&self, id: Uuid) -> Option<MerchantProfile> {
        self.merchants.iter().find(|m| m.id == id).cloned()
    }

    async fn active_merchants(&self) -> Vec<MerchantProfile> {
        self.merchants.iter().filter(|m| m.active).cloned().collect()
    }

    async fn active_super_merchants(&self) -> Vec<SuperMerchant> {
        self.super_merchants
            .iter()
            .filter(|s| s.active)
            .cloned()
            .collect()
    }
}
