//! Quote pipeline: parameter types, fingerprinting, debounced fetch

pub mod pipeline;

pub use pipeline::{QuoteConfig, QuoteFeed, QuotePipeline};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::model::ChainId;
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

/// Route selection preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutePreference {
    Fastest,
    Cheapest,
}

/// Live pricing against a connected account, or preview pricing without one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteMode {
    Live,
    Preview,
}

/// User-facing quote parameters, before account resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteParams {
    pub source_chain: ChainId,
    pub source_token: Address,
    pub destination_chain: ChainId,
    pub destination_token: Address,
    pub amount: U256,
    pub account: Option<Address>,
    pub auto_deposit: bool,
    pub slippage_bps: u32,
    pub route_preference: RoutePreference,
    pub mode: QuoteMode,
}

impl QuoteParams {
    /// Cache key over the full parameter set.
    ///
    /// The mode is part of the key and the preview placeholder account is
    /// never substituted before hashing, so preview quotes can never collide
    /// with live quotes for the same account-less parameters.
    pub fn fingerprint(&self) -> String {
        let encoded = serde_json::to_vec(self).expect("params are serializable");
        let digest = Keccak256::digest(&encoded);
        hex::encode(digest)
    }

    /// True when `other` differs from `self` only in the amount field.
    /// Amount-only changes are debounced; everything else fetches
    /// immediately.
    pub fn is_amount_only_change(&self, other: &QuoteParams) -> bool {
        let mut normalized = other.clone();
        normalized.amount = self.amount;
        normalized == *self && self.amount != other.amount
    }
}

/// Account-resolved request sent to the quote backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub source_chain: ChainId,
    pub source_token: Address,
    pub destination_chain: ChainId,
    pub destination_token: Address,
    pub amount: U256,
    pub account: Address,
    pub auto_deposit: bool,
    pub slippage_bps: u32,
    pub route_preference: RoutePreference,
}

impl QuoteRequest {
    /// Resolve params into a backend request. Preview mode substitutes the
    /// configured placeholder account so pricing works without a wallet.
    pub fn resolve(
        params: &QuoteParams,
        placeholder_account: Address,
    ) -> OrchestratorResult<Self> {
        let account = match params.mode {
            QuoteMode::Preview => placeholder_account,
            QuoteMode::Live => params.account.ok_or(OrchestratorError::SignerUnavailable)?,
        };
        Ok(QuoteRequest {
            source_chain: params.source_chain,
            source_token: params.source_token,
            destination_chain: params.destination_chain,
            destination_token: params.destination_token,
            amount: params.amount,
            account,
            auto_deposit: params.auto_deposit,
            slippage_bps: params.slippage_bps,
            route_preference: params.route_preference,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(mode: QuoteMode) -> QuoteParams {
        QuoteParams {
            source_chain: 1,
            source_token: Address::repeat_byte(0x01),
            destination_chain: 42161,
            destination_token: Address::repeat_byte(0x02),
            amount: U256::from(1_000_000u64),
            account: None,
            auto_deposit: true,
            slippage_bps: 50,
            route_preference: RoutePreference::Fastest,
            mode,
        }
    }

    #[test]
    fn preview_and_live_never_share_a_fingerprint() {
        let preview = params(QuoteMode::Preview);
        let live = params(QuoteMode::Live);
        assert_ne!(preview.fingerprint(), live.fingerprint());
    }

    #[test]
    fn fingerprint_changes_with_amount() {
        let a = params(QuoteMode::Live);
        let mut b = a.clone();
        b.amount = U256::from(2_000_000u64);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn amount_only_change_detection() {
        let a = params(QuoteMode::Live);
        let mut b = a.clone();
        b.amount = U256::from(2_000_000u64);
        assert!(a.is_amount_only_change(&b));

        let mut c = b.clone();
        c.slippage_bps = 100;
        assert!(!a.is_amount_only_change(&c));
        assert!(!a.is_amount_only_change(&a.clone()));
    }

    #[test]
    fn live_mode_requires_an_account() {
        let placeholder = Address::repeat_byte(0xee);
        let live = params(QuoteMode::Live);
        assert!(QuoteRequest::resolve(&live, placeholder).is_err());

        let preview = params(QuoteMode::Preview);
        let request = QuoteRequest::resolve(&preview, placeholder).unwrap();
        assert_eq!(request.account, placeholder);
    }
}
