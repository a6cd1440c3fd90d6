//! REST clients for the bridge aggregator and the trading venue
//!
//! Thin wrappers: transport errors are caught here and re-emitted as
//! structured orchestrator errors; nothing leaks a raw reqwest error upward.

use super::{BridgeApi, ReceiptStatus, TransferStatus, VenueApi};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::model::{ChainId, Quote, QuoteStep};
use crate::quote::QuoteRequest;
use crate::signer::TxRequest;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// ERC-20 `approve(address,uint256)` selector
const APPROVE_SELECTOR: [u8; 4] = [0x09, 0x5e, 0xa7, 0xb3];

fn http_err(e: reqwest::Error) -> OrchestratorError {
    OrchestratorError::Http(e.to_string())
}

fn parse_amount(s: &str) -> OrchestratorResult<U256> {
    U256::from_dec_str(s)
        .map_err(|e| OrchestratorError::Internal(format!("Bad amount from API: {}", e)))
}

/// Wire shape of a signable transaction returned by either service
#[derive(Debug, Deserialize)]
struct TxDto {
    to: Address,
    data: Bytes,
    value: Option<String>,
    gas_limit: Option<String>,
    chain_id: Option<u64>,
}

impl TxDto {
    fn into_request(self) -> OrchestratorResult<TxRequest> {
        Ok(TxRequest {
            to: self.to,
            data: self.data,
            value: self.value.as_deref().map(parse_amount).transpose()?,
            gas_limit: self.gas_limit.as_deref().map(parse_amount).transpose()?,
            chain_id: self.chain_id,
        })
    }
}

/// Client for the quote/execution backend
pub struct HttpBridgeClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBridgeClient {
    pub fn new(base_url: &str) -> OrchestratorResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(http_err)?;
        Ok(HttpBridgeClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ReceiptDto {
    status: String,
}

#[derive(Debug, Deserialize)]
struct BalanceDto {
    balance: String,
}

#[derive(Debug, Deserialize)]
struct AllowanceDto {
    allowance: String,
}

#[async_trait]
impl BridgeApi for HttpBridgeClient {
    async fn fetch_quote(&self, request: &QuoteRequest) -> OrchestratorResult<Quote> {
        let url = format!("{}/v1/quote", self.base_url);
        debug!(amount = %request.amount, "Fetching quote");
        let resp = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(http_err)?
            .error_for_status()
            .map_err(http_err)?;
        resp.json::<Quote>().await.map_err(http_err)
    }

    async fn step_transaction(
        &self,
        quote: &Quote,
        step: &QuoteStep,
    ) -> OrchestratorResult<TxRequest> {
        let url = format!(
            "{}/v1/quotes/{}/steps/{}/transaction",
            self.base_url, quote.quote_id, step.step_id
        );
        let resp = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(http_err)?
            .error_for_status()
            .map_err(http_err)?;
        resp.json::<TxDto>().await.map_err(http_err)?.into_request()
    }

    async fn receipt_status(
        &self,
        chain_id: ChainId,
        tx_hash: H256,
    ) -> OrchestratorResult<Option<ReceiptStatus>> {
        let url = format!(
            "{}/v1/chains/{}/transactions/{:#x}/receipt",
            self.base_url, chain_id, tx_hash
        );
        let resp = self.client.get(&url).send().await.map_err(http_err)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let dto = resp
            .error_for_status()
            .map_err(http_err)?
            .json::<ReceiptDto>()
            .await
            .map_err(http_err)?;
        match dto.status.as_str() {
            "success" => Ok(Some(ReceiptStatus::Success)),
            "reverted" => Ok(Some(ReceiptStatus::Reverted)),
            "pending" => Ok(None),
            other => Err(OrchestratorError::Internal(format!(
                "Unknown receipt status: {}",
                other
            ))),
        }
    }

    async fn transfer_status(&self, tx_hash: H256) -> OrchestratorResult<TransferStatus> {
        let url = format!("{}/v1/transfers/{:#x}", self.base_url, tx_hash);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(http_err)?
            .error_for_status()
            .map_err(http_err)?;
        resp.json::<TransferStatus>().await.map_err(http_err)
    }

    async fn token_balance(
        &self,
        chain_id: ChainId,
        token: Address,
        account: Address,
    ) -> OrchestratorResult<U256> {
        let url = format!("{}/v1/chains/{}/balance", self.base_url, chain_id);
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("token", format!("{:#x}", token)),
                ("account", format!("{:#x}", account)),
            ])
            .send()
            .await
            .map_err(http_err)?
            .error_for_status()
            .map_err(http_err)?;
        let dto = resp.json::<BalanceDto>().await.map_err(http_err)?;
        parse_amount(&dto.balance)
    }

    async fn allowance(
        &self,
        chain_id: ChainId,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> OrchestratorResult<U256> {
        let url = format!("{}/v1/chains/{}/allowance", self.base_url, chain_id);
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("token", format!("{:#x}", token)),
                ("owner", format!("{:#x}", owner)),
                ("spender", format!("{:#x}", spender)),
            ])
            .send()
            .await
            .map_err(http_err)?
            .error_for_status()
            .map_err(http_err)?;
        let dto = resp.json::<AllowanceDto>().await.map_err(http_err)?;
        parse_amount(&dto.allowance)
    }
}

/// Client for the trading venue's deposit surface
pub struct HttpVenueClient {
    client: reqwest::Client,
    base_url: String,
    chain_id: ChainId,
    token: Address,
    contract: Address,
}

impl HttpVenueClient {
    pub fn new(
        base_url: &str,
        chain_id: ChainId,
        token: Address,
        contract: Address,
    ) -> OrchestratorResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(http_err)?;
        Ok(HttpVenueClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            chain_id,
            token,
            contract,
        })
    }
}

#[derive(Debug, Deserialize)]
struct LedgerBalanceDto {
    tradable_balance: String,
}

#[async_trait]
impl VenueApi for HttpVenueClient {
    fn deposit_chain_id(&self) -> ChainId {
        self.chain_id
    }

    fn deposit_token(&self) -> Address {
        self.token
    }

    fn deposit_contract(&self) -> Address {
        self.contract
    }

    async fn deposit_transaction(
        &self,
        account: Address,
        amount: U256,
    ) -> OrchestratorResult<TxRequest> {
        let url = format!("{}/v1/deposit/transaction", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "account": format!("{:#x}", account),
                "amount": amount.to_string(),
            }))
            .send()
            .await
            .map_err(http_err)?
            .error_for_status()
            .map_err(http_err)?;
        resp.json::<TxDto>().await.map_err(http_err)?.into_request()
    }

    async fn approval_transaction(
        &self,
        _owner: Address,
        amount: U256,
    ) -> OrchestratorResult<TxRequest> {
        // approve(spender, amount) encoded locally; no round trip needed
        let mut data = APPROVE_SELECTOR.to_vec();
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(self.contract.as_bytes());
        let mut amount_buf = [0u8; 32];
        amount.to_big_endian(&mut amount_buf);
        data.extend_from_slice(&amount_buf);

        Ok(TxRequest::new(self.token, Bytes::from(data)).with_chain_id(self.chain_id))
    }

    async fn ledger_balance(&self, account: Address) -> OrchestratorResult<U256> {
        let url = format!("{}/v1/accounts/{:#x}/balance", self.base_url, account);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(http_err)?
            .error_for_status()
            .map_err(http_err)?;
        let dto = resp.json::<LedgerBalanceDto>().await.map_err(http_err)?;
        parse_amount(&dto.tradable_balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approval_calldata_is_selector_spender_amount() {
        let venue = HttpVenueClient::new(
            "http://localhost:9999",
            42161,
            Address::repeat_byte(0xaa),
            Address::repeat_byte(0xbb),
        )
        .unwrap();

        let tx = futures::executor::block_on(
            venue.approval_transaction(Address::repeat_byte(0x01), U256::MAX),
        )
        .unwrap();

        assert_eq!(tx.to, Address::repeat_byte(0xaa));
        assert_eq!(tx.chain_id, Some(42161));
        let data = tx.data.as_ref();
        assert_eq!(data.len(), 4 + 32 + 32);
        assert_eq!(&data[0..4], &APPROVE_SELECTOR);
        assert_eq!(&data[16..36], Address::repeat_byte(0xbb).as_bytes());
        assert!(data[36..68].iter().all(|b| *b == 0xff));
    }

    #[test]
    fn amounts_parse_as_decimal_strings() {
        assert_eq!(parse_amount("1000000").unwrap(), U256::from(1_000_000u64));
        assert!(parse_amount("not-a-number").is_err());
    }
}
