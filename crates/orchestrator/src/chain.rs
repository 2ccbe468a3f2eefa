//! Chain RPC access
//!
//! [`ChainClient`] is the read/sign/submit surface the orchestrator needs from
//! a node. [`AlloyChainClient`] talks to one endpoint through an alloy
//! provider; [`FallbackChainClient`] walks a priority-ordered list of them.

use std::sync::Arc;
use std::time::Duration;

use alloy::network::{EthereumWallet, TransactionBuilder as _};
use alloy::primitives::{Address, U256};
use alloy::providers::{
    DynProvider, PendingTransactionBuilder, PendingTransactionError, Provider, ProviderBuilder,
    WatchTxError,
};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::{coins_bip39::English, MnemonicBuilder, PrivateKeySigner};
use alloy::signers::Signer;
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use railgun_contracts::IERC20;
use railgun_core::{parse_token_amount, PopulatedTransaction, TxHash};

use crate::engine::FallbackProviderConfig;
use crate::error::{ChainError, OrchestratorResult};
use crate::wallet::Mnemonic;

/// Network fee suggestion; either field may be missing
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FeeData {
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
}

/// Receipt summary of a mined transaction
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Confirmation {
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
    pub gas_used: u64,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    fn chain_id(&self) -> u64;

    /// Address of the public wallet that signs and pays
    fn signer_address(&self) -> Address;

    async fn block_number(&self) -> Result<u64, ChainError>;

    async fn fee_data(&self) -> Result<FeeData, ChainError>;

    /// EIP-191 personal signature
    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>, ChainError>;

    async fn erc20_decimals(&self, token: Address) -> Result<u8, ChainError>;

    async fn erc20_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, ChainError>;

    /// Sign and send; returns once the node accepted the transaction
    async fn submit(&self, tx: &PopulatedTransaction) -> Result<TxHash, ChainError>;

    async fn wait_for_confirmation(
        &self,
        tx_hash: TxHash,
        timeout: Duration,
    ) -> Result<Confirmation, ChainError>;
}

/// Single-endpoint client backed by an alloy provider
pub struct AlloyChainClient {
    provider: DynProvider,
    signer: PrivateKeySigner,
    chain_id: u64,
    url: String,
}

impl AlloyChainClient {
    /// Connect to `rpc_url` with the first account (`m/44'/60'/0'/0/0`) of `mnemonic`
    pub fn connect(rpc_url: &str, mnemonic: &Mnemonic, chain_id: u64) -> Result<Self, ChainError> {
        let url: reqwest::Url = rpc_url
            .parse()
            .map_err(|e| ChainError::Transport(format!("invalid RPC URL {}: {}", rpc_url, e)))?;

        let signer = MnemonicBuilder::<English>::default()
            .phrase(mnemonic.expose())
            .index(0)
            .map_err(|e| ChainError::Signer(e.to_string()))?
            .build()
            .map_err(|e| ChainError::Signer(e.to_string()))?
            .with_chain_id(Some(chain_id));

        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer.clone()))
            .connect_http(url)
            .erased();

        Ok(Self {
            provider,
            signer,
            chain_id,
            url: rpc_url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn read_call(&self, to: Address, data: Vec<u8>) -> Result<alloy::primitives::Bytes, ChainError> {
        let request = TransactionRequest::default().with_to(to).with_input(data);
        self.provider
            .call(request)
            .await
            .map_err(|e| ChainError::Contract(e.to_string()))
    }
}

#[async_trait]
impl ChainClient for AlloyChainClient {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn signer_address(&self) -> Address {
        self.signer.address()
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))
    }

    async fn fee_data(&self) -> Result<FeeData, ChainError> {
        match self.provider.estimate_eip1559_fees().await {
            Ok(fees) => Ok(FeeData {
                max_fee_per_gas: Some(U256::from(fees.max_fee_per_gas)),
                max_priority_fee_per_gas: Some(U256::from(fees.max_priority_fee_per_gas)),
            }),
            Err(e) => {
                // Pre-London nodes only know the legacy price
                tracing::debug!("EIP-1559 fee estimate failed on {}: {}", self.url, e);
                let price = self
                    .provider
                    .get_gas_price()
                    .await
                    .map_err(|e| ChainError::Transport(e.to_string()))?;
                Ok(FeeData {
                    max_fee_per_gas: Some(U256::from(price)),
                    max_priority_fee_per_gas: None,
                })
            }
        }
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>, ChainError> {
        let signature = self
            .signer
            .sign_message(message)
            .await
            .map_err(|e| ChainError::Signer(e.to_string()))?;
        Ok(signature.as_bytes().to_vec())
    }

    async fn erc20_decimals(&self, token: Address) -> Result<u8, ChainError> {
        let out = self
            .read_call(token, IERC20::decimalsCall {}.abi_encode())
            .await?;
        IERC20::decimalsCall::abi_decode_returns(&out)
            .map_err(|e| ChainError::Contract(format!("decimals() of {}: {}", token, e)))
    }

    async fn erc20_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, ChainError> {
        let call = IERC20::allowanceCall { owner, spender };
        let out = self.read_call(token, call.abi_encode()).await?;
        IERC20::allowanceCall::abi_decode_returns(&out)
            .map_err(|e| ChainError::Contract(format!("allowance() of {}: {}", token, e)))
    }

    async fn submit(&self, tx: &PopulatedTransaction) -> Result<TxHash, ChainError> {
        let mut request = TransactionRequest::default()
            .with_from(self.signer.address())
            .with_to(tx.to())
            .with_input(tx.data().clone())
            .with_value(tx.value())
            .with_chain_id(self.chain_id);
        if let Some(gas_limit) = tx.gas_limit() {
            request = request.with_gas_limit(gas_limit);
        }
        if let Some(max_fee) = tx.max_fee_per_gas() {
            request = request.with_max_fee_per_gas(max_fee.saturating_to());
        }
        if let Some(priority) = tx.max_priority_fee_per_gas() {
            request = request.with_max_priority_fee_per_gas(priority.saturating_to());
        }

        let pending = self
            .provider
            .send_transaction(request)
            .await
            .map_err(|e| ChainError::Rejected(e.to_string()))?;
        Ok(*pending.tx_hash())
    }

    async fn wait_for_confirmation(
        &self,
        tx_hash: TxHash,
        timeout: Duration,
    ) -> Result<Confirmation, ChainError> {
        let receipt = PendingTransactionBuilder::new(self.provider.root().clone(), tx_hash)
            .with_timeout(Some(timeout))
            .get_receipt()
            .await
            .map_err(|e| match e {
                PendingTransactionError::TxWatcher(WatchTxError::Timeout) => {
                    ChainError::Timeout { tx_hash, timeout }
                }
                other => ChainError::Transport(other.to_string()),
            })?;

        if !receipt.status() {
            return Err(ChainError::Reverted(tx_hash));
        }

        Ok(Confirmation {
            tx_hash,
            block_number: receipt.block_number,
            gas_used: receipt.gas_used,
        })
    }
}

/// Priority-ordered set of clients for one chain
///
/// Reads fall through to the next client on failure. Submission only goes to
/// the first client: resending a signed transaction elsewhere is a policy
/// decision for the caller.
pub struct FallbackChainClient {
    clients: Vec<Arc<dyn ChainClient>>,
}

impl FallbackChainClient {
    /// `clients` must already be in priority order
    pub fn new(clients: Vec<Arc<dyn ChainClient>>) -> Result<Self, ChainError> {
        if clients.is_empty() {
            return Err(ChainError::NoClients);
        }
        Ok(Self { clients })
    }

    /// One alloy client per descriptor, lowest priority value first
    pub fn from_config(config: &FallbackProviderConfig, mnemonic: &Mnemonic) -> Result<Self, ChainError> {
        let mut descriptors = config.providers.clone();
        descriptors.sort_by_key(|d| d.priority);

        let clients = descriptors
            .iter()
            .map(|d| {
                AlloyChainClient::connect(&d.url, mnemonic, config.chain_id)
                    .map(|c| Arc::new(c) as Arc<dyn ChainClient>)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(clients)
    }

    fn primary(&self) -> &Arc<dyn ChainClient> {
        &self.clients[0]
    }

    async fn first_ok<T, F>(&self, what: &str, call: F) -> Result<T, ChainError>
    where
        F: Fn(Arc<dyn ChainClient>) -> BoxFuture<'static, Result<T, ChainError>>,
    {
        let mut last_err = ChainError::NoClients;
        for (i, client) in self.clients.iter().enumerate() {
            match call(Arc::clone(client)).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::warn!("{} failed on provider #{}: {}", what, i, e);
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }
}

#[async_trait]
impl ChainClient for FallbackChainClient {
    fn chain_id(&self) -> u64 {
        self.primary().chain_id()
    }

    fn signer_address(&self) -> Address {
        self.primary().signer_address()
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        self.first_ok("eth_blockNumber", |c| Box::pin(async move { c.block_number().await }))
            .await
    }

    async fn fee_data(&self) -> Result<FeeData, ChainError> {
        self.first_ok("fee data", |c| Box::pin(async move { c.fee_data().await }))
            .await
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>, ChainError> {
        self.primary().sign_message(message).await
    }

    async fn erc20_decimals(&self, token: Address) -> Result<u8, ChainError> {
        self.first_ok("decimals()", move |c| {
            Box::pin(async move { c.erc20_decimals(token).await })
        })
        .await
    }

    async fn erc20_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, ChainError> {
        self.first_ok("allowance()", move |c| {
            Box::pin(async move { c.erc20_allowance(token, owner, spender).await })
        })
        .await
    }

    async fn submit(&self, tx: &PopulatedTransaction) -> Result<TxHash, ChainError> {
        self.primary().submit(tx).await
    }

    async fn wait_for_confirmation(
        &self,
        tx_hash: TxHash,
        timeout: Duration,
    ) -> Result<Confirmation, ChainError> {
        self.primary().wait_for_confirmation(tx_hash, timeout).await
    }
}

/// Convert a decimal token amount to base units using the token's decimals
pub async fn resolve_token_amount(
    chain: &dyn ChainClient,
    token: Address,
    amount: &str,
) -> OrchestratorResult<U256> {
    let decimals = chain.erc20_decimals(token).await?;
    let value = parse_token_amount(amount, decimals)?;
    tracing::debug!("{} of {} ({} decimals) = {} base units", amount, token, decimals, value);
    Ok(value)
}
