//! Live `ProxyGateway` over an alloy HTTP provider with the bot key as the wallet.

use std::collections::HashSet;

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionReceipt;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::chain::abi::{IConditionalTokens, IPolyHunterProxy, IERC20, CONDITIONAL_TOKENS, USDC};
use crate::chain::decoder::{decimal_to_units, units_to_decimal};
use crate::execution::gateway::{GatewayError, ProxyGateway};
use crate::models::GasHint;
use crate::polymarket::trading::parse_token_id;

use super::ledger::ProxyAccount;

fn rpc_err(e: impl std::fmt::Display) -> GatewayError {
    GatewayError::Rpc(e.to_string())
}

fn to_decimal(units: U256) -> Result<Decimal, GatewayError> {
    units_to_decimal(units).map_err(rpc_err)
}

fn to_units(amount: Decimal) -> Result<U256, GatewayError> {
    decimal_to_units(amount).map_err(|e| GatewayError::InvalidAmount(e.to_string()))
}

pub struct AlloyProxyGateway {
    provider: DynProvider,
    bot: Address,
}

impl AlloyProxyGateway {
    pub fn connect(rpc_url: &str, signer: PrivateKeySigner) -> anyhow::Result<Self> {
        let bot = signer.address();
        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(rpc_url.parse()?)
            .erased();
        Ok(Self { provider, bot })
    }

    /// `proxy.execute(target, data)`, waiting for the receipt.
    async fn execute_via_proxy(
        &self,
        proxy: Address,
        target: Address,
        data: Vec<u8>,
        gas: Option<GasHint>,
    ) -> Result<B256, GatewayError> {
        let contract = IPolyHunterProxy::new(proxy, &self.provider);
        let mut call = contract.execute(target, Bytes::from(data));
        if let Some(hint) = gas {
            call = call
                .max_fee_per_gas(hint.max_fee_per_gas.saturating_to::<u128>())
                .max_priority_fee_per_gas(hint.max_priority_fee_per_gas.saturating_to::<u128>());
        }

        let receipt = call.send().await.map_err(rpc_err)?.get_receipt().await.map_err(rpc_err)?;
        confirmed(receipt, "proxy.execute")
    }
}

fn confirmed(receipt: TransactionReceipt, what: &str) -> Result<B256, GatewayError> {
    if receipt.status() {
        Ok(receipt.transaction_hash)
    } else {
        Err(GatewayError::Reverted(format!("{what} {}", receipt.transaction_hash)))
    }
}

#[async_trait]
impl ProxyGateway for AlloyProxyGateway {
    fn bot_address(&self) -> Address {
        self.bot
    }

    async fn account(&self, proxy: Address, targets: &[Address]) -> Result<ProxyAccount, GatewayError> {
        let contract = IPolyHunterProxy::new(proxy, &self.provider);

        let stats = contract.getStats().call().await.map_err(rpc_err)?;
        let is_paused = contract.paused().call().await.map_err(rpc_err)?;

        let mut allowed_targets = HashSet::new();
        for target in targets {
            if contract.allowedTargets(*target).call().await.map_err(rpc_err)? {
                allowed_targets.insert(*target);
            }
        }

        Ok(ProxyAccount {
            address: proxy,
            balance: to_decimal(stats.balance)?,
            total_deposited: to_decimal(stats.deposited)?,
            total_withdrawn: to_decimal(stats.withdrawn)?,
            total_fees_paid: to_decimal(stats.feesPaid)?,
            fee_percent_bps: stats.currentFeePercent.saturating_to::<u32>(),
            allowed_targets,
            is_paused,
        })
    }

    async fn usdc_balance(&self, holder: Address) -> Result<Decimal, GatewayError> {
        let units = IERC20::new(USDC, &self.provider)
            .balanceOf(holder)
            .call()
            .await
            .map_err(rpc_err)?;
        to_decimal(units)
    }

    async fn token_balance(&self, holder: Address, token_id: &str) -> Result<Decimal, GatewayError> {
        let id = parse_token_id(token_id)?;
        let units = IConditionalTokens::new(CONDITIONAL_TOKENS, &self.provider)
            .balanceOf(holder, id)
            .call()
            .await
            .map_err(rpc_err)?;
        to_decimal(units)
    }

    async fn pull_usdc(&self, proxy: Address, amount: Decimal, gas: Option<GasHint>) -> Result<B256, GatewayError> {
        let data = IERC20::transferCall {
            to: self.bot,
            amount: to_units(amount)?,
        }
        .abi_encode();
        self.execute_via_proxy(proxy, USDC, data, gas).await
    }

    async fn push_usdc(&self, proxy: Address, amount: Decimal) -> Result<B256, GatewayError> {
        let receipt = IERC20::new(USDC, &self.provider)
            .transfer(proxy, to_units(amount)?)
            .send()
            .await
            .map_err(rpc_err)?
            .get_receipt()
            .await
            .map_err(rpc_err)?;
        confirmed(receipt, "usdc.transfer")
    }

    async fn pull_tokens(
        &self,
        proxy: Address,
        token_id: &str,
        shares: Decimal,
        gas: Option<GasHint>,
    ) -> Result<B256, GatewayError> {
        let data = IConditionalTokens::safeTransferFromCall {
            from: proxy,
            to: self.bot,
            id: parse_token_id(token_id)?,
            value: to_units(shares)?,
            data: Bytes::new(),
        }
        .abi_encode();
        self.execute_via_proxy(proxy, CONDITIONAL_TOKENS, data, gas).await
    }

    async fn push_tokens(&self, proxy: Address, token_id: &str, shares: Decimal) -> Result<B256, GatewayError> {
        let receipt = IConditionalTokens::new(CONDITIONAL_TOKENS, &self.provider)
            .safeTransferFrom(self.bot, proxy, parse_token_id(token_id)?, to_units(shares)?, Bytes::new())
            .send()
            .await
            .map_err(rpc_err)?
            .get_receipt()
            .await
            .map_err(rpc_err)?;
        confirmed(receipt, "ctf.safeTransferFrom")
    }

    async fn redeem(&self, proxy: Address, condition_id: B256) -> Result<B256, GatewayError> {
        let data = IConditionalTokens::redeemPositionsCall {
            collateralToken: USDC,
            parentCollectionId: B256::ZERO,
            conditionId: condition_id,
            indexSets: vec![U256::from(1u64), U256::from(2u64)],
        }
        .abi_encode();
        self.execute_via_proxy(proxy, CONDITIONAL_TOKENS, data, None).await
    }
}
