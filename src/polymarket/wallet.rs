use std::str::FromStr;

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use polymarket_client_sdk::auth::state::Authenticated;
use polymarket_client_sdk::auth::{Normal, Signer};
use polymarket_client_sdk::clob::client::{Client, Config};
use polymarket_client_sdk::POLYGON;

pub type AuthenticatedClient = Client<Authenticated<Normal>>;

/// The execution bot's CLOB session and signing key.
///
/// The same key signs orders and the proxy transactions, so `signer()` is shared
/// with `proxy::client`.
pub struct BotWallet {
    signer: PrivateKeySigner,
    client: AuthenticatedClient,
}

impl BotWallet {
    /// Authenticate against the CLOB at `clob_url` with a hex private key
    /// (with or without `0x`), deriving or creating an API key as needed.
    pub async fn connect(private_key: &str, clob_url: &str) -> anyhow::Result<Self> {
        let signer = PrivateKeySigner::from_str(private_key)?.with_chain_id(Some(POLYGON));

        let client = Client::new(clob_url, Config::default())?
            .authentication_builder(&signer)
            .authenticate()
            .await?;

        tracing::info!(address = %signer.address(), "Bot wallet authenticated with CLOB");
        Ok(Self { signer, client })
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn client(&self) -> &AuthenticatedClient {
        &self.client
    }

    pub fn signer(&self) -> &PrivateKeySigner {
        &self.signer
    }
}
