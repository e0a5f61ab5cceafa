//! Building signed messages for each attempt.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ClientResult;
use crate::ledger::{
    Account, Clock, ExternalMessageRequest, Keystore, LedgerRuntime, PrepareContext, Signer,
    SignedMessage, TransferParams,
};

/// Produces a new message for every delivery attempt.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Compose a message expiring `timeout` after the adjusted current time.
    async fn compose(&self, timeout: Duration) -> ClientResult<SignedMessage>;
}

/// Internal transfer prepared by a stored account.
pub struct TransferSource {
    pub account: Arc<dyn Account>,
    pub keystore: Arc<dyn Keystore>,
    pub clock: Arc<Clock>,
    pub params: TransferParams,
}

#[async_trait]
impl MessageSource for TransferSource {
    async fn compose(&self, timeout: Duration) -> ClientResult<SignedMessage> {
        let ctx = PrepareContext {
            clock: &self.clock,
            keystore: self.keystore.as_ref(),
            timeout,
        };
        let message = self.account.prepare_message(&self.params, ctx).await?;
        Ok(message)
    }
}

/// External message, signed when a signer is given.
pub struct ExternalMessageSource {
    pub runtime: Arc<dyn LedgerRuntime>,
    pub clock: Arc<Clock>,
    pub request: ExternalMessageRequest,
    pub signer: Option<Arc<dyn Signer>>,
}

#[async_trait]
impl MessageSource for ExternalMessageSource {
    async fn compose(&self, timeout: Duration) -> ClientResult<SignedMessage> {
        let unsigned = self
            .runtime
            .create_external_message(&self.clock, &self.request, timeout)?;

        let message = match &self.signer {
            Some(signer) => {
                let signature = signer.sign(unsigned.hash()).await?;
                unsigned.sign(&signature)?
            }
            None => unsigned.without_signature()?,
        };
        Ok(message)
    }
}
