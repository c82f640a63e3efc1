use super::{
    client::{BlockContext, ChainState, MockChain},
    ibc::Rejection,
};
use crate::core::{
    error::{Error, RejectionKind},
    events::{IbcEvent, TxResponse},
};
use crate::primitives::{ChainEndpoint, KeyProvider};
use ibc_proto::google::protobuf::Any;
use ibc_relayer_types::signer::Signer;
use sha2::{Digest, Sha256};

fn message_weight(msg: &Any) -> u64 {
    (msg.type_url.len() + msg.value.len()) as u64
}

fn tx_hash(ctx: &BlockContext, payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ctx.chain_id.as_bytes());
    hasher.update(ctx.height.to_be_bytes());
    hasher.update(payload);
    hex::encode_upper(hasher.finalize())
}

impl MockChain {
    /// Executes a transaction in a new block. Nothing is committed unless `execute` succeeds.
    pub(crate) async fn transact<F>(&self, payload: &[u8], execute: F) -> Result<TxResponse, Error>
    where
        F: FnOnce(&mut ChainState, &BlockContext) -> Result<Vec<IbcEvent>, Rejection>,
    {
        let mut state = self.online_state().await?;
        let ctx = self.block_context(state.height + 1);
        let mut next = state.clone();
        let events = execute(&mut next, &ctx).map_err(|rejection| {
            log::debug!(
                target: "hyperspace-link",
                "{} refused transaction ({}): {}",
                self.name,
                rejection.kind,
                rejection.reason
            );
            Error::submission(&self.name, rejection.kind, rejection.reason)
        })?;

        let height = self.height(ctx.height)?;
        let tx = TxResponse { hash: tx_hash(&ctx, payload), height, events };
        next.height = ctx.height;
        next.events.extend(tx.events_with_height());
        *state = next;

        log::trace!(target: "hyperspace-link", "{} included tx {} at {}", self.name, tx.hash, height);
        Ok(tx)
    }
}

#[async_trait::async_trait]
impl ChainEndpoint for MockChain {
    fn name(&self) -> &str {
        &self.name
    }

    fn block_max_weight(&self) -> u64 {
        self.config.block_max_weight
    }

    async fn estimate_weight(&self, messages: Vec<Any>) -> Result<u64, Error> {
        Ok(messages.iter().map(message_weight).sum())
    }

    async fn submit(&self, messages: Vec<Any>) -> Result<TxResponse, Error> {
        let weight = messages.iter().map(message_weight).sum::<u64>();
        if weight > self.config.block_max_weight {
            return Err(Error::submission(
                &self.name,
                RejectionKind::Rejected,
                format!("transaction weight {weight} exceeds {}", self.config.block_max_weight),
            ))
        }
        let payload = messages
            .iter()
            .flat_map(|msg| msg.type_url.as_bytes().iter().chain(&msg.value).copied())
            .collect::<Vec<_>>();

        self.transact(&payload, |state, ctx| {
            let mut events = vec![];
            for (i, msg) in messages.iter().enumerate() {
                let emitted = state.execute(ctx, msg).map_err(|rejection| Rejection {
                    reason: format!("message {i} ({}): {}", msg.type_url, rejection.reason),
                    ..rejection
                })?;
                events.extend(emitted);
            }
            Ok(events)
        })
        .await
    }
}

impl KeyProvider for MockChain {
    fn account_id(&self) -> Signer {
        self.signer.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::msgs::{to_any, UPDATE_CLIENT_TYPE_URL},
        mock::MockChainConfig,
        primitives::IbcProvider,
    };
    use ibc_proto::ibc::core::client::v1::MsgUpdateClient;

    #[tokio::test]
    async fn refused_transaction_produces_no_block() {
        let chain = MockChain::new(MockChainConfig::new("wasmd")).unwrap();
        let (before, _) = chain.latest_height_and_timestamp().await.unwrap();

        let msg = MsgUpdateClient {
            client_id: "9999-mock-0".to_string(),
            client_message: None,
            signer: "relayer".to_string(),
        };
        let err = chain.submit(vec![to_any(UPDATE_CLIENT_TYPE_URL, &msg)]).await.unwrap_err();
        assert!(matches!(err, Error::Submission { kind: RejectionKind::Rejected, .. }));

        let (after, _) = chain.latest_height_and_timestamp().await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn oversized_transaction_is_refused() {
        let chain = MockChain::new(MockChainConfig {
            block_max_weight: 10,
            ..MockChainConfig::new("wasmd")
        })
        .unwrap();
        let msg = Any { type_url: "/ibc.core.client.v1.MsgUpdateClient".to_string(), value: vec![] };
        assert!(chain.estimate_weight(vec![msg.clone()]).await.unwrap() > 10);
        assert!(chain.submit(vec![msg]).await.is_err());
    }
}
