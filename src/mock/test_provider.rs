use super::{
    client::MockChain,
    counter::CounterContract,
    ibc::contract_port,
};
use crate::core::{
    error::Error,
    events::{IbcEventWithHeight, TxResponse},
    packets::types::parse_port,
};
use crate::primitives::ContractProvider;
use ibc_relayer_types::core::ics24_host::identifier::PortId;

#[async_trait::async_trait]
impl ContractProvider for MockChain {
    async fn execute_contract(
        &self,
        contract: &str,
        msg: &serde_json::Value,
    ) -> Result<TxResponse, Error> {
        let payload = serde_json::to_vec(msg)?;
        self.transact(&payload, |state, ctx| state.execute_contract(ctx, contract, msg))
            .await
    }

    async fn query_contract(
        &self,
        contract: &str,
        query: &serde_json::Value,
    ) -> Result<Vec<u8>, Error> {
        let state = self.online_state().await?;
        let contract = state
            .contracts
            .get(contract)
            .ok_or_else(|| Error::query(&self.name, format!("contract {contract} not found")))?;
        contract.query(query).map_err(|e| Error::query(&self.name, e))
    }
}

/// Hooks test scenarios use to shape the chain.
impl MockChain {
    /// Deploys a counter contract holding `count` and returns its address.
    pub async fn instantiate_counter(&self, count: i32) -> String {
        let mut state = self.state.lock().await;
        let address = format!("{}-counter-{}", self.config.chain_id, state.contracts.len());
        state
            .contracts
            .insert(address.clone(), CounterContract::new(address.clone(), count));
        log::debug!(target: "hyperspace-link", "Instantiated {} on {}", address, self.name);
        address
    }

    /// Port the contract at `address` is bound to.
    pub fn counter_port(address: &str) -> Result<PortId, Error> {
        parse_port(&contract_port(address))
    }

    pub async fn counter(&self, address: &str) -> Option<CounterContract> {
        self.state.lock().await.contracts.get(address).cloned()
    }

    pub async fn configure_counter(
        &self,
        address: &str,
        configure: impl FnOnce(&mut CounterContract) + Send,
    ) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        let contract = state
            .contracts
            .get_mut(address)
            .ok_or_else(|| Error::Custom(format!("contract {address} not found")))?;
        configure(contract);
        Ok(())
    }

    /// While offline every query and transaction fails.
    pub async fn set_offline(&self, offline: bool) {
        self.state.lock().await.offline = offline;
    }

    pub async fn set_proof_retention(&self, retention: Option<u64>) {
        self.state.lock().await.proof_retention = retention;
    }

    /// Produces `blocks` empty blocks.
    pub async fn advance_blocks(&self, blocks: u64) {
        self.state.lock().await.height += blocks;
    }

    pub async fn events(&self) -> Vec<IbcEventWithHeight> {
        self.state.lock().await.events.clone()
    }
}
