use crate::core::{
    events::{IbcEvent, TxResponse},
    packets::types::Packet,
};
use crate::mock::counter::{CountResponse, CounterMsg, QueryMsg};
use crate::primitives::ContractProvider;
use std::{future::Future, time::Duration};

pub async fn timeout_future<T: Future>(future: T, secs: u64, reason: String) -> T::Output {
    let duration = Duration::from_secs(secs);
    match tokio::time::timeout(duration, future).await {
        Ok(output) => output,
        Err(_) => panic!("Future didn't finish within {duration:?}, {reason}"),
    }
}

pub async fn increment<C: ContractProvider>(
    chain: &C,
    contract: &str,
) -> Result<TxResponse, anyhow::Error> {
    let msg = serde_json::to_value(CounterMsg::Increment {})?;
    Ok(chain.execute_contract(contract, &msg).await?)
}

pub async fn reset<C: ContractProvider>(
    chain: &C,
    contract: &str,
    count: i32,
) -> Result<TxResponse, anyhow::Error> {
    let msg = serde_json::to_value(CounterMsg::Reset { count })?;
    Ok(chain.execute_contract(contract, &msg).await?)
}

pub async fn query_count<C: ContractProvider>(
    chain: &C,
    contract: &str,
) -> Result<i32, anyhow::Error> {
    let query = serde_json::to_value(QueryMsg::GetCount {})?;
    let response = chain.query_contract(contract, &query).await?;
    let CountResponse { count } = serde_json::from_slice(&response)?;
    Ok(count)
}

/// Packets sent by a contract execution.
pub fn sent_packets(tx: &TxResponse) -> Vec<Packet> {
    tx.events
        .iter()
        .filter_map(|event| match event {
            IbcEvent::SendPacket(info) => Some(info.packet.clone()),
            _ => None,
        })
        .collect()
}

/// Polls the counter on `chain` until it reads `expected`.
pub async fn wait_for_count<C: ContractProvider>(
    chain: &C,
    contract: &str,
    expected: i32,
) -> Result<(), anyhow::Error> {
    loop {
        if query_count(chain, contract).await? == expected {
            return Ok(())
        }
        tokio::time::sleep(chain.expected_block_time() / 100).await;
    }
}
