// Copyright 2022 ComposableFi
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::core::{error::Error, events::TxResponse};
use crate::primitives::ChainEndpoint;
use ibc_proto::google::protobuf::Any;

/// Number of messages per transaction when a batch of `len` messages weighs `batch_weight`
/// against a block limit of `block_max_weight`. `len` means the batch fits in one transaction.
pub fn chunk_size(len: usize, batch_weight: u64, block_max_weight: u64) -> usize {
    if block_max_weight == 0 || batch_weight <= block_max_weight {
        return len.max(1);
    }
    let ratio = (batch_weight / block_max_weight) as usize;
    // whelp our batch exceeds the block max weight.
    let chunks = if ratio == 1 {
        // split the batch into ratio * 2
        ratio * 2
    } else {
        // split the batch into ratio + 2
        ratio + 2
    };
    ((len + chunks - 1) / chunks).max(1)
}

/// A batch that stopped part way through. `landed` holds the transactions committed before
/// `error`, in submission order.
#[derive(Debug)]
pub struct BatchError {
    pub landed: Vec<TxResponse>,
    pub error: Error,
}

impl From<Error> for BatchError {
    fn from(error: Error) -> Self {
        Self { landed: vec![], error }
    }
}

/// This sends messages to the sink chain in a gas-aware manner.
/// Returns one response per submitted transaction, in submission order.
pub async fn flush_message_batch(
    msgs: Vec<Any>,
    sink: &impl ChainEndpoint,
) -> Result<Vec<TxResponse>, BatchError> {
    if msgs.is_empty() {
        return Ok(vec![]);
    }
    let block_max_weight = sink.block_max_weight();
    let batch_weight = sink.estimate_weight(msgs.clone()).await?;
    let chunk = chunk_size(msgs.len(), batch_weight, block_max_weight);

    if chunk >= msgs.len() {
        let tx = sink.submit(msgs).await?;
        log::info!(target: "hyperspace-link", "🤝 Transaction flushed successfully with hash: {}", tx.hash);
        return Ok(vec![tx]);
    }

    log::info!(
        target: "hyperspace-link",
        "🏗️🏗️🏗️ Splitting batch of {} messages for {} into chunks of {}",
        msgs.len(),
        sink.name(),
        chunk
    );
    let mut responses = Vec::with_capacity((msgs.len() + chunk - 1) / chunk);
    for batch in msgs.chunks(chunk) {
        // send out batches.
        log::info!(target: "hyperspace-link", "📡 Sending batch of {} messages", batch.len());
        match sink.submit(batch.to_vec()).await {
            Ok(tx) => {
                log::info!(
                    target: "hyperspace-link",
                    "🤝 Transaction confirmed with hash: {}",
                    tx.hash
                );
                responses.push(tx);
            },
            Err(error) => return Err(BatchError { landed: responses, error }),
        }
    }

    Ok(responses)
}
