//! Protobuf encoding of the IBC messages the relayer submits.

use crate::core::error::Error;
use ibc_proto::{google::protobuf::Any, ibc::core::client::v1::Height as RawHeight};
use ibc_relayer_types::Height;

pub const CREATE_CLIENT_TYPE_URL: &str = "/ibc.core.client.v1.MsgCreateClient";
pub const UPDATE_CLIENT_TYPE_URL: &str = "/ibc.core.client.v1.MsgUpdateClient";
pub const CONN_OPEN_INIT_TYPE_URL: &str = "/ibc.core.connection.v1.MsgConnectionOpenInit";
pub const CONN_OPEN_TRY_TYPE_URL: &str = "/ibc.core.connection.v1.MsgConnectionOpenTry";
pub const CONN_OPEN_ACK_TYPE_URL: &str = "/ibc.core.connection.v1.MsgConnectionOpenAck";
pub const CONN_OPEN_CONFIRM_TYPE_URL: &str = "/ibc.core.connection.v1.MsgConnectionOpenConfirm";
pub const CHAN_OPEN_INIT_TYPE_URL: &str = "/ibc.core.channel.v1.MsgChannelOpenInit";
pub const CHAN_OPEN_TRY_TYPE_URL: &str = "/ibc.core.channel.v1.MsgChannelOpenTry";
pub const CHAN_OPEN_ACK_TYPE_URL: &str = "/ibc.core.channel.v1.MsgChannelOpenAck";
pub const CHAN_OPEN_CONFIRM_TYPE_URL: &str = "/ibc.core.channel.v1.MsgChannelOpenConfirm";
pub const RECV_PACKET_TYPE_URL: &str = "/ibc.core.channel.v1.MsgRecvPacket";
pub const ACKNOWLEDGEMENT_TYPE_URL: &str = "/ibc.core.channel.v1.MsgAcknowledgement";
pub const TIMEOUT_TYPE_URL: &str = "/ibc.core.channel.v1.MsgTimeout";
pub const TIMEOUT_ON_CLOSE_TYPE_URL: &str = "/ibc.core.channel.v1.MsgTimeoutOnClose";

/// Connection version identifier both chains must agree on.
pub const CONNECTION_VERSION_IDENTIFIER: &str = "1";

pub fn to_any<M: prost::Message>(type_url: &str, msg: &M) -> Any {
    Any {
        type_url: type_url.to_string(),
        value: msg.encode_to_vec(),
    }
}

/// Decodes `any` as `M`, checking the type url first.
pub fn from_any<M: prost::Message + Default>(type_url: &str, any: &Any) -> Result<M, Error> {
    if any.type_url != type_url {
        return Err(Error::Codec(format!(
            "expected message of type {type_url}, got {}",
            any.type_url
        )));
    }
    Ok(M::decode(any.value.as_slice())?)
}

pub fn to_raw_height(height: Height) -> RawHeight {
    RawHeight {
        revision_number: height.revision_number(),
        revision_height: height.revision_height(),
    }
}

pub fn from_raw_height(height: Option<RawHeight>) -> Result<Height, Error> {
    let height = height.ok_or_else(|| Error::Codec("missing height".to_string()))?;
    Height::new(height.revision_number, height.revision_height)
        .map_err(|e| Error::Codec(format!("invalid height: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ibc_proto::ibc::core::channel::v1::MsgChannelOpenConfirm;

    #[test]
    fn decoding_checks_the_type_url() {
        let msg = MsgChannelOpenConfirm {
            port_id: "wasm.counter".to_string(),
            channel_id: "channel-0".to_string(),
            ..Default::default()
        };
        let any = to_any(CHAN_OPEN_CONFIRM_TYPE_URL, &msg);

        let decoded: MsgChannelOpenConfirm = from_any(CHAN_OPEN_CONFIRM_TYPE_URL, &any).unwrap();
        assert_eq!(decoded, msg);
        assert!(from_any::<MsgChannelOpenConfirm>(CHAN_OPEN_ACK_TYPE_URL, &any).is_err());
    }

    #[test]
    fn zero_height_is_rejected() {
        let raw = RawHeight {
            revision_number: 0,
            revision_height: 0,
        };
        assert!(from_raw_height(Some(raw)).is_err());
        assert!(from_raw_height(None).is_err());
    }
}
