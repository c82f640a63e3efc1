use ibc_relayer_types::Height;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a chain refused a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionKind {
    /// The message was already processed, usually by a concurrent relayer: packet already
    /// received, acknowledgement already relayed, commitment already cleared.
    Redundant,
    /// Proof verification failed, or the proof height is unknown to the light client.
    Proof,
    /// Any other rejection.
    Rejected,
}

impl fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionKind::Redundant => write!(f, "redundant"),
            RejectionKind::Proof => write!(f, "proof"),
            RejectionKind::Rejected => write!(f, "rejected"),
        }
    }
}

/// Step of a connection or channel handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandshakeStage {
    CreateClient,
    ConnOpenInit,
    ConnOpenTry,
    ConnOpenAck,
    ConnOpenConfirm,
    ChanOpenInit,
    ChanOpenTry,
    ChanOpenAck,
    ChanOpenConfirm,
    /// Final cross-check of both ends once they report `Open`.
    Validate,
}

impl fmt::Display for HandshakeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            HandshakeStage::CreateClient => "CreateClient",
            HandshakeStage::ConnOpenInit => "ConnOpenInit",
            HandshakeStage::ConnOpenTry => "ConnOpenTry",
            HandshakeStage::ConnOpenAck => "ConnOpenAck",
            HandshakeStage::ConnOpenConfirm => "ConnOpenConfirm",
            HandshakeStage::ChanOpenInit => "ChanOpenInit",
            HandshakeStage::ChanOpenTry => "ChanOpenTry",
            HandshakeStage::ChanOpenAck => "ChanOpenAck",
            HandshakeStage::ChanOpenConfirm => "ChanOpenConfirm",
            HandshakeStage::Validate => "Validate",
        };
        write!(f, "{stage}")
    }
}

/// A handshake attempt was abandoned. Both ends are left in whatever state the chains recorded,
/// so the attempt can be resumed or restarted.
#[derive(Clone, Debug, thiserror::Error)]
#[error("handshake failed at {stage}: {reason}")]
pub struct HandshakeError {
    pub stage: HandshakeStage,
    pub reason: String,
}

impl HandshakeError {
    pub fn new(stage: HandshakeStage, reason: impl Into<String>) -> Self {
        Self {
            stage,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Chain endpoint unreachable or returned a malformed response.
    #[error("query to {chain} failed: {reason}")]
    Query { chain: String, reason: String },
    /// No proof could be produced at the requested height.
    #[error("no proof from {chain} at height {height}: {reason}")]
    Proof { chain: String, height: Height, reason: String },
    /// Transaction rejected on chain.
    #[error("transaction rejected by {chain} ({kind}): {reason}")]
    Submission { chain: String, kind: RejectionKind, reason: String },
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
    /// Message encoding or decoding failure
    #[error("codec error: {0}")]
    Codec(String),
    #[error("{0}")]
    Custom(String),
}

impl Error {
    pub fn query(chain: impl Into<String>, reason: impl ToString) -> Self {
        Error::Query {
            chain: chain.into(),
            reason: reason.to_string(),
        }
    }

    pub fn submission(chain: impl Into<String>, kind: RejectionKind, reason: impl ToString) -> Self {
        Error::Submission {
            chain: chain.into(),
            kind,
            reason: reason.to_string(),
        }
    }

    /// A rejection that only means somebody else got there first.
    pub fn is_redundant(&self) -> bool {
        matches!(self, Error::Submission { kind: RejectionKind::Redundant, .. })
    }

    /// Rejection kind for per-packet reporting. `None` for errors that must abort the pass.
    pub fn rejection_kind(&self) -> Option<RejectionKind> {
        match self {
            Error::Submission { kind, .. } => Some(*kind),
            Error::Proof { .. } => Some(RejectionKind::Proof),
            _ => None,
        }
    }
}

impl From<String> for Error {
    fn from(error: String) -> Self {
        Self::Custom(error)
    }
}

impl From<prost::DecodeError> for Error {
    fn from(error: prost::DecodeError) -> Self {
        Self::Codec(error.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::Codec(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_submission_and_proof_errors_are_per_packet() {
        let redundant =
            Error::submission("chain_b", RejectionKind::Redundant, "packet already received");
        assert!(redundant.is_redundant());
        assert_eq!(redundant.rejection_kind(), Some(RejectionKind::Redundant));

        let proof = Error::Proof {
            chain: "chain_a".into(),
            height: Height::new(0, 3).unwrap(),
            reason: "pruned".into(),
        };
        assert!(!proof.is_redundant());
        assert_eq!(proof.rejection_kind(), Some(RejectionKind::Proof));

        assert_eq!(Error::query("chain_a", "offline").rejection_kind(), None);
    }

    #[test]
    fn handshake_error_names_its_stage() {
        let err: Error =
            HandshakeError::new(HandshakeStage::ChanOpenTry, "version mismatch").into();
        assert_eq!(err.to_string(), "handshake failed at ChanOpenTry: version mismatch");
    }
}
