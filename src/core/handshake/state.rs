use crate::core::error::HandshakeStage;
use ibc_relayer_types::core::{
    ics03_connection::connection::State as ConnectionState, ics04_channel::channel::State,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The channel state with the same number as a connection state. Connection ends never close.
pub fn connection_progress(state: ConnectionState) -> State {
    match state {
        ConnectionState::Uninitialized => State::Uninitialized,
        ConnectionState::Init => State::Init,
        ConnectionState::TryOpen => State::TryOpen,
        ConnectionState::Open => State::Open,
    }
}

/// Which of the two linked chains.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    A,
    B,
}

impl Side {
    pub fn other(&self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::A => write!(f, "A"),
            Side::B => write!(f, "B"),
        }
    }
}

/// Next message a handshake needs, and the chain it must be submitted to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakeStep {
    Init(Side),
    Try(Side),
    Ack(Side),
    Confirm(Side),
    Done,
}

impl HandshakeStep {
    /// The step a pair of ends that cannot progress was waiting for, for error reporting.
    pub fn stalled_at(a: State, b: State) -> HandshakeStep {
        let furthest = [a, b]
            .into_iter()
            .filter(|state| !state.is_closed())
            .max_by_key(|state| *state as i32)
            .unwrap_or(State::Open);
        match furthest {
            State::Uninitialized => HandshakeStep::Init(Side::A),
            State::Init => HandshakeStep::Try(Side::B),
            State::TryOpen => HandshakeStep::Ack(Side::A),
            _ => HandshakeStep::Confirm(Side::B),
        }
    }

    pub fn connection_stage(&self) -> HandshakeStage {
        match self {
            HandshakeStep::Init(_) => HandshakeStage::ConnOpenInit,
            HandshakeStep::Try(_) => HandshakeStage::ConnOpenTry,
            HandshakeStep::Ack(_) => HandshakeStage::ConnOpenAck,
            HandshakeStep::Confirm(_) => HandshakeStage::ConnOpenConfirm,
            HandshakeStep::Done => HandshakeStage::Validate,
        }
    }

    pub fn channel_stage(&self) -> HandshakeStage {
        match self {
            HandshakeStep::Init(_) => HandshakeStage::ChanOpenInit,
            HandshakeStep::Try(_) => HandshakeStage::ChanOpenTry,
            HandshakeStep::Ack(_) => HandshakeStage::ChanOpenAck,
            HandshakeStep::Confirm(_) => HandshakeStage::ChanOpenConfirm,
            HandshakeStep::Done => HandshakeStage::Validate,
        }
    }
}

/// Handshake transition function over the on-chain states of both ends.
///
/// Returns the step that moves the pair closer to `(Open, Open)`, or a reason why no step can.
/// `Confirm` is only requested for an end in `TryOpen`: when the counterparty already opened
/// its end on Try, the Ack completes the handshake.
pub fn next_step(a: State, b: State) -> Result<HandshakeStep, String> {
    use State::*;
    match (a, b) {
        (Closed, _) => Err("end on chain A is closed".to_string()),
        (_, Closed) => Err("end on chain B is closed".to_string()),
        (Uninitialized, Uninitialized) => Ok(HandshakeStep::Init(Side::A)),
        (Init, Uninitialized) => Ok(HandshakeStep::Try(Side::B)),
        (Uninitialized, Init) => Ok(HandshakeStep::Try(Side::A)),
        (Init, TryOpen) | (Init, Open) => Ok(HandshakeStep::Ack(Side::A)),
        (TryOpen, Init) | (Open, Init) => Ok(HandshakeStep::Ack(Side::B)),
        (Open, TryOpen) => Ok(HandshakeStep::Confirm(Side::B)),
        (TryOpen, Open) => Ok(HandshakeStep::Confirm(Side::A)),
        (Open, Open) => Ok(HandshakeStep::Done),
        (a, b) => Err(format!("no handshake step leads from ({a}, {b}) to (OPEN, OPEN)")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_step_handshake_from_scratch() {
        let mut states = (State::Uninitialized, State::Uninitialized);
        let mut steps = vec![];
        loop {
            let step = next_step(states.0, states.1).unwrap();
            steps.push(step);
            states = match step {
                HandshakeStep::Init(Side::A) => (State::Init, states.1),
                HandshakeStep::Try(Side::B) => (states.0, State::TryOpen),
                HandshakeStep::Ack(Side::A) => (State::Open, states.1),
                HandshakeStep::Confirm(Side::B) => (states.0, State::Open),
                HandshakeStep::Done => break,
                other => panic!("unexpected step {other:?}"),
            };
        }
        assert_eq!(
            steps,
            vec![
                HandshakeStep::Init(Side::A),
                HandshakeStep::Try(Side::B),
                HandshakeStep::Ack(Side::A),
                HandshakeStep::Confirm(Side::B),
                HandshakeStep::Done,
            ]
        );
    }

    #[test]
    fn resumes_from_any_intermediate_pair() {
        assert_eq!(next_step(State::Init, State::TryOpen), Ok(HandshakeStep::Ack(Side::A)));
        assert_eq!(next_step(State::Open, State::TryOpen), Ok(HandshakeStep::Confirm(Side::B)));
        assert_eq!(next_step(State::Uninitialized, State::Init), Ok(HandshakeStep::Try(Side::A)));
        assert_eq!(next_step(State::TryOpen, State::Open), Ok(HandshakeStep::Confirm(Side::A)));
    }

    #[test]
    fn counterparty_opening_on_try_skips_confirm() {
        assert_eq!(next_step(State::Init, State::Open), Ok(HandshakeStep::Ack(Side::A)));
        assert_eq!(next_step(State::Open, State::Open), Ok(HandshakeStep::Done));
    }

    #[test]
    fn closed_or_crossed_ends_cannot_progress() {
        assert!(next_step(State::Closed, State::TryOpen).is_err());
        assert!(next_step(State::Open, State::Closed).is_err());
        assert!(next_step(State::Init, State::Init).is_err());
        assert!(next_step(State::Open, State::Uninitialized).is_err());
    }

    #[test]
    fn stalled_pairs_report_the_awaited_step() {
        assert_eq!(
            HandshakeStep::stalled_at(State::Init, State::Closed).channel_stage(),
            HandshakeStage::ChanOpenTry
        );
        assert_eq!(
            HandshakeStep::stalled_at(State::Init, State::Init).connection_stage(),
            HandshakeStage::ConnOpenTry
        );
    }

    #[test]
    fn connection_ends_follow_channel_transitions() {
        assert_eq!(connection_progress(ConnectionState::TryOpen), State::TryOpen);
        assert_eq!(
            next_step(
                connection_progress(ConnectionState::Open),
                connection_progress(ConnectionState::TryOpen)
            ),
            Ok(HandshakeStep::Confirm(Side::B))
        );
        assert_eq!(
            HandshakeStep::stalled_at(State::Uninitialized, State::Uninitialized),
            HandshakeStep::Init(Side::A)
        );
    }
}
