use thiserror::Error;

/// The `(state, event)` pair has no entry in the machine's transition table.
///
/// The state is unchanged when this is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{machine} machine rejects event {event} in state {state}")]
pub struct TransitionRejected {
    /// Which machine rejected the event (`device` or `provision`).
    pub machine: &'static str,
    /// Current state name.
    pub state: String,
    /// Rejected event name.
    pub event: String,
}

impl TransitionRejected {
    pub(crate) fn new(
        machine: &'static str,
        state: impl std::fmt::Display,
        event: impl std::fmt::Display,
    ) -> Self {
        Self {
            machine,
            state: state.to_string(),
            event: event.to_string(),
        }
    }
}
