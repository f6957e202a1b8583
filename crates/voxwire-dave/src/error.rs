use thiserror::Error;

use voxwire_protocol::ProtocolError;

#[derive(Debug, Error)]
pub enum DaveError {
    /// An execute arrived for a transition id never observed as prepared.
    #[error("execute for transition {transition_id} without a matching prepare")]
    ExecuteWithoutPrepare { transition_id: u16 },

    /// Transition id 0 is informational and never carries an execute.
    #[error("transition id 0 cannot be executed")]
    ExecuteImmediateTransition,

    /// The external MLS engine rejected a payload we forwarded.
    #[error("MLS engine failed while handling {context}")]
    Engine {
        context: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl DaveError {
    pub(crate) fn engine(context: &'static str, source: anyhow::Error) -> Self {
        Self::Engine { context, source }
    }
}
