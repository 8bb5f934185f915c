//! Halt records and the worker resume channel.

use opflow_core::model::ModelQualifier;
use opflow_core::token::TokenContext;
use opflow_core::types::TokenId;
use tokio::sync::oneshot;

/// An engine event presented to the debugger at a socket transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A plain socket transition. `enters_subprocess` is set on the entry
    /// socket of a subprocess-call node, which is what lets `step_into`
    /// pass through the call and halt at the callee's first socket.
    Socket {
        /// Whether this socket begins a subprocess call.
        enters_subprocess: bool,
    },
    /// The first socket of a top-level process.
    TopLevel,
    /// The entry socket of a workflow node.
    Workflow,
    /// An exception is in flight at this position.
    Exception(String),
}

/// Why a token halted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HaltCause {
    /// An enabled breakpoint matched the position.
    Breakpoint,
    /// A pending step command completed.
    Step,
    /// Break-on-top-level matched.
    TopLevel,
    /// Break-on-workflow matched.
    Workflow,
    /// Break-on-exception matched; carries the error message.
    Exception(String),
}

/// How a halt is resolved by the command path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltResolution {
    /// The worker continues executing.
    Resume,
    /// The worker aborts the token with a cancellation.
    Stop,
}

/// The record of why and where a token is currently paused.
///
/// Carries a snapshot of the token context taken at halt time so inspection
/// never aliases state owned by the blocked worker, plus the sender half of
/// the per-halt resume channel. Dropping the record unresolved closes the
/// channel, which the worker treats as a stop.
#[derive(Debug)]
pub struct HaltInfo {
    /// The position the token halted at.
    pub position: ModelQualifier,
    /// The triggering event.
    pub cause: HaltCause,
    /// The halted token.
    pub token_id: TokenId,
    /// Call-stack depth at halt time; step commands save it.
    pub call_depth: usize,
    /// Token context snapshot for inspection.
    pub snapshot: TokenContext,
    resume: Option<oneshot::Sender<HaltResolution>>,
}

impl HaltInfo {
    /// Create a halt record and the receiver the worker blocks on.
    pub fn new(
        position: ModelQualifier,
        cause: HaltCause,
        token: &TokenContext,
    ) -> (Self, oneshot::Receiver<HaltResolution>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                position,
                cause,
                token_id: token.id,
                call_depth: token.call_depth(),
                snapshot: token.clone(),
                resume: Some(tx),
            },
            rx,
        )
    }

    /// Release the blocked worker with the given resolution.
    pub fn resolve(mut self, resolution: HaltResolution) {
        if let Some(tx) = self.resume.take() {
            // A worker that already went away is not an error.
            let _ = tx.send(resolution);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn halted_token() -> TokenContext {
        let mut token = TokenContext::new();
        token.set_initial_position(ModelQualifier::socket("Shop", "Order", "Start", "In"));
        token
    }

    #[tokio::test]
    async fn resolve_releases_receiver() {
        let token = halted_token();
        let (halt, rx) = HaltInfo::new(
            ModelQualifier::socket("Shop", "Order", "Start", "In"),
            HaltCause::Breakpoint,
            &token,
        );
        halt.resolve(HaltResolution::Resume);
        assert_eq!(rx.await.unwrap(), HaltResolution::Resume);
    }

    #[tokio::test]
    async fn dropping_unresolved_closes_channel() {
        let token = halted_token();
        let (halt, rx) = HaltInfo::new(
            ModelQualifier::socket("Shop", "Order", "Start", "In"),
            HaltCause::Step,
            &token,
        );
        drop(halt);
        assert!(rx.await.is_err());
    }

    #[test]
    fn snapshot_captures_depth() {
        let mut token = halted_token();
        token.push_frame(opflow_core::token::CallStackFrame::new(
            ModelQualifier::socket("Shop", "Order", "Call", "Out"),
        ));
        let (halt, _rx) = HaltInfo::new(
            ModelQualifier::socket("Shop", "Sub", "Work", "In"),
            HaltCause::Step,
            &token,
        );
        assert_eq!(halt.call_depth, 1);
        assert_eq!(halt.snapshot.call_depth(), 1);
    }
}
