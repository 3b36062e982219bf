//! Commands sent to the session actor from `SessionEngine` callers.

use tokio::sync::oneshot;

use crate::transition::Input;

/// A command that can be sent to a session actor.
#[derive(Debug)]
pub enum SessionCommand {
    // -- Mutations (fire-and-forget) --
    SendPrompt {
        prompt: String,
        model: Option<String>,
    },
    StopCurrentRequest,
    StartNewSession,
    ResumeSession {
        session_id: String,
    },

    // -- Lifecycle --
    /// Stop every running process, then end the actor loop.
    Shutdown { reply: oneshot::Sender<()> },
}

impl SessionCommand {
    /// The transition input this command maps to, if any.
    pub fn into_input(self) -> Result<Input, SessionCommand> {
        match self {
            SessionCommand::SendPrompt { prompt, model } => Ok(Input::SendPrompt { prompt, model }),
            SessionCommand::StopCurrentRequest => Ok(Input::StopCurrentRequest),
            SessionCommand::StartNewSession => Ok(Input::StartNewSession),
            SessionCommand::ResumeSession { session_id } => Ok(Input::ResumeSession { session_id }),
            other @ SessionCommand::Shutdown { .. } => Err(other),
        }
    }
}
