pub mod login;

use crate::error::Error;
use std::{future::Future, io};

#[derive(Debug)]
pub enum Action {
    Login(login::Args),
}

impl Action {
    /// # Errors
    /// Returns an error if the action fails.
    pub async fn execute(self) -> anyhow::Result<()> {
        match self {
            Self::Login(args) => login::execute(args).await,
        }
    }
}

/// How [`run_until_cancelled`] ended.
#[derive(Debug)]
pub enum Outcome {
    Finished(anyhow::Result<()>),
    Cancelled,
}

/// Run `action` on its own task and race it against `cancel`.
///
/// Prompts block the thread they run on, so the action must not share a task
/// with the cancellation signal. A failing `cancel` future (no signal handler)
/// disables cancellation instead of triggering it.
pub async fn run_until_cancelled<A, C>(action: A, cancel: C) -> Outcome
where
    A: Future<Output = anyhow::Result<()>> + Send + 'static,
    C: Future<Output = io::Result<()>>,
{
    let mut task = tokio::spawn(action);

    tokio::select! {
        joined = &mut task => {
            Outcome::Finished(joined.map_err(anyhow::Error::from).and_then(|result| result))
        }
        Ok(()) = cancel => {
            task.abort();
            Outcome::Cancelled
        }
    }
}

/// Process exit code for an error returned by an action.
#[must_use]
pub fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<Error>()
        .map_or(1, |e| u8::try_from(e.exit_code()).unwrap_or(1))
}
