use okta_aws_login::{
    Error,
    cli::{
        self,
        actions::{Outcome, exit_code, run_until_cancelled},
        telemetry,
    },
};
use std::process::{self, ExitCode};

#[tokio::main]
async fn main() -> ExitCode {
    let action = match cli::start() {
        Ok(action) => action,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let outcome = run_until_cancelled(action.execute(), tokio::signal::ctrl_c()).await;

    telemetry::shutdown_tracer();

    match outcome {
        Outcome::Finished(Ok(())) => ExitCode::SUCCESS,
        Outcome::Finished(Err(e)) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(exit_code(&e))
        }
        Outcome::Cancelled => {
            eprintln!("Error: {}", Error::Cancelled);
            // a prompt may still hold a worker thread, do not wait for it
            process::exit(Error::Cancelled.exit_code());
        }
    }
}
