//! Interactive input used by the login flow.
//!
//! The pipeline only sees the [`Prompter`] trait; [`DialoguerPrompter`] is the
//! terminal implementation used by the binary.

use crate::{
    aws::roles::RoleCandidate,
    error::{Error, Result},
    okta::transaction::Factor,
};
use dialoguer::{Input, Password, Select, theme::ColorfulTheme};
use secrecy::SecretString;
use std::io::IsTerminal;

pub trait Prompter: Send + Sync {
    /// # Errors
    /// `InputAborted` when the user declines.
    fn ask_username(&self) -> Result<String>;

    /// # Errors
    /// `InputAborted` when the user declines.
    fn ask_password(&self, label: &str) -> Result<SecretString>;

    /// # Errors
    /// `InputAborted` when the user declines.
    fn ask_passcode(&self, factor: &Factor) -> Result<SecretString>;

    /// # Errors
    /// `InputAborted` when the user declines.
    fn ask_answer(&self, question: &str) -> Result<SecretString>;

    /// Index into `factors` of the factor to use.
    ///
    /// # Errors
    /// `InputAborted` when the user declines.
    fn select_factor(&self, factors: &[Factor]) -> Result<usize>;

    /// Index into `candidates` of the role to assume.
    ///
    /// # Errors
    /// `InputAborted` when the user declines.
    fn select_role(&self, candidates: &[RoleCandidate]) -> Result<usize>;

    /// Out-of-band instruction, e.g. "check your phone".
    fn notify(&self, _message: &str) {}
}

/// Checks if both stdin and stderr are connected to a terminal.
#[must_use]
pub fn is_interactive_terminal() -> bool {
    std::io::stdin().is_terminal() && std::io::stderr().is_terminal()
}

fn aborted(what: &str, e: &dialoguer::Error) -> Error {
    Error::InputAborted(format!("{what} not provided: {e}"))
}

#[derive(Default)]
pub struct DialoguerPrompter {
    theme: ColorfulTheme,
}

impl Prompter for DialoguerPrompter {
    fn ask_username(&self) -> Result<String> {
        Input::<String>::with_theme(&self.theme)
            .with_prompt("Username")
            .interact_text()
            .map_err(|e| aborted("Username", &e))
    }

    fn ask_password(&self, label: &str) -> Result<SecretString> {
        Password::with_theme(&self.theme)
            .with_prompt(label)
            .interact()
            .map(SecretString::from)
            .map_err(|e| aborted("Password", &e))
    }

    fn ask_passcode(&self, factor: &Factor) -> Result<SecretString> {
        Input::<String>::with_theme(&self.theme)
            .with_prompt(format!("Verification code for {}", factor.label()))
            .validate_with(|code: &String| -> std::result::Result<(), &str> {
                if !code.is_empty() && code.chars().all(|c| c.is_ascii_digit()) {
                    Ok(())
                } else {
                    Err("the code must be numeric")
                }
            })
            .interact_text()
            .map(SecretString::from)
            .map_err(|e| aborted("Verification code", &e))
    }

    fn ask_answer(&self, question: &str) -> Result<SecretString> {
        Password::with_theme(&self.theme)
            .with_prompt(question)
            .interact()
            .map(SecretString::from)
            .map_err(|e| aborted("Answer", &e))
    }

    fn select_factor(&self, factors: &[Factor]) -> Result<usize> {
        let items: Vec<String> = factors.iter().map(Factor::label).collect();
        Select::with_theme(&self.theme)
            .with_prompt("Choose a MFA factor")
            .items(&items)
            .default(0)
            .interact()
            .map_err(|e| aborted("Factor", &e))
    }

    fn select_role(&self, candidates: &[RoleCandidate]) -> Result<usize> {
        let items: Vec<&str> = candidates.iter().map(|c| c.role_arn.as_str()).collect();
        Select::with_theme(&self.theme)
            .with_prompt("Choose a role")
            .items(&items)
            .default(0)
            .interact()
            .map_err(|e| aborted("Role", &e))
    }

    fn notify(&self, message: &str) {
        eprintln!("{message}");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::{collections::VecDeque, sync::Mutex};

    /// Answers prompts from a script, failing with `InputAborted` once the
    /// script runs out.
    #[derive(Default)]
    pub(crate) struct ScriptedPrompter {
        pub(crate) answers: Mutex<VecDeque<String>>,
        pub(crate) factor_choice: Option<usize>,
        pub(crate) role_choice: Option<usize>,
    }

    impl ScriptedPrompter {
        pub(crate) fn new(answers: &[&str]) -> Self {
            Self {
                answers: Mutex::new(answers.iter().map(ToString::to_string).collect()),
                ..Self::default()
            }
        }

        fn next(&self, what: &str) -> Result<String> {
            self.answers
                .lock()
                .ok()
                .and_then(|mut a| a.pop_front())
                .ok_or_else(|| Error::InputAborted(format!("{what} not provided")))
        }

        pub(crate) fn remaining(&self) -> usize {
            self.answers.lock().map(|a| a.len()).unwrap_or(0)
        }
    }

    impl Prompter for ScriptedPrompter {
        fn ask_username(&self) -> Result<String> {
            self.next("Username")
        }

        fn ask_password(&self, _label: &str) -> Result<SecretString> {
            self.next("Password").map(SecretString::from)
        }

        fn ask_passcode(&self, _factor: &Factor) -> Result<SecretString> {
            self.next("Verification code").map(SecretString::from)
        }

        fn ask_answer(&self, _question: &str) -> Result<SecretString> {
            self.next("Answer").map(SecretString::from)
        }

        fn select_factor(&self, _factors: &[Factor]) -> Result<usize> {
            self.factor_choice
                .ok_or_else(|| Error::InputAborted("Factor not provided".into()))
        }

        fn select_role(&self, _candidates: &[RoleCandidate]) -> Result<usize> {
            self.role_choice
                .ok_or_else(|| Error::InputAborted("Role not provided".into()))
        }
    }

    #[test]
    fn test_scripted_prompter_runs_out() {
        let prompter = ScriptedPrompter::new(&["alice", "hunter2"]);
        assert_eq!(prompter.ask_username().unwrap(), "alice");
        assert_eq!(prompter.ask_password("Password").unwrap().expose_secret(), "hunter2");
        assert!(matches!(prompter.ask_password("Password"), Err(Error::InputAborted(_))));
        assert_eq!(prompter.remaining(), 0);
    }
}
