use crate::{
    cli::{
        actions::{Action, login::Args},
        commands::{
            ARG_CONFIG, ARG_CREDENTIAL_PROFILE, ARG_FACTOR, ARG_FORCE, ARG_NO_CACHE, ARG_OUTPUT,
            ARG_PROFILE, ARG_ROLE, ARG_USERNAME, DEFAULT_PROFILE,
        },
    },
    config::OutputFormat,
    pipeline::LoginRequest,
};
use anyhow::{Result, bail};
use std::path::PathBuf;

/// # Errors
/// Returns an error if the arguments are inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let mut profiles: Vec<String> = Vec::new();
    for profile in matches
        .get_many::<String>(ARG_PROFILE)
        .into_iter()
        .flatten()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
    {
        if !profiles.iter().any(|p| p == profile) {
            profiles.push(profile.to_string());
        }
    }

    if profiles.is_empty() {
        profiles.push(DEFAULT_PROFILE.to_string());
    }

    let credential_profile = matches.get_one::<String>(ARG_CREDENTIAL_PROFILE).cloned();
    if credential_profile.is_some() && profiles.len() > 1 {
        bail!("--{ARG_CREDENTIAL_PROFILE} can only be used with a single --{ARG_PROFILE}");
    }

    let request = LoginRequest {
        username: matches.get_one::<String>(ARG_USERNAME).cloned(),
        role: matches.get_one::<String>(ARG_ROLE).cloned(),
        credential_profile,
        factor: matches.get_one::<String>(ARG_FACTOR).cloned(),
        force: matches.get_flag(ARG_FORCE),
        no_cache: matches.get_flag(ARG_NO_CACHE),
    };

    Ok(Action::Login(Args {
        profiles,
        config: matches.get_one::<PathBuf>(ARG_CONFIG).cloned(),
        output: matches.get_one::<OutputFormat>(ARG_OUTPUT).copied(),
        request,
    }))
}
