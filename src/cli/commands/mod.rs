pub mod logging;

use crate::config::OutputFormat;
use clap::{
    Arg, ArgAction, ColorChoice, Command,
    builder::{
        PossibleValuesParser, TypedValueParser,
        styling::{AnsiColor, Effects, Styles},
    },
};

pub const ARG_USERNAME: &str = "username";
pub const ARG_PROFILE: &str = "profile";
pub const ARG_ROLE: &str = "role";
pub const ARG_CONFIG: &str = "config";
pub const ARG_CREDENTIAL_PROFILE: &str = "credential-profile";
pub const ARG_FACTOR: &str = "factor";
pub const ARG_FORCE: &str = "force";
pub const ARG_NO_CACHE: &str = "no-cache";
pub const ARG_OUTPUT: &str = "output";

pub const DEFAULT_PROFILE: &str = "default";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("okta-aws-login")
        .about("Get temporary AWS credentials through Okta")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PROFILE)
                .short('p')
                .long("profile")
                .help("Profile of the configuration file, repeat to log in to several")
                .env("OKTA_AWS_PROFILE")
                .value_delimiter(',')
                .action(ArgAction::Append)
                .default_value(DEFAULT_PROFILE),
        )
        .arg(
            Arg::new(ARG_USERNAME)
                .short('u')
                .long("username")
                .help("Okta username")
                .env("OKTA_USERNAME"),
        )
        .arg(
            Arg::new(ARG_ROLE)
                .short('r')
                .long("role")
                .help("ARN of the AWS role to assume")
                .env("OKTA_AWS_ROLE"),
        )
        .arg(
            Arg::new(ARG_CONFIG)
                .short('c')
                .long("config")
                .help("Configuration file (default: ~/.okta_aws_login_config)")
                .env("OKTA_AWS_LOGIN_CONFIG")
                .value_parser(clap::value_parser!(std::path::PathBuf)),
        )
        .arg(
            Arg::new(ARG_CREDENTIAL_PROFILE)
                .long("credential-profile")
                .help("Section of the AWS credentials file to write (default: the role name)"),
        )
        .arg(
            Arg::new(ARG_FACTOR)
                .long("factor")
                .help("Preferred MFA factor, e.g. push, token:software:totp or sms"),
        )
        .arg(
            Arg::new(ARG_FORCE)
                .long("force")
                .help("Sign in again even if cached credentials are still valid")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_NO_CACHE)
                .long("no-cache")
                .help("Do not read or write cached credentials and sessions")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_OUTPUT)
                .short('o')
                .long("output")
                .help("Output format (default: from the profile, credentials)")
                .value_parser(
                    PossibleValuesParser::new(OutputFormat::VALUES)
                        .try_map(|value| value.parse::<OutputFormat>()),
                ),
        );

    logging::with_args(command)
}
