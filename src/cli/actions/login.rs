use crate::{
    aws::sink::SharedCredentialsFile,
    cache::default_cache_dir,
    config::{ConfigProvider, FileConfigProvider, OutputFormat, default_config_path},
    pipeline::{Login, LoginRequest, Pipeline},
    prompt::{DialoguerPrompter, Prompter, is_interactive_terminal},
};
use anyhow::{Context, Result, anyhow};
use std::{path::PathBuf, sync::Arc};
use tracing::{Instrument, debug, info_span};

#[derive(Debug)]
pub struct Args {
    pub profiles: Vec<String>,
    pub config: Option<PathBuf>,
    pub output: Option<OutputFormat>,
    pub request: LoginRequest,
}

/// Log in to each profile in turn.
///
/// # Errors
/// Stops at the first profile that fails.
pub async fn execute(args: Args) -> Result<()> {
    let config_path = match args.config {
        Some(path) => path,
        None => default_config_path().ok_or_else(|| anyhow!("no home directory, use --config"))?,
    };
    let provider = FileConfigProvider::new(config_path);

    let cache_dir = default_cache_dir()?;
    let interactive = is_interactive_terminal();
    let prompter: Arc<dyn Prompter> = Arc::new(DialoguerPrompter::default());

    debug!("configuration: {}", provider.path().display());
    debug!("cache: {}", cache_dir.display());

    for name in &args.profiles {
        let profile = provider
            .load_profile(name)
            .with_context(|| format!("cannot load profile {name}"))?;
        let output = args.output.unwrap_or(profile.output_format);

        let mut builder = Pipeline::builder(profile, Arc::clone(&prompter))
            .interactive(interactive)
            .cache_dir(&cache_dir);

        if output == OutputFormat::Credentials {
            builder = builder.sink(Arc::new(SharedCredentialsFile::from_env()?));
        }

        let login = builder
            .build()
            .await?
            .run(&args.request)
            .instrument(info_span!("login", profile = %name))
            .await
            .with_context(|| format!("login to profile {name} failed"))?;

        print_login(&login, output);
    }

    Ok(())
}

fn print_login(login: &Login, output: OutputFormat) {
    match output {
        OutputFormat::Credentials => {
            let source = if login.from_cache { " (cached)" } else { "" };
            eprintln!(
                "Credentials for [{}] valid until {}{}",
                login.profile,
                login.credential.expiration_rfc3339(),
                source
            );
        }
        OutputFormat::Json => println!("{}", login.credential.to_credential_process_json()),
        OutputFormat::Env => print!("{}", login.credential.to_env_exports()),
    }
}
