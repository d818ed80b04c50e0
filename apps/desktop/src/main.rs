mod config;
mod controller;
mod ui;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{
    BackendConfig, BootstrapSequencer, HostedBackend, SequencerHandle, SequencerOptions,
    SignUpOutcome,
};
use storage::{CredentialStore, SqliteCredentialStore};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use config::{CliOverrides, Settings};
use controller::{
    events::{UiError, UiErrorCategory, UiErrorContext},
    orchestration::{parse_command, ShellCommand, HELP},
    router::{route, Navigation, Screen},
};
use ui::render::render_with_boundary;

#[derive(Parser, Debug)]
#[command(name = "orcafacil", about = "OrçaFácil quoting client")]
struct Args {
    /// TOML settings file; defaults to ./orcafacil.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    backend_url: Option<String>,
    #[arg(long)]
    anon_key: Option<String>,
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// tracing filter, e.g. `info,client_core=debug`.
    #[arg(long)]
    log_filter: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let cli = CliOverrides {
        backend_url: args.backend_url,
        anon_key: args.anon_key,
        data_dir: args.data_dir,
        log_filter: args.log_filter,
    };
    let settings = config::load_settings(args.config.as_deref(), &cli)?;

    let filter = EnvFilter::try_new(&settings.log_filter)
        .with_context(|| format!("invalid log filter '{}'", settings.log_filter))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let store = open_store(&settings).await?;
    if settings.anon_key.is_empty() {
        warn!("no anon key configured; the backend will reject most requests");
    }
    let backend_config = BackendConfig::new(&settings.backend_url, settings.anon_key.clone())
        .with_context(|| format!("invalid backend url '{}'", settings.backend_url))?;
    let oauth_redirect = Url::parse(&settings.oauth_redirect_url).with_context(|| {
        format!("invalid oauth redirect url '{}'", settings.oauth_redirect_url)
    })?;
    info!(backend = %backend_config.base_url, "starting");

    let shell = Shell {
        backend: Arc::new(HostedBackend::new(backend_config)),
        store: Arc::new(store),
        options: SequencerOptions {
            profile_retry_delay: settings.profile_retry_delay(),
        },
        oauth_redirect,
        nav: Navigation::default(),
        shown: None,
    };
    shell.run().await
}

async fn open_store(settings: &Settings) -> Result<SqliteCredentialStore> {
    let url = SqliteCredentialStore::sqlite_url_for_data_dir(&settings.data_dir);
    let mut store = SqliteCredentialStore::new(&url).await?;
    if let Some(max_age) = settings.cache_max_age() {
        store = store.with_max_age(max_age);
    }
    store.health_check().await?;
    info!(path = %settings.credentials_path().display(), "credential cache ready");
    Ok(store)
}

enum Input {
    StateChanged,
    SequencerStopped,
    Line(String),
    Eof,
}

enum Flow {
    Continue,
    Reload,
    Quit,
}

struct Shell {
    backend: Arc<HostedBackend>,
    store: Arc<dyn CredentialStore>,
    options: SequencerOptions,
    oauth_redirect: Url,
    nav: Navigation,
    shown: Option<Screen>,
}

impl Shell {
    async fn start(&self) -> SequencerHandle {
        BootstrapSequencer::new(self.backend.clone(), self.backend.clone(), self.store.clone())
            .with_options(self.options)
            .start()
            .await
    }

    async fn run(mut self) -> Result<()> {
        let mut handle = self.start().await;
        let mut states = handle.watch();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        println!("{HELP}\n");
        self.refresh(&handle).await;

        loop {
            let input = tokio::select! {
                changed = states.changed() => match changed {
                    Ok(()) => Input::StateChanged,
                    Err(_) => Input::SequencerStopped,
                },
                line = lines.next_line() => match line.context("failed to read input")? {
                    Some(line) => Input::Line(line),
                    None => Input::Eof,
                },
            };

            match input {
                Input::StateChanged => {}
                Input::SequencerStopped => {
                    warn!("bootstrap sequencer stopped");
                    break;
                }
                Input::Eof => break,
                Input::Line(line) => match self.execute(&handle, &line).await {
                    Flow::Continue => {}
                    Flow::Quit => break,
                    Flow::Reload => {
                        handle.shutdown().await;
                        handle = self.start().await;
                        states = handle.watch();
                        self.nav = Navigation::default();
                        self.shown = None;
                        info!("reloaded");
                    }
                },
            }
            self.refresh(&handle).await;
        }

        handle.shutdown().await;
        Ok(())
    }

    fn screen(&self, handle: &SequencerHandle) -> Screen {
        route(&handle.state(), &self.nav)
    }

    /// Prints the routed screen when it differs from the one on display.
    async fn refresh(&mut self, handle: &SequencerHandle) {
        self.nav.sync_with(&handle.state());
        let screen = self.screen(handle);
        if self.shown.as_ref() == Some(&screen) {
            return;
        }

        match render_with_boundary(&screen) {
            Ok(text) => {
                debug!(screen = screen.id(), "rendered");
                println!("{text}");
                self.shown = Some(screen);
            }
            Err(message) => {
                error!(screen = screen.id(), "render failed: {message}");
                handle.report_render_failure(message).await;
            }
        }
    }

    async fn execute(&mut self, handle: &SequencerHandle, line: &str) -> Flow {
        let command = match parse_command(line) {
            Ok(Some(command)) => command,
            Ok(None) => return Flow::Continue,
            Err(message) => {
                show_error(&UiError::new(
                    UiErrorCategory::Validation,
                    UiErrorContext::Command,
                    message,
                ));
                return Flow::Continue;
            }
        };

        let screen = self.screen(handle);
        if let Err(message) = command.check_available(&screen) {
            println!("  {message}");
            return Flow::Continue;
        }
        debug!(command = command.name(), screen = screen.id(), "running command");

        match command {
            ShellCommand::Help => println!("{HELP}"),
            ShellCommand::Quit => return Flow::Quit,
            ShellCommand::Reload => return Flow::Reload,
            ShellCommand::Login(form) => match handle.sign_in_with_password(&form).await {
                Ok(session) => info!(identity_id = %session.identity_id(), "signed in"),
                Err(err) => show_error(&UiError::from_auth_form(UiErrorContext::SignIn, &err)),
            },
            ShellCommand::SignUp(form) => match handle.sign_up(&form).await {
                Ok(SignUpOutcome::SignedIn(session)) => {
                    info!(identity_id = %session.identity_id(), "account created");
                }
                Ok(SignUpOutcome::ConfirmationPending(identity)) => println!(
                    "  account created; confirm it from the e-mail sent to {}, then log in",
                    identity.email
                ),
                Err(err) => show_error(&UiError::from_auth_form(UiErrorContext::SignUp, &err)),
            },
            ShellCommand::OAuth(provider) => {
                match handle.oauth_authorize_url(provider, &self.oauth_redirect).await {
                    Ok(url) => {
                        println!("  open this address in a browser:\n  {url}");
                        println!("  then run: oauth-callback <address you were sent back to>");
                    }
                    Err(err) => show_error(&UiError::from_auth_form(UiErrorContext::OAuth, &err)),
                }
            }
            ShellCommand::OAuthCallback(url) => {
                match handle.complete_oauth_redirect(&url).await {
                    Ok(session) => info!(identity_id = %session.identity_id(), "signed in with oauth"),
                    Err(err) => show_error(&UiError::from_auth_form(UiErrorContext::OAuth, &err)),
                }
            }
            ShellCommand::Onboard(args) => {
                let Screen::Onboarding { identity, .. } = screen else {
                    return Flow::Continue;
                };
                let draft = args.into_draft(&identity);
                match handle.complete_onboarding(&draft).await {
                    Ok(profile) => println!("  company {} registered", profile.trade_name),
                    Err(err) => show_error(&UiError::from_onboarding(&err)),
                }
            }
            ShellCommand::Navigate(intent) => {
                if self.nav.apply(intent) {
                    debug!(
                        view = self.nav.view().as_str(),
                        step = self.nav.step().index(),
                        "navigated"
                    );
                } else {
                    println!("  already there");
                }
            }
            ShellCommand::Logout => {
                handle.sign_out().await;
                info!("signed out");
            }
        }
        Flow::Continue
    }
}

fn show_error(err: &UiError) {
    debug!(category = ?err.category(), context = ?err.context(), "command failed");
    if err.is_inline() {
        println!("  {}", err.message());
    } else {
        println!("!! {err}");
        if err.requires_reauth() && err.context() == UiErrorContext::Onboarding {
            println!("   sign in again with 'logout' then 'login'");
        }
    }
}
