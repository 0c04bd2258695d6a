use std::{error::Error, io, process, sync::Arc, time::Duration};

use clap::{command, Parser, ValueHint};
use log::{debug, error, info, LevelFilter};

use chorus::{
    config::{Config, Secrets},
    events::{Event, Topic},
    remote,
    store::{keys, MemoryStore, SecretStore},
    tokens::TokenManager,
};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when not built release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Secrets file
    ///
    /// Ensure that this file is kept secure and not shared publicly, as it
    /// contains sensitive information that can grant access to your Spotify
    /// account.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value_t = String::from("secrets.toml"))]
    secrets_file: String,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,
}

/// Initializes the logger facade.
///
/// The logging level is determined as follows, in order of precedence from
/// highest to lowest:
/// 1. Command line arguments
/// 2. `RUST_LOG` environment variable
/// 3. Hard coded default
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(config: &Args) {
    let mut logger = env_logger::Builder::from_env(
        // Note: if you change the default logging level here, then you should
        // probably also change the verbosity levels below.
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if config.quiet || config.verbose > 0 {
        let level = match config.verbose {
            0 => {
                // Quiet and verbose are mutually exclusive, and `verbose` is 0
                // by default. So this arm means: quiet mode.
                LevelFilter::Warn
            }
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module(module_path!(), level);
    }

    logger.init();
}

/// Loads the secrets from a TOML file.
///
/// # Errors
///
/// Returns an error if the file could not be read or parsed.
fn load_secrets(secrets_file: &str) -> Result<Secrets, Box<dyn Error>> {
    let text = std::fs::read_to_string(secrets_file).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            info!("read the documentation on how to set up {secrets_file}");
        }
        e
    })?;

    Ok(toml::from_str(&text)?)
}

/// Completes the authorization code flow if no tokens are held yet.
///
/// The consent URL goes to stdout; the code pasted back on stdin lands in
/// the secret store, where the token manager picks it up.
async fn authorize(
    tokens: &TokenManager,
    store: Arc<MemoryStore>,
) -> Result<(), Box<dyn Error>> {
    let url = tokens.authorize_url()?;
    println!("Visit this URL to authorize:");
    println!("{url}");
    println!("Then paste the \"code\" parameter from the redirect here:");

    std::thread::spawn(move || {
        let mut line = String::new();
        if io::stdin().read_line(&mut line).is_ok() {
            store.set(keys::AUTH_CODE, line.trim(), true);
        }
    });

    let code = tokens.await_authorization_code().await?;
    tokens.exchange_code(&code).await?;
    info!("authorization complete");

    Ok(())
}

/// Runs one dealer connection, logging playback changes until it ends.
async fn connect(client: &mut remote::Client) -> chorus::error::Result<()> {
    // Observers are cleared on every stop, so re-subscribe per connection.
    let mut playback = client.subscribe(Topic::Type("PLAYER_STATE_CHANGED".to_owned()));
    tokio::spawn(async move {
        while let Some(event) = playback.recv().await {
            if let Event::Push { payload, .. } = event {
                info!("playback changed: {payload}");
            }
        }
    });

    client.start().await
}

/// Main application loop.
///
/// # Errors
///
/// This function returns an error when an error occurs. This could be due to
/// the user interrupting the application or an unrecoverable network error.
async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let secrets = load_secrets(&args.secrets_file)?;

    let store = MemoryStore::shared();
    if let Some(token) = &secrets.access_token {
        store.set(keys::ACCESS_TOKEN, token, true);
    }
    if let Some(token) = &secrets.refresh_token {
        store.set(keys::REFRESH_TOKEN, token, true);
    }

    let config = Config::with_secrets(secrets);
    let tokens = Arc::new(TokenManager::new(&config, Arc::clone(&store) as _)?);

    if tokens.needs_authorization().await {
        authorize(&tokens, Arc::clone(&store)).await?;
    }

    let mut client = remote::Client::new(&config, Arc::clone(&tokens))?;

    // Restart after sleeping some duration to prevent accidental denial of
    // service attacks on the Spotify infrastructure. The initial connection
    // happens immediately.
    let restart_timer = tokio::time::sleep(Duration::ZERO);
    tokio::pin!(restart_timer);

    // Main application loop. This restarts the remote client when it gets
    // disconnected for whatever reason. This could be from a network failure
    // on either end or simply a disconnection from the user. In this case, a
    // fresh credential is minted for the new connection.
    loop {
        tokio::select! {
            // Prioritize shutdown signals.
            biased;

            _ = tokio::signal::ctrl_c() => {
                info!("shutting down gracefully");
                client.stop().await;
                break Ok(())
            }

            result = connect(&mut client), if restart_timer.is_elapsed() => {
                if let Err(e) = result {
                    error!("{e}");
                }

                // Sleep with jitter to prevent thundering herds. Subsecond
                // precision further prevents that by spreading requests
                // when users are launching this from some crontab.
                let duration = Duration::from_millis(fastrand::u64(5_000..6_000));
                info!("restarting in {:.1}s", duration.as_secs_f32());
                restart_timer.as_mut().reset(tokio::time::Instant::now() + duration);
            }

            () = &mut restart_timer, if !restart_timer.is_elapsed() => {}
        }
    }
}

/// Main entry point of the application.
///
/// This function initializes the logger facade, parses the command line
/// arguments, and starts the main application loop.
#[tokio::main]
async fn main() {
    // `clap` handles our command line arguments and help text.
    let args = Args::parse();
    init_logger(&args);

    // Dump command line arguments before we do anything more.
    // This aids in debugging of whatever comes next.
    debug!("Command {:#?}", args);

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();
    let lang = String::from("en");

    info!("starting {name}/{version}; {BUILD_PROFILE}; {lang}");

    if let Err(e) = run(args).await {
        error!("{e}");
        process::exit(1);
    }
}
