use std::{error::Error, io, process, sync::Arc, thread, time::Duration};

use clap::{command, Parser, Subcommand, ValueHint};
use log::{debug, error, info, warn, LevelFilter};
use tokio_util::sync::CancellationToken;
use url::Url;

use nowplay::{
    api::WebApi,
    auth::AuthFlow,
    config::Config,
    error,
    events::Event,
    http::Client as HttpClient,
    playback::PlaybackState,
    store::SessionStore,
    sync::{self, Handle, PlaybackSync},
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
#[derive(Clone, Debug, PartialEq, Eq, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Session file
    ///
    /// Keeps login progress and the access token between invocations. Ensure
    /// that this file is kept secure and not shared publicly, as it contains
    /// an access token to your account.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value_t = String::from("session.toml"), env = "NOWPLAY_SESSION_FILE")]
    session_file: String,

    /// Redirect URI
    ///
    /// Must exactly match a redirect URI registered for the client ID.
    #[arg(long, value_hint = ValueHint::Url, default_value_t = String::from(Config::DEFAULT_REDIRECT_URI), env = "NOWPLAY_REDIRECT_URI")]
    redirect_uri: String,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,

    #[command(subcommand)]
    action: Action,
}

#[derive(Clone, Debug, PartialEq, Eq, Subcommand)]
enum Action {
    /// Start logging in
    ///
    /// Opens the authorization page in your browser. After approving, run
    /// `resume` with the address the browser was redirected to.
    Login {
        /// Client ID of your registered application
        #[arg(long, env = "NOWPLAY_CLIENT_ID")]
        client_id: String,
    },

    /// Finish logging in
    Resume {
        /// Address the browser was redirected to after approving
        #[arg(value_hint = ValueHint::Url)]
        url: Url,
    },

    /// Forget the access token
    Logout,

    /// Show login state and what is playing
    Status,

    /// Follow playback until interrupted
    ///
    /// Reads commands from standard input: `p` to play or pause, `n` for the
    /// next track, `b` for the previous track, and `s <seconds>` to seek.
    Watch,

    /// Resume playback
    Play,

    /// Pause playback
    Pause,

    /// Skip to the next track
    Next,

    /// Skip to the previous track
    Previous,

    /// Seek in the current track
    Seek {
        /// Position in milliseconds
        position_ms: u64,
    },
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
            // Quiet and verbose are mutually exclusive.
            0 => LevelFilter::Warn,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module("nowplay", level);
    }

    logger.init();
}

/// Formats `duration` as `m:ss`.
fn format_time(duration: Duration) -> String {
    let seconds = duration.as_secs();
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

fn describe(state: &PlaybackState) -> String {
    match state.snapshot() {
        Some(track) => format!(
            "{} - {} [{} / -{}]",
            track.title,
            track.artist_names(),
            format_time(state.progress()),
            format_time(state.remaining())
        ),
        None => String::from("nothing playing"),
    }
}

fn print_event(event: Event, state: &PlaybackState) {
    match event {
        Event::TrackChanged => {
            if let Some(track) = state.snapshot() {
                println!(
                    "now playing: {} - {} ({})",
                    track.title,
                    track.artist_names(),
                    format_time(track.duration)
                );
                if let Some(artwork) = &track.artwork {
                    println!("  artwork: {artwork}");
                }
            }
        }
        Event::Play => println!("playing: {}", describe(state)),
        Event::Pause => println!("paused: {}", describe(state)),
        Event::Stopped => println!("nothing playing"),
        Event::LoggedIn => println!("following playback, press Ctrl-C to stop"),
        Event::LoggedOut => println!("logged out, run `login` to log in again"),
    }
}

/// Parses a line of `watch` input.
fn parse_input(line: &str) -> Option<sync::Command> {
    let mut words = line.split_whitespace();
    let command = match words.next()? {
        "p" => sync::Command::Toggle,
        "n" => sync::Command::Next,
        "b" => sync::Command::Previous,
        "s" => {
            let seconds = words.next()?.parse::<f64>().ok()?;
            let position = Duration::try_from_secs_f64(seconds).ok()?;
            sync::Command::Seek(position)
        }
        _ => return None,
    };

    Some(command)
}

/// Forwards `watch` input to the sync loop.
///
/// Runs on a plain thread, because reading standard input blocks and must
/// not hold up shutdown.
fn read_input(handle: Handle) {
    for line in io::stdin().lines() {
        let Ok(line) = line else {
            break;
        };

        match parse_input(&line) {
            Some(command) => {
                if handle.send(command).is_err() {
                    break;
                }
            }
            None => {
                if !line.trim().is_empty() {
                    warn!("unknown command: {}", line.trim());
                }
            }
        }
    }
}

async fn watch(config: &Config, auth: &mut AuthFlow, api: WebApi) -> Result<(), Box<dyn Error>> {
    let mut sync = PlaybackSync::new(config, auth, api);
    let mut events = sync.subscribe();
    let state = sync.watch_state();

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(event, &state.borrow());
        }
    });

    let handle = sync.handle();
    thread::spawn(move || read_input(handle));

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutting down gracefully");
        }
        ctrl_c.cancel();
    });

    let result = sync.run(shutdown).await;

    // Closes the event channel, so the printer can finish.
    drop(sync);
    if let Err(e) = printer.await {
        debug!("printer stopped: {e}");
    }

    Ok(result?)
}

/// Runs `command` once, after a poll to know what is playing.
async fn once(
    config: &Config,
    auth: &mut AuthFlow,
    api: WebApi,
    command: Option<sync::Command>,
) -> Result<(), Box<dyn Error>> {
    if !auth.is_logged_in() {
        return Err(error::Error::unauthenticated("not logged in, run `login` first").into());
    }

    let mut sync = PlaybackSync::new(config, auth, api);
    sync.poll().await;

    match command {
        Some(sync::Command::Play) => sync.play().await,
        Some(sync::Command::Pause) => sync.pause().await,
        Some(sync::Command::Toggle) => sync.toggle().await,
        Some(sync::Command::Next) => sync.skip_next().await,
        Some(sync::Command::Previous) => sync.skip_previous().await,
        Some(sync::Command::Seek(position)) => sync.seek(position).await,
        None => {}
    }

    if !sync.auth().is_logged_in() {
        return Err(error::Error::unauthenticated("access token was rejected").into());
    }

    let state = sync.state();
    let playing = if state.is_playing() { "playing" } else { "paused" };
    match state.snapshot() {
        Some(_) => println!("{playing}: {}", describe(state)),
        None => println!("{}", describe(state)),
    }

    Ok(())
}

/// Main application logic.
///
/// # Errors
///
/// This function returns an error when the session file cannot be used, when
/// logging in fails, or when the access token is rejected.
async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let config = Config::new(&args.redirect_uri)?;
    let store = SessionStore::open(&args.session_file)?;
    let http_client = Arc::new(HttpClient::new(&config)?);

    let mut auth = AuthFlow::new(&config, Arc::clone(&http_client), store);
    let api = WebApi::new(&config, http_client);

    match args.action {
        Action::Login { client_id } => {
            let url = auth.begin_login(&client_id)?;
            if let Err(e) = webbrowser::open(url.as_str()) {
                warn!("could not open a browser: {e}");
            }

            println!("log in at:\n\n  {url}\n");
            println!("then run `resume` with the address you are redirected to");
        }

        Action::Resume { url } => {
            let visible = auth.resume_from_url(&url).await?;
            if auth.is_logged_in() {
                println!("logged in");
            } else {
                warn!("no authorization code in {visible}");
            }
        }

        Action::Logout => {
            auth.logout()?;
            println!("logged out");
        }

        Action::Status => {
            println!("login: {}", auth.state());
            if let Some(client_id) = auth.client_id() {
                println!("client id: {client_id}");
            }
            if auth.is_logged_in() {
                once(&config, &mut auth, api, None).await?;
            }
        }

        Action::Watch => watch(&config, &mut auth, api).await?,

        Action::Play => once(&config, &mut auth, api, Some(sync::Command::Play)).await?,
        Action::Pause => once(&config, &mut auth, api, Some(sync::Command::Pause)).await?,
        Action::Next => once(&config, &mut auth, api, Some(sync::Command::Next)).await?,
        Action::Previous => {
            once(&config, &mut auth, api, Some(sync::Command::Previous)).await?;
        }
        Action::Seek { position_ms } => {
            let position = Duration::from_millis(position_ms);
            once(&config, &mut auth, api, Some(sync::Command::Seek(position))).await?;
        }
    }

    Ok(())
}

/// Main entry point of the application.
///
/// This function initializes the logger facade, parses the command line
/// arguments, and runs the requested action.
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

    info!("starting {name}/{version}; {BUILD_PROFILE}");

    if let Err(e) = run(args).await {
        error!("{e}");
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_labels() {
        assert_eq!(format_time(Duration::ZERO), "0:00");
        assert_eq!(format_time(Duration::from_millis(50_100)), "0:50");
        assert_eq!(format_time(Duration::from_secs(200)), "3:20");
        assert_eq!(format_time(Duration::from_secs(3_725)), "62:05");
    }

    #[test]
    fn watch_input() {
        assert_eq!(parse_input("p"), Some(sync::Command::Toggle));
        assert_eq!(parse_input(" n "), Some(sync::Command::Next));
        assert_eq!(parse_input("b"), Some(sync::Command::Previous));
        assert_eq!(
            parse_input("s 90"),
            Some(sync::Command::Seek(Duration::from_secs(90)))
        );
        assert_eq!(parse_input("s"), None);
        assert_eq!(parse_input("s -1"), None);
        assert_eq!(parse_input("x"), None);
        assert_eq!(parse_input(""), None);
    }

    #[test]
    fn describe_nothing() {
        assert_eq!(describe(&PlaybackState::new()), "nothing playing");
    }
}
