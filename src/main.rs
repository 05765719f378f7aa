//! decoy-probe: probe/decoy pair for verifying transparent UDP redirection
//!
//! # Usage
//!
//! ```bash
//! # Decoy server (needs CAP_NET_ADMIN + CAP_NET_RAW, typically root)
//! sudo decoy-probe server --bind-address 127.0.0.1:1820
//!
//! # Probe the redirection from outside, sending from the protected port
//! decoy-probe client 192.0.2.10:1820 51820
//!
//! decoy-probe version
//! ```

use std::path::PathBuf;
use std::time::Duration;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use decoy_probe::config::{apply_env_overrides, load_config, Config};
use decoy_probe::error::ClientError;
use decoy_probe::tproxy::is_root;
use decoy_probe::{DecoyServer, ProbeClient};

/// Exit code for usage/argument errors
const EXIT_USAGE: i32 = 2;

/// Exit code for insufficient successful exchanges
const EXIT_INSUFFICIENT: i32 = 3;

/// Parsed command line
struct Args {
    command: Command,
    config_path: Option<PathBuf>,
    bind_address: Option<String>,
    request: Option<String>,
    response: Option<String>,
    timeout_secs: Option<u64>,
    attempts: Option<u32>,
    min_responses: Option<u32>,
    no_break_early: bool,
}

enum Command {
    Server,
    Client { remote: String, local_port: String },
    Version,
}

impl Args {
    fn parse(args: impl Iterator<Item = String>) -> Result<Self, String> {
        let mut config_path = None;
        let mut bind_address = None;
        let mut request = None;
        let mut response = None;
        let mut timeout_secs = None;
        let mut attempts = None;
        let mut min_responses = None;
        let mut no_break_early = false;
        let mut positionals: Vec<String> = Vec::new();

        let mut args = args;
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    let value = args.next().ok_or("--config requires a path")?;
                    config_path = Some(PathBuf::from(value));
                }
                "--bind-address" => {
                    bind_address = Some(args.next().ok_or("--bind-address requires a value")?);
                }
                "--request" => {
                    request = Some(args.next().ok_or("--request requires a value")?);
                }
                "--response" => {
                    response = Some(args.next().ok_or("--response requires a value")?);
                }
                "--timeout" => {
                    let value = args.next().ok_or("--timeout requires seconds")?;
                    timeout_secs =
                        Some(value.parse().map_err(|_| format!("invalid timeout: {value}"))?);
                }
                "--attempts" => {
                    let value = args.next().ok_or("--attempts requires a number")?;
                    attempts =
                        Some(value.parse().map_err(|_| format!("invalid attempts: {value}"))?);
                }
                "--min-responses" => {
                    let value = args.next().ok_or("--min-responses requires a number")?;
                    min_responses = Some(
                        value
                            .parse()
                            .map_err(|_| format!("invalid min-responses: {value}"))?,
                    );
                }
                "--no-break-early" => {
                    no_break_early = true;
                }
                "-h" | "--help" => {
                    print_usage();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    positionals.push("version".into());
                }
                other if other.starts_with('-') => {
                    return Err(format!("unknown option: {other}"));
                }
                _ => positionals.push(arg),
            }
        }

        let command = match positionals.first().map(String::as_str) {
            Some("server") if positionals.len() == 1 => Command::Server,
            Some("client") if positionals.len() == 3 => Command::Client {
                remote: positionals[1].clone(),
                local_port: positionals[2].clone(),
            },
            Some("version") => Command::Version,
            Some(other) => return Err(format!("unknown or malformed command: {other}")),
            None => return Err("no command given".into()),
        };

        Ok(Self {
            command,
            config_path,
            bind_address,
            request,
            response,
            timeout_secs,
            attempts,
            min_responses,
            no_break_early,
        })
    }

    /// Fold command-line overrides into the layered configuration.
    fn apply_to(&self, config: &mut Config) -> Result<(), String> {
        if let Some(addr) = &self.bind_address {
            config.server.bind_address = addr
                .parse()
                .map_err(|_| format!("invalid bind address: {addr}"))?;
        }
        if let Some(request) = &self.request {
            config.probe.request = request.clone();
        }
        if let Some(response) = &self.response {
            config.probe.response = response.clone();
        }
        if let Some(timeout) = self.timeout_secs {
            config.probe.timeout_secs = timeout;
        }
        if let Some(attempts) = self.attempts {
            config.client.attempts = attempts;
        }
        if let Some(min_responses) = self.min_responses {
            config.client.min_responses = min_responses;
        }
        if self.no_break_early {
            config.client.break_early = false;
        }
        Ok(())
    }
}

fn print_usage() {
    println!(
        r#"decoy-probe v{}

Verifies that traffic to a protected UDP port is transparently redirected
to a decoy listener instead of reaching the real service.

USAGE:
    decoy-probe server [OPTION]...
    decoy-probe client <SERVER ADDRESS:PORT> <LOCAL PORT> [OPTION]...
    decoy-probe version

OPTIONS:
    -c, --config <PATH>       JSON configuration file
    --bind-address <ADDR>     Server bind address [default: 127.0.0.1:1820]
    --request <BYTES>         Probe request payload [default: PING]
    --response <BYTES>        Probe response payload [default: PONG]
    --timeout <SECONDS>       Per-exchange timeout [default: 5]
    --attempts <N>            Client exchange attempts [default: 10]
    --min-responses <N>       Successes needed to pass [default: 5]
    --no-break-early          Keep probing after min-responses is reached
    -h, --help                Print help information
    -v, --version             Print version information

ENVIRONMENT:
    DECOY_BIND_ADDR, DECOY_REQUEST, DECOY_RESPONSE,
    DECOY_TIMEOUT_SECS, DECOY_LOG_LEVEL

EXIT CODES:
    0  success / enough probe exchanges succeeded
    2  usage or argument error
    3  insufficient successful exchanges

The server requires CAP_NET_ADMIN and CAP_NET_RAW, plus TPROXY redirection
rules configured on the host (see module documentation).
"#,
        decoy_probe::VERSION
    );
}

/// Initialize logging
fn init_logging(config: &Config) {
    let level = match config.log.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    if config.log.format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

#[tokio::main]
async fn main() {
    let code = run().await;
    std::process::exit(code);
}

async fn run() -> i32 {
    let args = match Args::parse(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("error: {msg}");
            eprintln!();
            print_usage();
            return EXIT_USAGE;
        }
    };

    if let Command::Version = args.command {
        println!("{}", decoy_probe::VERSION);
        return 0;
    }

    // Layer configuration: defaults -> file -> environment -> flags
    let mut config = match args.config_path.as_deref().map(load_config).transpose() {
        Ok(config) => config.unwrap_or_default(),
        Err(e) => {
            eprintln!("error: {e}");
            return EXIT_USAGE;
        }
    };
    if let Err(e) = apply_env_overrides(&mut config) {
        eprintln!("error: {e}");
        return EXIT_USAGE;
    }
    if let Err(msg) = args.apply_to(&mut config) {
        eprintln!("error: {msg}");
        return EXIT_USAGE;
    }
    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        return EXIT_USAGE;
    }

    init_logging(&config);

    match args.command {
        Command::Server => cmd_server(&config).await,
        Command::Client { remote, local_port } => {
            let remote = match remote.parse() {
                Ok(addr) => addr,
                Err(_) => {
                    eprintln!("error: invalid server address: {remote}");
                    return EXIT_USAGE;
                }
            };
            let local_port = match local_port.parse() {
                Ok(port) => port,
                Err(_) => {
                    eprintln!("error: invalid local port: {local_port}");
                    return EXIT_USAGE;
                }
            };
            cmd_client(&config, remote, local_port).await
        }
        Command::Version => unreachable!("handled above"),
    }
}

async fn cmd_server(config: &Config) -> i32 {
    info!("starting decoy-probe server v{}", decoy_probe::VERSION);

    if !is_root() {
        warn!("not running as root; transparent receive and raw send need CAP_NET_ADMIN/CAP_NET_RAW");
    }

    let server = match DecoyServer::new(
        config.server.bind_address,
        config.probe.request_bytes(),
        config.probe.response_bytes(),
    ) {
        Ok(server) => server,
        Err(e) => {
            error!("can't start server: {e}");
            return 1;
        }
    };

    let failed = tokio::select! {
        result = server.run() => result.is_err(),
        () = shutdown_signal() => {
            info!("received shutdown signal");
            false
        }
    };

    if let Err(e) = server.close() {
        error!("{e}");
        return 1;
    }

    info!("shutdown complete");
    i32::from(failed)
}

async fn cmd_client(config: &Config, remote: std::net::SocketAddr, local_port: u16) -> i32 {
    info!(
        "starting decoy-probe client: probing {} from local port {}",
        remote, local_port
    );

    let client = match ProbeClient::dial(
        local_port,
        remote,
        config.probe.request_bytes(),
        config.probe.response_bytes(),
    )
    .await
    {
        Ok(client) => client,
        Err(e) => {
            error!("client dial failed: {e}");
            return 1;
        }
    };

    // SIGINT/SIGTERM cancel any pending exchange and stop the attempt loop
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    let timeout = config.probe.timeout();
    let attempts = config.client.attempts;
    let min_responses = config.client.min_responses;

    let mut successes = 0u32;
    for attempt in 1..=attempts {
        if shutdown.is_cancelled() {
            break;
        }

        info!("doing exchange #{attempt}...");
        match exchange_with_timeout(&client, &shutdown, timeout).await {
            Ok(()) => {
                info!("successful exchange!");
                successes += 1;
            }
            Err(e) => warn!("exchange error: {e}"),
        }

        if config.client.break_early && successes >= min_responses {
            break;
        }
    }

    if successes >= min_responses {
        info!("probe passed: {successes} successful exchanges");
        return 0;
    }
    error!("received insufficient number of successful responses: {successes} out of {min_responses}");
    EXIT_INSUFFICIENT
}

/// One exchange bounded by the operation timeout.
///
/// The deadline and the shutdown token both surface as cancellation:
/// dropping the exchange future cancels the pending receive, so no task
/// keeps touching the socket afterwards.
async fn exchange_with_timeout(
    client: &ProbeClient,
    shutdown: &CancellationToken,
    timeout: Duration,
) -> Result<(), ClientError> {
    tokio::select! {
        result = client.exchange(shutdown) => result,
        () = tokio::time::sleep(timeout) => Err(ClientError::Cancelled),
    }
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() {
    tokio::select! {
        _ = signal::ctrl_c() => {}
        () = wait_for_sigterm() => {}
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("failed to register SIGTERM handler: {e}");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args, String> {
        Args::parse(args.iter().map(ToString::to_string))
    }

    #[test]
    fn test_parse_server_command() {
        let args = parse(&["server", "--bind-address", "0.0.0.0:18200"]).unwrap();
        assert!(matches!(args.command, Command::Server));
        assert_eq!(args.bind_address.as_deref(), Some("0.0.0.0:18200"));
    }

    #[test]
    fn test_parse_client_command() {
        let args = parse(&["client", "192.0.2.10:1820", "51820", "--attempts", "3"]).unwrap();
        match &args.command {
            Command::Client { remote, local_port } => {
                assert_eq!(remote, "192.0.2.10:1820");
                assert_eq!(local_port, "51820");
            }
            _ => panic!("expected client command"),
        }
        assert_eq!(args.attempts, Some(3));
    }

    #[test]
    fn test_parse_rejects_unknown_option() {
        assert!(parse(&["server", "--what"]).is_err());
    }

    #[test]
    fn test_parse_rejects_client_without_positionals() {
        assert!(parse(&["client"]).is_err());
        assert!(parse(&["client", "192.0.2.10:1820"]).is_err());
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(parse(&[]).is_err());
    }

    #[test]
    fn test_overrides_apply() {
        let args = parse(&[
            "server",
            "--request",
            "HELLO",
            "--response",
            "WORLD",
            "--timeout",
            "2",
            "--no-break-early",
        ])
        .unwrap();

        let mut config = Config::default();
        args.apply_to(&mut config).unwrap();

        assert_eq!(config.probe.request, "HELLO");
        assert_eq!(config.probe.response, "WORLD");
        assert_eq!(config.probe.timeout_secs, 2);
        assert!(!config.client.break_early);
    }

    #[test]
    fn test_invalid_bind_address_rejected() {
        let args = parse(&["server", "--bind-address", "not-an-addr"]).unwrap();
        let mut config = Config::default();
        assert!(args.apply_to(&mut config).is_err());
    }
}
