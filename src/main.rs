//! ya-proxy: transparent TCP proxy
//!
//! This is the main entry point for the proxy daemon.
//!
//! # Usage
//!
//! ```bash
//! # Run with built-in defaults on 127.0.0.1:8081
//! ./ya-proxy
//!
//! # Listen elsewhere
//! ./ya-proxy -p 0.0.0.0:3129
//!
//! # Run with a configuration file and environment overrides
//! YA_PROXY_LOG_LEVEL=debug ./ya-proxy -c /etc/ya-proxy/config.json
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

use ya_proxy::config::{apply_env_overrides, load_config, Config};
use ya_proxy::connection::Bridge;
use ya_proxy::pidfile::PidFile;

const DEFAULT_CONFIG_PATH: &str = "/etc/ya-proxy/config.json";

/// Command-line arguments
struct Args {
    /// Configuration file path
    config_path: Option<PathBuf>,
    /// Listen address override
    listen: Option<SocketAddr>,
    /// PID file path override
    pid_file: Option<PathBuf>,
    /// Skip the PID file
    no_pid_file: bool,
    /// Generate default configuration
    generate_config: bool,
    /// Check configuration only
    check_config: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut parsed = Self {
            config_path: None,
            listen: None,
            pid_file: None,
            no_pid_file: false,
            generate_config: false,
            check_config: false,
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    parsed.config_path = Some(PathBuf::from(required_value(&arg, args.next())));
                }
                "-p" | "--listen" => {
                    let value = required_value(&arg, args.next());
                    match value.parse() {
                        Ok(addr) => parsed.listen = Some(addr),
                        Err(_) => {
                            eprintln!("Invalid listen address: {value}");
                            std::process::exit(1);
                        }
                    }
                }
                "--pid-file" => {
                    parsed.pid_file = Some(PathBuf::from(required_value(&arg, args.next())));
                }
                "--no-pid-file" => {
                    parsed.no_pid_file = true;
                }
                "-g" | "--generate-config" => {
                    parsed.generate_config = true;
                }
                "--check" => {
                    parsed.check_config = true;
                }
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("ya-proxy v{}", ya_proxy::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {arg}");
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        parsed
    }

    /// Layer file (or defaults), environment, then command line
    fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config_path {
            Some(path) => load_config(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
            None => Config::default_config(),
        };

        apply_env_overrides(&mut config).context("Invalid environment override")?;

        if let Some(addr) = self.listen {
            config.listen.address = addr;
        }
        if let Some(path) = &self.pid_file {
            config.pid_file.path.clone_from(path);
        }
        if self.no_pid_file {
            config.pid_file.enabled = false;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

fn required_value(flag: &str, value: Option<String>) -> String {
    value.unwrap_or_else(|| {
        eprintln!("Missing value for {flag}");
        std::process::exit(1);
    })
}

fn print_help() {
    println!(
        r#"ya-proxy v{}

Transparent TCP proxy for iptables REDIRECT.

USAGE:
    ya-proxy [OPTIONS]

OPTIONS:
    -p, --listen <ADDR>     Listen address [default: 127.0.0.1:8081]
    -c, --config <PATH>     Configuration file path (built-in defaults if omitted)
    --pid-file <PATH>       PID file path [default: /tmp/ya-proxy.pid]
    --no-pid-file           Do not create a PID file
    -g, --generate-config   Write default configuration to --config path and exit
    --check                 Check configuration and exit
    -h, --help              Print help information
    -v, --version           Print version information

ENVIRONMENT:
    YA_PROXY_LISTEN_ADDR         Override listen address
    YA_PROXY_LOG_LEVEL           Override log level (trace, debug, info, warn, error)
    YA_PROXY_CONNECT_TIMEOUT_MS  Override upstream connect timeout
    YA_PROXY_PID_FILE            Override PID file path
    RUST_LOG                     Additional tracing filter directives

EXAMPLE:
    # Send locally generated TCP through the proxy; the proxy marks its own
    # upstream sockets with connection.routing_mark = 0xff
    iptables -t nat -A OUTPUT -p tcp -m mark --mark 0xff -j RETURN
    iptables -t nat -A OUTPUT -p tcp -d 127.0.0.0/8 -j RETURN
    iptables -t nat -A OUTPUT -p tcp -j REDIRECT --to-ports 8081

    ya-proxy -c /etc/ya-proxy/config.json
"#,
        ya_proxy::VERSION
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

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.log.target)
        .with_span_events(FmtSpan::CLOSE);

    if config.log.is_json() {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Check system prerequisites
fn check_prerequisites(config: &Config) {
    // SAFETY: geteuid has no preconditions and cannot fail.
    let is_root = unsafe { libc::geteuid() } == 0;

    if config.connection.routing_mark.is_some() && !is_root {
        warn!("connection.routing_mark needs CAP_NET_ADMIN; upstream dials may fail");
    }
}

/// Main application entry point
#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Instant::now();

    let args = Args::parse();

    if args.generate_config {
        let path = args
            .config_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        ya_proxy::config::create_default_config(&path)?;
        println!("Generated default configuration at {}", path.display());
        return Ok(());
    }

    let config = args.load_config()?;

    if args.check_config {
        println!("Configuration is valid");
        return Ok(());
    }

    init_logging(&config);

    info!("ya-proxy v{}", ya_proxy::VERSION);
    match &args.config_path {
        Some(path) => info!("Configuration loaded from {}", path.display()),
        None => info!("Using built-in configuration"),
    }

    check_prerequisites(&config);

    // Held until main returns; removes the file on drop
    let _pid_file = if config.pid_file.enabled {
        let pid_file = PidFile::acquire(&config.pid_file.path, ya_proxy::PROGRAM_NAME)
            .context("Cannot start")?;
        info!("PID {} recorded in {}", pid_file.pid(), pid_file.path().display());
        Some(pid_file)
    } else {
        None
    };

    let bridge = Bridge::bind(&config.listen, &config.connection)
        .context("Failed to create listener")?;
    let handle = bridge.handle();
    let stats = bridge.stats();

    info!(
        "ya-proxy ready on {} (connect timeout {}ms, half-close linger {}s)",
        bridge.local_addr(),
        config.connection.connect_timeout_ms,
        config.connection.half_close_timeout_secs
    );
    info!(
        "Startup complete in {:.2}ms",
        start_time.elapsed().as_secs_f64() * 1000.0
    );

    let mut accept_task = tokio::spawn(bridge.run());

    let finished = tokio::select! {
        result = &mut accept_task => Some(result),
        _ = signal::ctrl_c() => {
            info!("Received SIGINT, initiating shutdown...");
            None
        }
        _ = wait_for_sigterm() => {
            info!("Received SIGTERM, initiating shutdown...");
            None
        }
    };

    info!("Shutting down...");

    // Stop accepting new connections; the loop closes the listener on return
    handle.stop();
    let accept_result = match finished {
        Some(result) => result,
        None => accept_task.await,
    }
    .context("Accept loop task failed")?;

    let stats = stats.snapshot();
    info!(
        "Final stats: {} total connections, {} completed, {} errored, {} still active",
        stats.total_accepted, stats.completed, stats.errored, stats.active
    );
    info!(
        "Failures: {} without original destination, {} dial failures, {} copy aborts, {} transient accept errors",
        stats.no_original_dst, stats.dial_failures, stats.copy_aborts, stats.transient_accept_errors
    );
    info!(
        "Transferred: {} bytes client->upstream, {} bytes upstream->client",
        stats.bytes_forward, stats.bytes_reverse
    );

    info!("Shutdown complete");

    accept_result.context("Accept loop error")
}

/// Wait for SIGTERM signal
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
