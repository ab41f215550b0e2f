use anyhow::{anyhow, Result};
use clap::{value_parser, Arg, ArgAction, Command};
use config::{Config, File as ConfigFile};
use roster_registry::MemoryRegistry;
use roster_rpc::{start_server, AppState};
use std::fs;
use std::net::{IpAddr, TcpListener};
use std::path::{Path, PathBuf};
use std::process::Command as StdCommand;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod version;

use version::{git_commit_hash, ROSTER_VERSION};

const DEFAULT_CONFIG_PATH: &str = "config/roster.toml";
const DEFAULT_NODE_ID: &str = "roster-node";
const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
const DEFAULT_HTTP_PORT: u16 = 5000;
const DEFAULT_UI_DIST_DIR: &str = "./ui";
const DEFAULT_CONTENT_DELAY_MS: u64 = 1_000;

/// Application configuration
#[derive(Debug, Clone)]
struct AppConfig {
    config_path: Option<PathBuf>,

    // Node identity
    node_id: String,

    // Network
    http_host: String,
    http_port: u16,

    // Form UI
    ui_dist_dir: Option<PathBuf>,

    // Content loader
    content_delay_ms: u64,

    // Logging
    log_level: String,
    log_format: String,

    // Process management
    pid_file: Option<PathBuf>,

    // Development
    dev_mode: bool,
}

impl AppConfig {
    fn load(config_path_override: Option<&str>) -> Result<Self> {
        let resolved_path = if let Some(path) = config_path_override {
            let path = PathBuf::from(path);
            if !path.exists() {
                anyhow::bail!(
                    "Configuration file {} not found (specified via --config)",
                    path.display()
                );
            }
            Some(path)
        } else {
            let path = PathBuf::from(DEFAULT_CONFIG_PATH);
            if path.exists() {
                Some(path)
            } else {
                None
            }
        };

        let mut builder = Config::builder();

        if let Some(path) = &resolved_path {
            builder = builder.add_source(ConfigFile::from(path.as_path()));
        }

        builder = builder.add_source(config::Environment::with_prefix("ROSTER"));

        let config = builder.build()?;

        let dev_mode = get_bool_value(&config, &["DEV_MODE", "node.dev_mode"], false);

        let mut default_http_host = DEFAULT_HTTP_HOST.to_string();
        if dev_mode {
            default_http_host = "0.0.0.0".to_string();
        }

        let ui_dist_dir = get_string_value(&config, &["UI_DIR", "ui.dist_dir"])
            .map(PathBuf::from)
            .or_else(|| {
                let default_path = PathBuf::from(DEFAULT_UI_DIST_DIR);
                if default_path.exists() {
                    Some(default_path)
                } else {
                    None
                }
            });

        Ok(Self {
            config_path: resolved_path,
            node_id: get_string_value(&config, &["NODE_ID", "node.id"])
                .unwrap_or_else(|| DEFAULT_NODE_ID.to_string()),
            http_host: get_string_value(&config, &["HTTP_HOST", "http.host"])
                .unwrap_or(default_http_host),
            http_port: get_string_value(&config, &["HTTP_PORT", "http.port"])
                .unwrap_or_else(|| DEFAULT_HTTP_PORT.to_string())
                .parse()?,
            ui_dist_dir,
            content_delay_ms: get_string_value(&config, &["CONTENT_DELAY_MS", "content.delay_ms"])
                .unwrap_or_else(|| DEFAULT_CONTENT_DELAY_MS.to_string())
                .parse()?,
            log_level: get_string_value(&config, &["LOG_LEVEL", "log.level"])
                .unwrap_or_else(|| "info".to_string()),
            log_format: get_string_value(&config, &["LOG_FORMAT", "log.format"])
                .unwrap_or_else(|| "pretty".to_string()),
            pid_file: get_string_value(&config, &["PID_FILE", "node.pid_file"]).map(PathBuf::from),
            dev_mode,
        })
    }

    fn validate(&self) -> Result<()> {
        if self.node_id.trim().is_empty() {
            anyhow::bail!("NODE_ID must not be empty");
        }
        if self.http_port == 0 {
            anyhow::bail!("HTTP_PORT must be greater than zero");
        }
        if self.log_format != "pretty" && self.log_format != "json" {
            anyhow::bail!("LOG_FORMAT must be 'pretty' or 'json'");
        }
        Ok(())
    }
}

fn get_string_value(config: &Config, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        config
            .get_string(key)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

fn get_bool_value(config: &Config, keys: &[&str], default: bool) -> bool {
    for key in keys {
        if let Ok(value) = config.get_bool(key) {
            return value;
        }
        if let Ok(raw) = config.get_string(key) {
            if let Ok(parsed) = raw.parse::<bool>() {
                return parsed;
            }
        }
    }
    default
}

fn load_config_with_overrides(matches: &clap::ArgMatches) -> Result<AppConfig> {
    let config_path = matches
        .get_one::<String>("config")
        .map(|value| value.as_str());
    let mut config = AppConfig::load(config_path)?;
    apply_overrides(matches, &mut config);

    if config.pid_file.is_none() {
        config.pid_file = Some(PathBuf::from("roster-node.pid"));
    }

    config.validate()?;

    Ok(config)
}

fn apply_overrides(matches: &clap::ArgMatches, config: &mut AppConfig) {
    if let Some(http_host) = matches.get_one::<String>("http-host") {
        config.http_host = http_host.clone();
    }

    if let Some(http_port) = matches.get_one::<u16>("http-port") {
        config.http_port = *http_port;
    }

    if let Some(ui_dir) = matches.get_one::<String>("ui-dir") {
        config.ui_dist_dir = Some(PathBuf::from(ui_dir));
    }

    if let Some(delay) = matches.get_one::<u64>("content-delay-ms") {
        config.content_delay_ms = *delay;
    }

    if let Some(log_level) = matches.get_one::<String>("log-level") {
        config.log_level = log_level.clone();
    }

    if let Some(log_format) = matches.get_one::<String>("log-format") {
        config.log_format = log_format.clone();
    }

    if let Some(pid_file) = matches.get_one::<String>("pid-file") {
        config.pid_file = Some(PathBuf::from(pid_file));
    }

    if matches.get_flag("dev") {
        config.dev_mode = true;
        config.log_level = "debug".to_string();
        config.log_format = "pretty".to_string();
        if config.http_host == "127.0.0.1" {
            config.http_host = "0.0.0.0".to_string();
        }
    }
}

struct PidFileGuard {
    path: PathBuf,
}

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn write_pid_file(path: &Path) -> Result<PidFileGuard> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    if path.exists() {
        let existing = fs::read_to_string(path).unwrap_or_default();
        anyhow::bail!(
            "PID file {} already exists (contents: {}); stop the running server or remove the file",
            path.display(),
            existing.trim()
        );
    }

    fs::write(path, std::process::id().to_string())?;
    Ok(PidFileGuard {
        path: path.to_path_buf(),
    })
}

fn stop_node(config: &AppConfig) -> Result<()> {
    let pid_path = config
        .pid_file
        .clone()
        .unwrap_or_else(|| PathBuf::from("roster-node.pid"));

    if !pid_path.exists() {
        anyhow::bail!(
            "PID file {} not found; is the server running?",
            pid_path.display()
        );
    }

    let pid_raw = fs::read_to_string(&pid_path)?;
    let pid: i32 = pid_raw
        .trim()
        .parse()
        .map_err(|_| anyhow!("Invalid PID contents in {}", pid_path.display()))?;

    let status = StdCommand::new("kill")
        .arg("-INT")
        .arg(pid.to_string())
        .status()?;

    if status.success() {
        println!("Sent SIGINT to roster-node process {pid}");
        Ok(())
    } else {
        anyhow::bail!(
            "Failed to signal PID {} (exit status: {:?})",
            pid,
            status.code()
        )
    }
}

async fn check_status(config: &AppConfig, health_path: &str) -> Result<()> {
    let mut path = health_path.to_string();
    if !path.starts_with('/') {
        path = format!("/{path}");
    }
    let url = format!("http://{}:{}{}", config.http_host, config.http_port, path);
    let response = reqwest::Client::new().get(&url).send().await?;
    let status = response.status();
    let body = response.text().await?;
    println!("GET {url} -> {status}");
    println!("{body}");
    if status.is_success() {
        Ok(())
    } else {
        anyhow::bail!("Health check failed with status {status}")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let matches = Command::new("roster-node")
        .version(ROSTER_VERSION)
        .about("Roster registration demo server")
        .disable_version_flag(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .global(true),
        )
        .arg(
            Arg::new("dev")
                .long("dev")
                .action(ArgAction::SetTrue)
                .help("Run in development mode")
                .global(true),
        )
        .arg(
            Arg::new("version_flag")
                .short('V')
                .long("version")
                .action(ArgAction::SetTrue)
                .help("Print detailed version information and exit")
                .global(true),
        )
        .arg(
            Arg::new("check")
                .long("check")
                .action(ArgAction::SetTrue)
                .help("Run configuration and environment self-checks, then exit")
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .help("Override the log level")
                .global(true),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .value_parser(["pretty", "json"])
                .help("Select log output format")
                .global(true),
        )
        .arg(
            Arg::new("http-host")
                .long("http-host")
                .value_name("HOST")
                .help("Override HTTP bind host (defaults to config value)")
                .global(true),
        )
        .arg(
            Arg::new("http-port")
                .long("http-port")
                .value_name("PORT")
                .value_parser(value_parser!(u16))
                .help("Override HTTP port")
                .global(true),
        )
        .arg(
            Arg::new("ui-dir")
                .long("ui-dir")
                .value_name("DIR")
                .help("Directory holding the registration form assets")
                .global(true),
        )
        .arg(
            Arg::new("content-delay-ms")
                .long("content-delay-ms")
                .value_name("MS")
                .value_parser(value_parser!(u64))
                .help("Override the simulated content-loader delay")
                .global(true),
        )
        .arg(
            Arg::new("pid-file")
                .long("pid-file")
                .value_name("FILE")
                .help("PID file to use for start/stop coordination")
                .global(true),
        )
        .subcommand(
            Command::new("start").about("Start the Roster server using the provided configuration"),
        )
        .subcommand(
            Command::new("status")
                .about("Check the /health endpoint for a running server")
                .arg(
                    Arg::new("health-path")
                        .long("health-path")
                        .value_name("PATH")
                        .default_value("/health")
                        .help("Health endpoint path to query"),
                ),
        )
        .subcommand(
            Command::new("stop")
                .about("Send a SIGINT to a running server based on its PID file"),
        )
        .get_matches();

    if let Some(status_matches) = matches.subcommand_matches("status") {
        let config = load_config_with_overrides(status_matches)?;
        let health_path = status_matches
            .get_one::<String>("health-path")
            .map(|value| value.as_str())
            .unwrap_or("/health");
        check_status(&config, health_path).await?;
        return Ok(());
    }

    if let Some(stop_matches) = matches.subcommand_matches("stop") {
        let config = load_config_with_overrides(stop_matches)?;
        stop_node(&config)?;
        return Ok(());
    }

    let start_matches = matches.subcommand_matches("start").unwrap_or(&matches);

    let config = load_config_with_overrides(start_matches)?;

    if start_matches.get_flag("version_flag") {
        print_version_info();
        return Ok(());
    }

    if start_matches.get_flag("check") {
        run_self_check(&config)?;
        return Ok(());
    }

    // Initialize logging
    init_logging(&config)?;

    let _pid_guard = if let Some(pid_file) = &config.pid_file {
        Some(write_pid_file(pid_file)?)
    } else {
        None
    };

    info!("Starting roster node: {}", config.node_id);
    if let Some(path) = &config.config_path {
        info!("Config file: {}", path.display());
    } else {
        info!("Config file: (built-in defaults)");
    }
    info!("Development mode: {}", config.dev_mode);

    if !config.dev_mode {
        if let Ok(ip) = config.http_host.parse::<IpAddr>() {
            if ip.is_unspecified() {
                warn!(
                    "HTTP host {} binds to all interfaces outside dev mode; consider setting ROSTER_HTTP_HOST=127.0.0.1 and fronting the API with a reverse proxy or firewall",
                    config.http_host
                );
            }
        }
    }

    match &config.ui_dist_dir {
        Some(dir) => info!("Form UI directory: {}", dir.display()),
        None => warn!("No form UI directory configured; GET / will return 404"),
    }

    // The roster lives in memory only; state is lost on restart.
    let store = Arc::new(MemoryRegistry::new());

    let app_state = AppState {
        store,
        node_id: config.node_id.clone(),
        start_time: Instant::now(),
        content_delay: Duration::from_millis(config.content_delay_ms),
        ui_dist: config.ui_dist_dir.clone(),
        req_count: Arc::new(AtomicUsize::new(0)),
    };

    let http_host = &config.http_host;
    let http_port = config.http_port;
    let addr = format!("{http_host}:{http_port}");
    let addr_clone = addr.clone();
    info!("Starting HTTP server on {}", addr);

    // Start HTTP server in background
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(app_state, &addr_clone).await {
            error!("HTTP server error: {}", e);
        }
    });

    info!("Roster node is ready");
    info!("Registration API available at: http://{}", addr);

    // Keep the server running
    tokio::signal::ctrl_c().await?;
    info!("Shutting down roster node");

    server_handle.abort();

    info!("Roster node shutdown complete");
    Ok(())
}

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    Ok(())
}

fn print_version_info() {
    println!("Roster {} (commit {})", ROSTER_VERSION, git_commit_hash());
}

fn run_self_check(config: &AppConfig) -> Result<()> {
    println!("Running roster node self-check...");
    let mut issues = Vec::new();

    if config.node_id.trim().is_empty() {
        issues.push("NODE_ID must not be empty".to_string());
    }

    if config.http_port == 0 {
        issues.push("HTTP_PORT must be greater than zero".to_string());
    }

    if let Err(err) = ensure_port_available(&config.http_host, config.http_port, "HTTP") {
        issues.push(err);
    }

    if let Some(dir) = &config.ui_dist_dir {
        if !dir.is_dir() {
            issues.push(format!("UI directory {} does not exist", dir.display()));
        } else if !dir.join("index.html").is_file() {
            issues.push(format!("UI directory {} has no index.html", dir.display()));
        }
    }

    if issues.is_empty() {
        println!("OK");
        Ok(())
    } else {
        for issue in &issues {
            eprintln!("- {issue}");
        }
        anyhow::bail!("self-check failed")
    }
}

fn ensure_port_available(host: &str, port: u16, label: &str) -> Result<(), String> {
    let addr = format!("{host}:{port}");
    match TcpListener::bind(&addr) {
        Ok(listener) => drop(listener),
        Err(err) => {
            return Err(format!(
                "{label} port {addr} is not available for binding: {err}"
            ))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn fixture_config() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("config")
            .join("roster.toml")
    }

    #[test]
    fn fixture_config_loads_defaults() {
        let path = fixture_config();
        let config = AppConfig::load(Some(path.to_str().unwrap())).unwrap();

        assert_eq!(config.node_id, "roster-dev");
        assert_eq!(config.http_host, "127.0.0.1");
        assert_eq!(config.http_port, 5000);
        assert_eq!(config.content_delay_ms, 1000);
        assert_eq!(config.log_format, "pretty");
    }

    #[test]
    fn config_file_values_are_honored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.toml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[node]\nid = \"alt-node\"\n\n[http]\nport = 8081\n\n[content]\ndelay_ms = 5"
        )
        .unwrap();

        let config = AppConfig::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.node_id, "alt-node");
        assert_eq!(config.http_port, 8081);
        assert_eq!(config.content_delay_ms, 5);
    }

    #[test]
    fn validate_rejects_blank_node_id() {
        let path = fixture_config();
        let mut config = AppConfig::load(Some(path.to_str().unwrap())).unwrap();
        config.node_id = "   ".to_string();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("NODE_ID"), "unexpected error: {err}");
    }

    #[test]
    fn validate_rejects_unknown_log_format() {
        let path = fixture_config();
        let mut config = AppConfig::load(Some(path.to_str().unwrap())).unwrap();
        config.log_format = "xml".to_string();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("LOG_FORMAT"), "unexpected error: {err}");
    }
}
