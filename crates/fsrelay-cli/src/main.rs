#![deny(unsafe_code)]

//! fsrelay CLI: run the file server or send it requests.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use fsrelay_config::AppConfig;
use fsrelay_core::{Daemon, FsClient, ShutdownReason};

/// fsrelay: a small TCP file-operation server.
#[derive(Parser)]
#[command(name = "fsrelay", version = fsrelay_core::build_info::VERSION, long_version = long_version(), about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "fsrelay.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the file server in the foreground.
    Serve {
        /// Write the process ID to this file while running.
        #[arg(long)]
        pid: Option<PathBuf>,
    },

    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },

    /// Create or overwrite a remote file.
    Put(WriteArgs),

    /// Overwrite a remote file.
    Modify(WriteArgs),

    /// Append to a remote file.
    Append(WriteArgs),

    /// Remove a remote file.
    Rm(PathArgs),

    /// Create a remote directory and its parents.
    Mkdir(PathArgs),

    /// Remove a remote directory tree.
    Rmdir(PathArgs),

    /// Remove everything inside a remote directory.
    Clear(PathArgs),

    /// Copy a remote file or directory.
    Cp(MoveArgs),

    /// Rename a remote file or directory.
    Mv(MoveArgs),
}

/// Overrides for the `[client]` section.
#[derive(Args)]
struct Remote {
    /// Server host.
    #[arg(long)]
    host: Option<String>,

    /// Server port.
    #[arg(long)]
    port: Option<u16>,

    /// Shared secret.
    #[arg(long)]
    password: Option<String>,
}

#[derive(Args)]
struct WriteArgs {
    /// Absolute path on the server.
    remote: String,

    /// Local file to send.
    #[arg(long, conflicts_with = "data")]
    file: Option<PathBuf>,

    /// Literal content to send.
    #[arg(long)]
    data: Option<String>,

    #[command(flatten)]
    remote_opts: Remote,
}

#[derive(Args)]
struct PathArgs {
    /// Absolute path on the server.
    remote: String,

    #[command(flatten)]
    remote_opts: Remote,
}

#[derive(Args)]
struct MoveArgs {
    /// Source path on the server.
    from: String,

    /// Destination path on the server.
    to: String,

    #[command(flatten)]
    remote_opts: Remote,
}

fn long_version() -> &'static str {
    Box::leak(fsrelay_core::build_info::version_string().into_boxed_str())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { pid } => cmd_serve(&cli.config, cli.verbose, pid.as_deref()).await,
        Commands::Config { show } => cmd_config(&cli.config, show).await,
        command => cmd_client(&cli.config, cli.verbose, command).await,
    }
}

async fn cmd_serve(config_path: &Path, verbose: u8, pid: Option<&Path>) -> Result<()> {
    let config = AppConfig::load(config_path)
        .await
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    fsrelay_core::logging::init(&config.logging, verbose)?;

    let _pid_file = pid.map(PidFile::create).transpose()?;

    let mut config = config;
    loop {
        let daemon = Daemon::new(config);
        match daemon.run().await? {
            ShutdownReason::Terminate => break,
            ShutdownReason::Reload => {
                info!(path = %config_path.display(), "reloading configuration");
                config = match AppConfig::load(config_path).await {
                    Ok(reloaded) => reloaded,
                    Err(e) => {
                        warn!(error = %e, "reload failed, keeping previous configuration");
                        daemon.config().clone()
                    }
                };
            }
        }
    }

    info!("fsrelay exited");
    Ok(())
}

async fn cmd_config(config_path: &Path, show: bool) -> Result<()> {
    let config = load_config(config_path).await?;
    if show {
        let toml_str = toml::to_string_pretty(&config).context("failed to render configuration")?;
        println!("{toml_str}");
    } else {
        println!("Configuration at '{}' is valid.", config_path.display());
    }
    Ok(())
}

async fn cmd_client(config_path: &Path, verbose: u8, command: Commands) -> Result<()> {
    let config = load_config(config_path).await?;
    fsrelay_core::logging::init(&config.logging, verbose)?;

    let remote = match &command {
        Commands::Put(a) | Commands::Modify(a) | Commands::Append(a) => &a.remote_opts,
        Commands::Rm(a) | Commands::Mkdir(a) | Commands::Rmdir(a) | Commands::Clear(a) => {
            &a.remote_opts
        }
        Commands::Cp(a) | Commands::Mv(a) => &a.remote_opts,
        Commands::Serve { .. } | Commands::Config { .. } => bail!("not a client command"),
    };

    let mut client_config = config.client.clone();
    if let Some(host) = &remote.host {
        client_config.host = host.clone();
    }
    if let Some(port) = remote.port {
        client_config.port = port;
    }
    if let Some(password) = &remote.password {
        client_config.password = password.clone();
    }
    // One request needs one connection.
    client_config.min_idle = 0;

    let client = FsClient::from_config(&client_config).await?;
    match &command {
        Commands::Put(a) => client.write_file(&a.remote, &read_body(a).await?).await?,
        Commands::Modify(a) => client.modify_file(&a.remote, &read_body(a).await?).await?,
        Commands::Append(a) => client.append_file(&a.remote, &read_body(a).await?).await?,
        Commands::Rm(a) => client.remove_file(&a.remote).await?,
        Commands::Mkdir(a) => client.create_dir(&a.remote).await?,
        Commands::Rmdir(a) => client.remove_dir(&a.remote).await?,
        Commands::Clear(a) => client.clear_dir(&a.remote).await?,
        Commands::Cp(a) => client.copy(&a.from, &a.to).await?,
        Commands::Mv(a) => client.rename(&a.from, &a.to).await?,
        Commands::Serve { .. } | Commands::Config { .. } => {}
    }
    client.close();
    println!("success");
    Ok(())
}

async fn read_body(args: &WriteArgs) -> Result<Vec<u8>> {
    match (&args.file, &args.data) {
        (Some(path), _) => tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display())),
        (None, Some(data)) => Ok(data.clone().into_bytes()),
        (None, None) => Ok(Vec::new()),
    }
}

async fn load_config(path: &Path) -> Result<AppConfig> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        AppConfig::load(path)
            .await
            .with_context(|| format!("failed to load {}", path.display()))
    } else {
        info!(path = %path.display(), "Config file not found, using defaults");
        Ok(AppConfig::default())
    }
}

/// Holds the PID file for the life of the process.
struct PidFile {
    path: PathBuf,
}

impl PidFile {
    fn create(path: &Path) -> Result<Self> {
        std::fs::write(path, format!("{}\n", std::process::id()))
            .with_context(|| format!("failed to write pid file {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove pid file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_copy() {
        let cli = Cli::try_parse_from(["fsrelay", "cp", "/data/a", "/data/b", "--port", "9000"]).unwrap();
        let Commands::Cp(args) = cli.command else {
            panic!("expected cp");
        };
        assert_eq!(args.from, "/data/a");
        assert_eq!(args.to, "/data/b");
        assert_eq!(args.remote_opts.port, Some(9000));
    }

    #[test]
    fn test_put_file_and_data_conflict() {
        let result = Cli::try_parse_from(["fsrelay", "put", "/data/a", "--file", "x", "--data", "y"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_pid_file_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fsrelay.pid");
        {
            let _pid = PidFile::create(&path).unwrap();
            let content = std::fs::read_to_string(&path).unwrap();
            assert_eq!(content.trim(), std::process::id().to_string());
        }
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_read_body_from_data() {
        let cli = Cli::try_parse_from(["fsrelay", "put", "/data/a", "--data", "hello"]).unwrap();
        let Commands::Put(args) = cli.command else {
            panic!("expected put");
        };
        assert_eq!(read_body(&args).await.unwrap(), b"hello");
    }
}
