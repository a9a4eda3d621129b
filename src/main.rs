use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sshdeck::config::{self, HostProfile};
use sshdeck::ssh::commands::{self as ssh_commands, CredentialOverrides};
use std::io::Read;
use std::path::PathBuf;

/// Environment variable read for password-auth hosts
const PASSWORD_ENV: &str = "SSHDECK_PASSWORD";

#[derive(Parser)]
#[command(name = "sshdeck", version, about = "SSH host profiles and sessions")]
struct Arguments {
    /// Config directory (defaults to the platform config dir)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List host profiles, most recently used first
    Hosts {
        #[arg(long)]
        tag: Option<String>,
        /// Only the five most recently used
        #[arg(long, conflicts_with = "tag")]
        recent: bool,
    },
    /// Import `Host` stanzas from an OpenSSH config file (`-` for stdin)
    Import { file: String },
    /// Print host profiles as OpenSSH config
    Export {
        #[arg(long)]
        host: Option<String>,
    },
    /// Copy a host profile
    Duplicate { id: String },
    /// Delete a host profile
    Remove { id: String },
    /// Run a command on a saved host
    Exec {
        host_id: String,
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Arguments::parse();
    let config_dir = match args.config_dir {
        Some(dir) => dir,
        None => config::get_config_dir()?,
    };
    let state = sshdeck::create_app(&config_dir)
        .with_context(|| format!("failed to load config from {}", config_dir.display()))?;

    match args.command {
        Command::Hosts { tag, recent } => {
            let hosts: Vec<HostProfile> = {
                let registry = state.hosts.read();
                let view = match (&tag, recent) {
                    (Some(tag), _) => registry.hosts_by_tag(tag),
                    (None, true) => registry.recent_hosts(),
                    (None, false) => registry.sorted_hosts(),
                };
                view.into_iter().cloned().collect()
            };
            for host in &hosts {
                print_host(host);
            }
        }
        Command::Import { file } => {
            let content = if file == "-" {
                let mut buf = String::new();
                std::io::stdin().read_to_string(&mut buf)?;
                buf
            } else {
                std::fs::read_to_string(&file).with_context(|| format!("failed to read {}", file))?
            };
            let count = config::commands::import_ssh_config(&state, &content)?;
            println!("Imported {} host(s)", count);
        }
        Command::Export { host } => {
            let text = match host {
                Some(id) => {
                    let text = config::commands::export_host(&state, &id);
                    if text.is_empty() {
                        bail!("host {} not found", id);
                    }
                    text
                }
                None => config::commands::export_ssh_config(&state),
            };
            print!("{}", text);
        }
        Command::Duplicate { id } => {
            let new_id = config::commands::duplicate_host(&state, &id)?;
            println!("{}", new_id);
        }
        Command::Remove { id } => {
            config::commands::get_host(&state, &id)?;
            config::commands::delete_host(&state, &id)?;
            println!("Removed {}", id);
        }
        Command::Exec { host_id, command } => {
            let overrides = CredentialOverrides {
                password: std::env::var(PASSWORD_ENV).ok(),
                ..Default::default()
            };
            let connection = ssh_commands::connect_profile(&state, &host_id, overrides).await?;
            let Some(session_id) = connection.session_id.filter(|_| connection.success) else {
                bail!(
                    "connection to {} failed: {}",
                    connection.host,
                    connection.error.unwrap_or_default()
                );
            };

            let result = ssh_commands::execute_command(&state, &session_id, &command.join(" ")).await;
            if let Err(e) = ssh_commands::disconnect(&state, &session_id).await {
                tracing::warn!("Disconnect failed: {}", e);
            }
            match result.output {
                Some(output) if result.success => print!("{}", output),
                _ => bail!("command failed: {}", result.error.unwrap_or_default()),
            }
        }
    }

    Ok(())
}

fn print_host(host: &HostProfile) {
    let tags = if host.tags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", host.tags.join(", "))
    };
    let last_used = host
        .last_used
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "never".to_string());
    println!(
        "{}  {}  {}@{}:{}  last used {}{}",
        host.id, host.name, host.username, host.hostname, host.port, last_used, tags
    );
}
