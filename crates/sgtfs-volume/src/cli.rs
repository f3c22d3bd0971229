//! `sgt-volume` command line: the `serve` entry point and client commands.

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;

use sgtfs_meta::{Node, VirtualPath};
use sgtfs_transport::{HttpClient, RemoteClient};

use crate::config::VolumeConfig;

/// `sgt-volume` command line.
#[derive(Parser)]
#[command(name = "sgt-volume")]
#[command(about = "sgtfs federated volume node", long_about = None)]
pub struct Cli {
    /// Volume server queried by the client commands
    #[arg(short, long, default_value = "http://localhost:7600", env = "SGT_VOLUME_SERVER")]
    pub server: String,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Run a volume node
    Serve {
        /// Configuration file (`.toml` or `.json`)
        #[arg(short, long, default_value = "/etc/sgtfs/volume.toml")]
        config: PathBuf,
    },
    /// Print an example configuration
    DefaultConfig,
    /// Show the server's local cluster roster
    Cluster,
    /// List a directory
    Ls {
        /// Virtual path, `/cluster/dir` or `sgt://cluster/dir`
        path: String,
    },
    /// Show metadata of one object
    Stat {
        /// Virtual path
        path: String,
    },
    /// Show the recipe of a file
    Recipe {
        /// Virtual path
        path: String,
    },
    /// Fetch one chunk by content hash
    Chunk {
        /// Cluster owning the chunk
        cluster: String,
        /// Hex content hash
        hash: String,
        /// Write the bytes here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

impl Cli {
    /// Runs a client subcommand against `--server`. `serve` is handled by the
    /// binary itself.
    pub async fn run(&self) -> Result<()> {
        let client = HttpClient::new(&Node::new("cli", &self.server), reqwest::Client::new());
        match &self.command {
            Command::Serve { .. } => anyhow::bail!("serve is not a client command"),
            Command::DefaultConfig => {
                print!("{}", VolumeConfig::template()?);
                Ok(())
            }
            Command::Cluster => print_json(&client.get_cluster().await?),
            Command::Ls { path } => {
                let path = VirtualPath::parse(path)?;
                let mut entries = client.list_metadata(&path).await.or_else(|e| {
                    if e.is_not_found() {
                        Ok(Vec::new())
                    } else {
                        Err(e)
                    }
                })?;
                entries.sort_by(|a, b| a.path.cmp(&b.path));
                for entry in entries {
                    let kind = if entry.is_directory { "d" } else { "-" };
                    println!("{kind} {:>12} {}", entry.size, entry.path.name());
                }
                Ok(())
            }
            Command::Stat { path } => {
                print_json(&client.get_metadata(&VirtualPath::parse(path)?).await?)
            }
            Command::Recipe { path } => {
                print_json(&client.get_recipe(&VirtualPath::parse(path)?).await?)
            }
            Command::Chunk {
                cluster,
                hash,
                output,
            } => {
                let bytes = client.get_data_chunk(cluster, hash).await?;
                match output {
                    Some(file) => tokio::fs::write(file, &bytes).await?,
                    None => {
                        use std::io::Write;
                        std::io::stdout().write_all(&bytes)?;
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subcommands() {
        let cli = Cli::parse_from(["sgt-volume", "serve", "--config", "/tmp/v.toml"]);
        let expected = PathBuf::from("/tmp/v.toml");
        assert!(matches!(cli.command, Command::Serve { ref config } if config == &expected));

        let cli = Cli::parse_from(["sgt-volume", "-s", "http://e1:7600", "ls", "/east/data"]);
        assert_eq!(cli.server, "http://e1:7600");
        assert!(matches!(cli.command, Command::Ls { ref path } if path == "/east/data"));

        let cli = Cli::parse_from(["sgt-volume", "chunk", "east", "abcd", "-o", "out.bin"]);
        assert!(matches!(cli.command, Command::Chunk { ref output, .. } if output.is_some()));
    }
}
