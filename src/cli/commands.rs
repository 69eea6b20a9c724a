//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - caps: decode the host capability mask
//! - serve: run the demo echo server
//! - call: invoke the demo echo method
//! - listen: dispatch host envelopes read from stdin
//! - connect: drive the connection lifecycle against an endpoint

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Voxbridge - realtime transport and host-bridge toolkit
#[derive(Parser, Debug)]
#[command(name = "voxbridge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the host capability flags
    Caps {
        /// Mask to decode (decimal, 0x or 0b); defaults to config, then environment
        #[arg(short, long)]
        mask: Option<String>,
    },

    /// Serve the demo echo method
    Serve {
        /// Endpoint to listen on (tcp://host:port or unix:///path)
        #[arg(short, long)]
        endpoint: Option<String>,
    },

    /// Invoke the demo echo method and print each response
    Call {
        /// Endpoint to call
        #[arg(short, long)]
        endpoint: Option<String>,

        /// Text to echo
        #[arg(short, long, default_value = "hello")]
        text: String,

        /// Number of responses to request
        #[arg(short = 'n', long, default_value_t = 3)]
        count: u32,

        /// Pause between responses in milliseconds
        #[arg(long, default_value_t = 0)]
        interval_ms: u64,

        /// Deadline for the whole call in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Read host envelopes from stdin and dispatch them
    Listen {
        /// Event key to register a listener for (repeatable)
        #[arg(short, long = "key", required = true)]
        keys: Vec<String>,
    },

    /// Connect with retries and report every state change
    Connect {
        /// Endpoint to connect to
        #[arg(short, long)]
        endpoint: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["voxbridge"]).is_err());
    }

    #[test]
    fn test_cli_verbose_flag() {
        let cli = Cli::try_parse_from(["voxbridge", "-v", "caps"]).unwrap();
        assert!(cli.is_verbose());
    }

    #[test]
    fn test_cli_config_option() {
        let cli = Cli::try_parse_from(["voxbridge", "caps", "-c", "/path/to/voxbridge.yml"]).unwrap();
        assert_eq!(cli.config.as_ref(), Some(&PathBuf::from("/path/to/voxbridge.yml")));
    }

    #[test]
    fn test_caps_mask() {
        let cli = Cli::try_parse_from(["voxbridge", "caps", "--mask", "0x1c"]).unwrap();
        match cli.command {
            Commands::Caps { mask } => assert_eq!(mask.as_deref(), Some("0x1c")),
            _ => panic!("Expected caps command"),
        }
    }

    #[test]
    fn test_call_defaults() {
        let cli = Cli::try_parse_from(["voxbridge", "call"]).unwrap();
        match cli.command {
            Commands::Call {
                endpoint,
                text,
                count,
                interval_ms,
                timeout_ms,
            } => {
                assert!(endpoint.is_none());
                assert_eq!(text, "hello");
                assert_eq!(count, 3);
                assert_eq!(interval_ms, 0);
                assert!(timeout_ms.is_none());
            }
            _ => panic!("Expected call command"),
        }
    }

    #[test]
    fn test_call_with_args() {
        let cli = Cli::try_parse_from([
            "voxbridge",
            "call",
            "-e",
            "unix:///tmp/vox.sock",
            "-t",
            "ping",
            "-n",
            "5",
            "--timeout-ms",
            "250",
        ])
        .unwrap();
        match cli.command {
            Commands::Call {
                endpoint,
                text,
                count,
                timeout_ms,
                ..
            } => {
                assert_eq!(endpoint.as_deref(), Some("unix:///tmp/vox.sock"));
                assert_eq!(text, "ping");
                assert_eq!(count, 5);
                assert_eq!(timeout_ms, Some(250));
            }
            _ => panic!("Expected call command"),
        }
    }

    #[test]
    fn test_listen_requires_key() {
        assert!(Cli::try_parse_from(["voxbridge", "listen"]).is_err());

        let cli = Cli::try_parse_from(["voxbridge", "listen", "-k", "mute", "--key", "deafen"]).unwrap();
        match cli.command {
            Commands::Listen { keys } => assert_eq!(keys, vec!["mute", "deafen"]),
            _ => panic!("Expected listen command"),
        }
    }

    #[test]
    fn test_serve_and_connect_endpoint() {
        let cli = Cli::try_parse_from(["voxbridge", "serve", "-e", "tcp://0.0.0.0:9000"]).unwrap();
        assert!(matches!(cli.command, Commands::Serve { endpoint: Some(_) }));

        let cli = Cli::try_parse_from(["voxbridge", "connect"]).unwrap();
        assert!(matches!(cli.command, Commands::Connect { endpoint: None }));
    }

    #[test]
    fn test_cli_debug_assert() {
        Cli::command().debug_assert();
    }
}
