// DbgRPC - Remote Debugger Protocol Engine
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! DbgRPC command-line client
//!
//! Connects to a remote debugger server, runs one request and disconnects.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use eyre::Result;

mod cmd;
mod host;

use cmd::{dump_memory, list_processes, remote_exec, show_memory_map};

/// Command-line interface
#[derive(Debug, Parser)]
#[command(name = "dbgrpc")]
#[command(about = "Remote Debugger Protocol client - talk to a remote debugger server")]
#[command(version)]
pub struct Cli {
    /// Debugger server, `host` or `host:port`
    #[arg(long, env = "DBGRPC_HOST")]
    pub host: Option<String>,

    /// Server port, used when the host does not name one
    #[arg(long)]
    pub port: Option<u16>,

    /// Server password
    #[arg(long, env = "DBGRPC_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Configuration file (default: ~/.dbgrpc.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Receive timeout in milliseconds, 0 waits forever
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Also write a log file to the temp directory
    #[arg(long)]
    pub log_file: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List the processes the server can attach to
    Processes,
    /// Show the memory map of the debuggee
    MemoryMap,
    /// Read debuggee memory and print a hex dump
    ReadMemory {
        /// Start address, decimal or 0x-prefixed hex
        #[arg(value_parser = cmd::parse_address)]
        ea: u64,
        /// Number of bytes to read
        size: usize,
    },
    /// Run a command on the server machine
    Rexec {
        /// Command line to execute
        cmdline: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    dbgrpc_common::logging::init_logging("dbgrpc", cli.log_file)?;

    match &cli.command {
        Commands::Processes => list_processes(&cli).await,
        Commands::MemoryMap => show_memory_map(&cli).await,
        Commands::ReadMemory { ea, size } => dump_memory(&cli, *ea, *size).await,
        Commands::Rexec { cmdline } => remote_exec(&cli, cmdline).await,
    }
}
