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

//! Opening and closing a command-line session

use dbgrpc_engine::{rpc::utils::parse_endpoint, HostHandle, RpcDebmod, SessionConfig};
use eyre::{Result, WrapErr};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::{host::ConsoleHost, Cli};

/// Settings from the config file with command-line overrides applied.
pub fn resolve_config(cli: &Cli) -> Result<SessionConfig> {
    let mut config = match &cli.config {
        Some(path) => SessionConfig::load_from(path)?,
        None => SessionConfig::load()?,
    };

    if let Some(host) = &cli.host {
        let (name, port) = parse_endpoint(host, cli.port.unwrap_or(config.port))?;
        config.host = name;
        config.port = port;
    } else if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(password) = &cli.password {
        config.password = password.clone();
    }
    if let Some(timeout) = cli.timeout_ms {
        config.recv_timeout_ms = timeout;
    }
    Ok(config)
}

/// Connect, log in and initialize the remote debugger module.
pub async fn open(cli: &Cli) -> Result<RpcDebmod<TcpStream>> {
    let config = resolve_config(cli)?;
    let (host, port, password) = (config.host.clone(), config.port, config.password.clone());

    let mut debmod = RpcDebmod::new(config, HostHandle::spawn(ConsoleHost::default()));
    debmod
        .open_remote(&host, port, &password)
        .await
        .wrap_err_with(|| format!("Failed to open a session with {host}:{port}"))?;

    let flags2 = debmod.init().await.wrap_err("Failed to initialize the remote debugger")?;
    debug!("remote debugger initialized, flags2 = {flags2:#x}");
    info!("Session with {}:{} is ready", host, port);
    Ok(debmod)
}

/// Terminate the debugger module and say goodbye to the server.
pub async fn close(debmod: &mut RpcDebmod<TcpStream>) -> Result<()> {
    if let Err(e) = debmod.term().await {
        warn!("Failed to terminate the remote debugger: {}", e);
    }
    debmod.close_remote().await?;
    debug!("session closed");
    Ok(())
}
