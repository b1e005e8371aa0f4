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

//! Session configuration.
//!
//! Settings are read from `~/.dbgrpc.toml`. Missing keys take their defaults,
//! and a missing file yields the default configuration.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::rpc::{engine::DEFAULT_MAX_INTERRUPTS, transport::DEFAULT_MAX_PACKET_SIZE, utils::DEFAULT_PORT};

/// Debugger interface version this client speaks.
pub const DEFAULT_PROTOCOL_VERSION: u32 = 27;

/// Connection and session settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Server host name or address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Password sent during the handshake
    pub password: String,
    /// How long to wait for any packet, in milliseconds. Zero waits forever.
    pub recv_timeout_ms: u64,
    /// Largest frame accepted from the server
    pub max_packet_size: usize,
    /// Upper bound on server requests serviced while waiting for one reply
    pub max_interrupts_per_request: usize,
    /// Interface version the server must announce
    pub protocol_version: u32,
    /// Debugger kind the server must announce
    pub debugger_id: u32,
    /// Smallest address size, in bytes, the server must support
    pub expected_address_size: u32,
    /// Flags sent with `init`
    pub debugger_flags: u32,
    /// Local copy of the server stub, offered when the server asks to update it
    pub stub_path: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            password: String::new(),
            recv_timeout_ms: 10_000,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            max_interrupts_per_request: DEFAULT_MAX_INTERRUPTS,
            protocol_version: DEFAULT_PROTOCOL_VERSION,
            debugger_id: 0,
            expected_address_size: 8,
            debugger_flags: 0,
            stub_path: None,
        }
    }
}

impl SessionConfig {
    /// Get the config file path (~/.dbgrpc.toml)
    pub fn config_path() -> Result<PathBuf> {
        let home =
            dirs::home_dir().ok_or_else(|| eyre::eyre!("Unable to determine home directory"))?;
        Ok(home.join(".dbgrpc.toml"))
    }

    /// Load the configuration from the default location.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if !path.exists() {
            debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load the configuration from an explicit file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path:?}"))?;
        let config: Self =
            toml::from_str(&content).with_context(|| "Failed to parse config file as TOML")?;
        debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save the configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).with_context(|| "Failed to serialize config to TOML")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {path:?}"))?;
        debug!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Receive timeout, `None` when waiting forever.
    pub fn recv_timeout(&self) -> Option<Duration> {
        (self.recv_timeout_ms > 0).then(|| Duration::from_millis(self.recv_timeout_ms))
    }
}
