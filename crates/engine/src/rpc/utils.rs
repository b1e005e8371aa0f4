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

//! Endpoint parsing helpers.

use eyre::{eyre, Result};

/// Default port of a remote debugger server.
pub const DEFAULT_PORT: u16 = 23946;

/// Split `host[:port]` into its parts, using `default_port` when absent.
///
/// Bracketed IPv6 literals (`[::1]:23946`) are accepted.
pub fn parse_endpoint(endpoint: &str, default_port: u16) -> Result<(String, u16)> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return Err(eyre!("empty server address"));
    }

    if let Some(rest) = endpoint.strip_prefix('[') {
        let (host, tail) =
            rest.split_once(']').ok_or_else(|| eyre!("unterminated IPv6 literal in '{endpoint}'"))?;
        let port = match tail.strip_prefix(':') {
            Some(port) => parse_port(port)?,
            None if tail.is_empty() => default_port,
            None => return Err(eyre!("unexpected '{tail}' after IPv6 literal")),
        };
        return Ok((host.to_string(), port));
    }

    match endpoint.rsplit_once(':') {
        // More than one colon without brackets is a bare IPv6 address.
        Some((host, _)) if host.contains(':') => Ok((endpoint.to_string(), default_port)),
        Some((host, port)) => Ok((host.to_string(), parse_port(port)?)),
        None => Ok((endpoint.to_string(), default_port)),
    }
}

fn parse_port(port: &str) -> Result<u16> {
    port.parse().map_err(|e| eyre!("invalid port '{port}': {e}"))
}
