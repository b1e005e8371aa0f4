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

//! Memory map and memory dump commands

use dbgrpc_common::types::{MemoryInfo, SEGPERM_EXEC, SEGPERM_READ, SEGPERM_WRITE};
use dbgrpc_engine::MemoryLayout;
use eyre::{eyre, Result};
use tracing::{info, warn};

use super::session;
use crate::Cli;

const DUMP_WIDTH: usize = 16;

/// Parse an address given as decimal or `0x`-prefixed hex.
pub fn parse_address(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(digits) => u64::from_str_radix(digits, 16),
        None => s.parse(),
    };
    parsed.map_err(|_| format!("invalid address: {s}"))
}

/// Print the memory areas of the debuggee
pub async fn show_memory_map(cli: &Cli) -> Result<()> {
    let mut debmod = session::open(cli).await?;
    let result = debmod.get_memory_info().await;
    session::close(&mut debmod).await?;

    match result? {
        MemoryLayout::Areas(areas) => {
            info!("Server reported {} memory areas", areas.len());
            for area in &areas {
                println!("{}", format_area(area));
            }
        }
        MemoryLayout::UseDatabaseSegments => {
            println!("The server cannot enumerate memory; use the database segmentation");
        }
        MemoryLayout::Unavailable => {
            println!("No memory information is available (is a process running?)");
        }
    }
    Ok(())
}

/// Read `size` bytes at `ea` and print them as a hex dump
pub async fn dump_memory(cli: &Cli, ea: u64, size: usize) -> Result<()> {
    if size == 0 {
        return Err(eyre!("nothing to read"));
    }

    let mut debmod = session::open(cli).await?;
    let mut buf = vec![0u8; size];
    let result = debmod.read_memory(ea, &mut buf).await;
    session::close(&mut debmod).await?;

    let read = result?;
    if read < size {
        warn!("Partial read: got {} of {} bytes at {:#x}", read, size, ea);
    }
    for line in hex_dump(ea, &buf[..read]) {
        println!("{line}");
    }
    Ok(())
}

fn format_area(area: &MemoryInfo) -> String {
    let perm = |bit: u8, c: char| if area.perm & bit != 0 { c } else { '-' };
    let bits = match area.bitness {
        0 => 16,
        1 => 32,
        _ => 64,
    };
    format!(
        "{:016x}-{:016x} {}{}{} {:>2}  {:<8} {}",
        area.start,
        area.end,
        perm(SEGPERM_READ, 'r'),
        perm(SEGPERM_WRITE, 'w'),
        perm(SEGPERM_EXEC, 'x'),
        bits,
        area.sclass,
        area.name
    )
}

fn hex_dump(ea: u64, bytes: &[u8]) -> Vec<String> {
    bytes
        .chunks(DUMP_WIDTH)
        .enumerate()
        .map(|(i, chunk)| {
            let printable: String = chunk
                .iter()
                .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
                .collect();
            format!(
                "{:016x}  {:<width$}  {}",
                ea.wrapping_add((i * DUMP_WIDTH) as u64),
                hex::encode(chunk),
                printable,
                width = DUMP_WIDTH * 2
            )
        })
        .collect()
}
