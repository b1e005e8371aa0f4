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

//! Process listing and remote command execution

use eyre::Result;
use tracing::info;

use super::session;
use crate::Cli;

/// Print the processes the server can attach to
pub async fn list_processes(cli: &Cli) -> Result<()> {
    let mut debmod = session::open(cli).await?;
    let result = debmod.get_processes().await;
    session::close(&mut debmod).await?;

    let processes = result?;
    info!("Server reported {} processes", processes.len());
    println!("{:>8}  NAME", "PID");
    for process in &processes {
        println!("{:>8}  {}", process.pid, process.name);
    }
    Ok(())
}

/// Run `cmdline` on the server and print its exit code
pub async fn remote_exec(cli: &Cli, cmdline: &str) -> Result<()> {
    let mut debmod = session::open(cli).await?;
    let result = debmod.rexec(cmdline).await;
    session::close(&mut debmod).await?;

    let code = result?;
    println!("exit code: {code}");
    Ok(())
}
