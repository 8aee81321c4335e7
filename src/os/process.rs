//! Long-running subprocesses (DHCP client and server)

use crate::address::DhcpServerConfig;
use crate::config::ToolsConfig;
use crate::error::{Error, Result};
use crate::os::{ChildProcess, ProcessExit, ProcessLauncher, ProcessSpec};
use ipnet::Ipv4Net;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// `dhclient` in the foreground for one link
pub fn dhcp_client_spec(tools: &ToolsConfig, interface: &str) -> ProcessSpec {
    ProcessSpec {
        program: tools.dhclient.clone(),
        args: vec![
            "-d".to_string(),
            "-4".to_string(),
            "-pf".to_string(),
            format!("/run/cableguy-dhclient-{}.pid", interface),
            "-lf".to_string(),
            format!("/var/lib/cableguy/dhclient-{}.leases", interface),
            interface.to_string(),
        ],
    }
}

/// `dnsmasq` serving DHCP only, bound to one link
pub fn dhcp_server_spec(
    tools: &ToolsConfig,
    interface: &str,
    server: &DhcpServerConfig,
    subnet: Ipv4Net,
) -> Result<ProcessSpec> {
    let (start, end) = server.lease_range(subnet)?;

    Ok(ProcessSpec {
        program: tools.dnsmasq.clone(),
        args: vec![
            "--no-daemon".to_string(),
            "--conf-file=/dev/null".to_string(),
            "--port=0".to_string(),
            format!("--interface={}", interface),
            "--bind-interfaces".to_string(),
            "--except-interface=lo".to_string(),
            format!(
                "--dhcp-range={},{},{},{}",
                start,
                end,
                subnet.netmask(),
                server.lease_time_secs
            ),
            format!("--dhcp-option=option:router,{}", server.gateway),
            format!("--dhcp-leasefile=/var/lib/cableguy/dnsmasq-{}.leases", interface),
            format!("--pid-file=/run/cableguy-dnsmasq-{}.pid", interface),
        ],
    })
}

/// Spawns real processes with `std::process`
#[derive(Debug, Default)]
pub struct Subprocess;

impl Subprocess {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessLauncher for Subprocess {
    fn launch(&self, spec: &ProcessSpec) -> Result<Box<dyn ChildProcess>> {
        let child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            // Own process group: a terminal Ctrl+C reaches us, not the children
            .process_group(0)
            .spawn()
            .map_err(|e| Error::CommandFailed {
                command: spec.command_line(),
                message: e.to_string(),
            })?;

        Ok(Box::new(SpawnedChild { child }))
    }
}

struct SpawnedChild {
    child: Child,
}

impl ChildProcess for SpawnedChild {
    fn pid(&self) -> u32 {
        self.child.id()
    }

    fn try_wait(&mut self) -> Result<Option<ProcessExit>> {
        let status = self.child.try_wait()?;
        Ok(status.map(|status| match (status.code(), status.signal()) {
            (Some(code), _) => ProcessExit::Code(code),
            (None, Some(sig)) => ProcessExit::Signal(sig),
            (None, None) => ProcessExit::Code(-1),
        }))
    }

    fn terminate(&mut self, grace: Duration) -> Result<()> {
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }

        let pid = self.child.id();
        match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(source) => return Err(Error::Signal { pid, source }),
        }

        let start = Instant::now();
        while start.elapsed() < grace {
            if self.child.try_wait()?.is_some() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(50));
        }

        // Still alive after the grace period
        self.child.kill()?;
        self.child.wait()?;
        Ok(())
    }
}
