//! In-memory platform for exercising the engine without touching the host

use crate::config::ToolsConfig;
use crate::error::{Error, Result};
use crate::os::{
    BoundAddress, ChildProcess, Link, LinkControl, LinkFlags, Platform, ProcessExit,
    ProcessLauncher, ProcessSpec,
};
use crate::resolver::LivenessProbe;
use ipnet::Ipv4Net;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct LinksState {
    links: Vec<Link>,
    adds: usize,
    removes: usize,
    fail_adds: usize,
}

/// Kernel links kept in memory, with counters for every change
#[derive(Debug, Clone, Default)]
pub struct FakeLinks {
    state: Arc<Mutex<LinksState>>,
}

impl FakeLinks {
    pub fn with_links(names: &[&str]) -> Self {
        let links = Self::default();
        for name in names {
            links.plug(name);
        }
        links
    }

    /// Attach a link that is up with carrier
    pub fn plug(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.links.retain(|l| l.name != name);
        state.links.push(Link {
            name: name.to_string(),
            flags: LinkFlags::UP | LinkFlags::LOWER_UP | LinkFlags::BROADCAST,
            addresses: Vec::new(),
        });
    }

    pub fn unplug(&self, name: &str) {
        self.state.lock().unwrap().links.retain(|l| l.name != name);
    }

    /// Bind an address behind the engine's back (another tool or a DHCP lease)
    pub fn bind_external(&self, name: &str, net: &str, dynamic: bool) {
        let net: Ipv4Net = net.parse().unwrap();
        let mut state = self.state.lock().unwrap();
        let link = state.links.iter_mut().find(|l| l.name == name).unwrap();
        link.addresses.push(BoundAddress { net, dynamic });
    }

    pub fn fail_next_adds(&self, count: usize) {
        self.state.lock().unwrap().fail_adds = count;
    }

    pub fn adds(&self) -> usize {
        self.state.lock().unwrap().adds
    }

    pub fn removes(&self) -> usize {
        self.state.lock().unwrap().removes
    }

    pub fn addresses(&self, name: &str) -> Vec<Ipv4Net> {
        self.state
            .lock()
            .unwrap()
            .links
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.addresses.iter().map(|a| a.net).collect())
            .unwrap_or_default()
    }
}

impl LinkControl for FakeLinks {
    fn links(&self) -> Result<Vec<Link>> {
        Ok(self.state.lock().unwrap().links.clone())
    }

    fn add_address(&self, link: &str, address: Ipv4Net) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_adds > 0 {
            state.fail_adds -= 1;
            return Err(Error::CommandFailed {
                command: format!("ip addr add {} dev {}", address, link),
                message: "RTNETLINK answers: Operation not permitted".into(),
            });
        }
        state.adds += 1;
        let entry = state
            .links
            .iter_mut()
            .find(|l| l.name == link)
            .ok_or_else(|| Error::InterfaceNotFound(link.to_string()))?;
        entry.addresses.push(BoundAddress {
            net: address,
            dynamic: false,
        });
        Ok(())
    }

    fn remove_address(&self, link: &str, address: Ipv4Net) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.removes += 1;
        if let Some(entry) = state.links.iter_mut().find(|l| l.name == link) {
            entry.addresses.retain(|a| a.net != address);
        }
        Ok(())
    }
}

#[derive(Debug)]
struct FakeProcess {
    pid: u32,
    spec: ProcessSpec,
    exit: Option<ProcessExit>,
}

#[derive(Debug, Default)]
struct LauncherState {
    processes: Vec<FakeProcess>,
    fail_next: bool,
}

/// Launcher that records specs and hands out controllable children
#[derive(Debug, Clone, Default)]
pub struct FakeLauncher {
    state: Arc<Mutex<LauncherState>>,
}

impl FakeLauncher {
    pub fn spawn_count(&self) -> usize {
        self.state.lock().unwrap().processes.len()
    }

    pub fn live_count(&self) -> usize {
        self.live_specs().len()
    }

    /// Specs of processes that have not exited
    pub fn live_specs(&self) -> Vec<ProcessSpec> {
        self.state
            .lock()
            .unwrap()
            .processes
            .iter()
            .filter(|p| p.exit.is_none())
            .map(|p| p.spec.clone())
            .collect()
    }

    /// Live processes whose argument list mentions `needle`
    pub fn live_with_arg(&self, needle: &str) -> usize {
        self.live_specs()
            .iter()
            .filter(|s| s.args.iter().any(|a| a.contains(needle)))
            .count()
    }

    /// Make every live process exit with `code`
    pub fn exit_all(&self, code: i32) {
        for process in self.state.lock().unwrap().processes.iter_mut() {
            if process.exit.is_none() {
                process.exit = Some(ProcessExit::Code(code));
            }
        }
    }

    pub fn fail_next_spawn(&self) {
        self.state.lock().unwrap().fail_next = true;
    }
}

impl ProcessLauncher for FakeLauncher {
    fn launch(&self, spec: &ProcessSpec) -> Result<Box<dyn ChildProcess>> {
        let mut state = self.state.lock().unwrap();
        if state.fail_next {
            state.fail_next = false;
            return Err(Error::CommandFailed {
                command: spec.command_line(),
                message: "No such file or directory".into(),
            });
        }

        let pid = 1000 + state.processes.len() as u32;
        state.processes.push(FakeProcess {
            pid,
            spec: spec.clone(),
            exit: None,
        });

        Ok(Box::new(FakeChild {
            pid,
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeChild {
    pid: u32,
    state: Arc<Mutex<LauncherState>>,
}

impl ChildProcess for FakeChild {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn try_wait(&mut self) -> Result<Option<ProcessExit>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .processes
            .iter()
            .find(|p| p.pid == self.pid)
            .and_then(|p| p.exit))
    }

    fn terminate(&mut self, _grace: Duration) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(process) = state.processes.iter_mut().find(|p| p.pid == self.pid)
            && process.exit.is_none()
        {
            process.exit = Some(ProcessExit::Signal(15));
        }
        Ok(())
    }
}

/// Probe answering from a shared set of occupied addresses
#[derive(Debug, Clone, Default)]
pub struct FakeProbe {
    occupied: Arc<Mutex<HashSet<Ipv4Addr>>>,
    probes: Arc<Mutex<usize>>,
}

impl FakeProbe {
    pub fn occupy(&self, addr: &str) {
        self.occupied.lock().unwrap().insert(addr.parse().unwrap());
    }

    pub fn probes(&self) -> usize {
        *self.probes.lock().unwrap()
    }
}

impl LivenessProbe for FakeProbe {
    fn is_occupied(&self, _link: &str, address: Ipv4Addr) -> Result<bool> {
        *self.probes.lock().unwrap() += 1;
        Ok(self.occupied.lock().unwrap().contains(&address))
    }
}

/// Handles onto the fake parts, kept by the test after the platform moves into the engine
#[derive(Debug, Clone, Default)]
pub struct FakeHost {
    pub links: FakeLinks,
    pub launcher: FakeLauncher,
    pub probe: FakeProbe,
}

impl FakeHost {
    pub fn with_links(names: &[&str]) -> Self {
        Self {
            links: FakeLinks::with_links(names),
            ..Self::default()
        }
    }

    pub fn platform(&self) -> Platform {
        Platform {
            links: Box::new(self.links.clone()),
            launcher: Box::new(self.launcher.clone()),
            probe: Box::new(self.probe.clone()),
            tools: ToolsConfig::default(),
        }
    }

    pub fn spawn_count(&self) -> usize {
        self.launcher.spawn_count()
    }
}
