//! Duplicate address detection with iputils `arping -D`

use crate::error::{Error, Result};
use crate::os::command;
use crate::resolver::LivenessProbe;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

/// Probes used per candidate
const PROBE_COUNT: u32 = 2;

/// [`LivenessProbe`] backed by `arping -D`
///
/// In DAD mode arping exits 0 when nobody answered and 1 when a reply
/// came back, i.e. another host holds the address.
#[derive(Debug, Clone)]
pub struct Arping {
    program: PathBuf,
    timeout: Duration,
}

impl Arping {
    pub fn new(program: PathBuf, timeout: Duration) -> Self {
        Self { program, timeout }
    }

    fn args(&self, link: &str, address: Ipv4Addr) -> Vec<String> {
        // Leave one second of headroom between arping's deadline and ours
        let deadline = self.timeout.as_secs().saturating_sub(1).max(1);
        vec![
            "-D".to_string(),
            "-q".to_string(),
            "-c".to_string(),
            PROBE_COUNT.to_string(),
            "-w".to_string(),
            deadline.to_string(),
            "-I".to_string(),
            link.to_string(),
            address.to_string(),
        ]
    }
}

impl LivenessProbe for Arping {
    fn is_occupied(&self, link: &str, address: Ipv4Addr) -> Result<bool> {
        let args = self.args(link, address);
        let output = command::run(&self.program, &args, self.timeout)?;

        match output.code {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(Error::CommandFailed {
                command: format!("{} {}", self.program.display(), args.join(" ")),
                message: output.stderr.trim().to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arping_args() {
        let probe = Arping::new(PathBuf::from("arping"), Duration::from_secs(5));
        let args = probe.args("eth0", Ipv4Addr::new(192, 168, 2, 2));
        assert_eq!(
            args,
            vec!["-D", "-q", "-c", "2", "-w", "4", "-I", "eth0", "192.168.2.2"]
        );
    }

    #[test]
    fn test_exit_codes_map_to_occupancy() {
        // `true` and `false` stand in for arping's two DAD outcomes
        let free = Arping::new(PathBuf::from("true"), Duration::from_secs(2));
        assert!(!free.is_occupied("eth0", Ipv4Addr::new(10, 0, 0, 1)).unwrap());

        let taken = Arping::new(PathBuf::from("false"), Duration::from_secs(2));
        assert!(taken.is_occupied("eth0", Ipv4Addr::new(10, 0, 0, 1)).unwrap());
    }
}
