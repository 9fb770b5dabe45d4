//! Readiness probe for freshly spawned capture processes
//!
//! The capture process is ready once its data port accepts TCP connections.
//! [`wait_until_ready`] polls a [`ReadinessProbe`] a bounded number of times
//! and gives up early when the process exits.

use crate::config::StartupConfig;
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::time::Duration;

/// Connect test against a local port
#[cfg_attr(test, mockall::automock)]
pub trait ReadinessProbe: Send + Sync {
    fn is_ready(&self, port: u16) -> bool;
}

/// Probe that opens (and immediately closes) a TCP connection to `127.0.0.1:port`
#[derive(Debug, Clone, Copy)]
pub struct TcpProbe {
    pub connect_timeout: Duration,
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(1),
        }
    }
}

impl ReadinessProbe for TcpProbe {
    fn is_ready(&self, port: u16) -> bool {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        TcpStream::connect_timeout(&addr, self.connect_timeout).is_ok()
    }
}

/// Attempt budget of a probe run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSchedule {
    pub attempts: u32,
    pub interval: Duration,
}

impl From<&StartupConfig> for ProbeSchedule {
    fn from(config: &StartupConfig) -> Self {
        Self {
            attempts: config.probe_attempts,
            interval: config.probe_interval(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ready,
    /// The process went away while probing
    Exited,
    /// Attempt budget exhausted
    Exhausted,
}

/// Poll `probe` until the port is ready, `gone()` reports the process has
/// exited, or the schedule runs out.
pub fn wait_until_ready<P, G>(probe: &P, port: u16, schedule: ProbeSchedule, gone: G) -> ProbeOutcome
where
    P: ReadinessProbe + ?Sized,
    G: Fn() -> bool,
{
    for attempt in 0..schedule.attempts {
        if gone() {
            return ProbeOutcome::Exited;
        }
        if probe.is_ready(port) {
            tracing::trace!("Port {} ready after {} probes", port, attempt + 1);
            return ProbeOutcome::Ready;
        }
        std::thread::sleep(schedule.interval);
    }
    if gone() {
        ProbeOutcome::Exited
    } else {
        ProbeOutcome::Exhausted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(attempts: u32) -> ProbeSchedule {
        ProbeSchedule {
            attempts,
            interval: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_ready_after_some_attempts() {
        let mut probe = MockReadinessProbe::new();
        let calls = AtomicU32::new(0);
        probe
            .expect_is_ready()
            .withf(|port| *port == 4950)
            .times(3)
            .returning(move |_| calls.fetch_add(1, Ordering::SeqCst) == 2);

        assert_eq!(wait_until_ready(&probe, 4950, fast(10), || false), ProbeOutcome::Ready);
    }

    #[test]
    fn test_exhausted() {
        let mut probe = MockReadinessProbe::new();
        probe.expect_is_ready().times(5).return_const(false);
        assert_eq!(wait_until_ready(&probe, 1, fast(5), || false), ProbeOutcome::Exhausted);
    }

    #[test]
    fn test_exit_stops_probing() {
        let mut probe = MockReadinessProbe::new();
        probe.expect_is_ready().never();
        assert_eq!(wait_until_ready(&probe, 1, fast(5), || true), ProbeOutcome::Exited);
    }

    #[test]
    fn test_tcp_probe() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let probe = TcpProbe::default();
        assert!(probe.is_ready(port));
        drop(listener);
        assert!(!probe.is_ready(port));
    }
}
