// ABOUTME: Drone context handed to application code running inside a drone.
// ABOUTME: Its listen() applies port redirection and reports the bound port once.

use hive_core::{ListenTarget, PortRedirector, PortResolver};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, UnixListener};

use crate::error::BootstrapError;
use crate::params::DroneConfig;
use crate::report::PortReporter;

/// A listener opened through the drone context.
#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener),
}

impl Listener {
    pub fn local_port(&self) -> Option<u16> {
        match self {
            Listener::Tcp(listener) => listener.local_addr().ok().map(|addr| addr.port()),
            Listener::Unix(_) => None,
        }
    }
}

#[derive(Clone)]
pub struct DroneContext {
    config: Arc<DroneConfig>,
    resolver: Arc<dyn PortResolver>,
    reporter: Option<Arc<PortReporter>>,
    reported: Arc<AtomicBool>,
}

impl DroneContext {
    /// Context that redirects every non-reserved port to the assigned one.
    pub fn new(config: Arc<DroneConfig>) -> Self {
        let resolver = PortRedirector::new(config.port, config.reserved.clone());
        Self::with_resolver(config, Arc::new(resolver))
    }

    pub fn with_resolver(config: Arc<DroneConfig>, resolver: Arc<dyn PortResolver>) -> Self {
        Self {
            config,
            resolver,
            reporter: None,
            reported: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_reporter(mut self, reporter: Option<Arc<PortReporter>>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(&self) -> &DroneConfig {
        &self.config
    }

    pub fn reporter(&self) -> Option<&PortReporter> {
        self.reporter.as_deref()
    }

    /// Open a listener where the drone asked, after redirection.
    ///
    /// The first TCP listener on a non-reserved port is reported to the
    /// orchestrator with the port that was actually bound.
    pub async fn listen(&self, target: ListenTarget) -> Result<Listener, BootstrapError> {
        let resolved = self.resolver.resolve(target);
        let addr = resolved.to_string();
        tracing::debug!(listen = %addr, "Opening drone listener");

        match resolved {
            ListenTarget::Port { port, host } => {
                let bind = host.as_deref().unwrap_or("0.0.0.0");
                let listener = TcpListener::bind((bind, port))
                    .await
                    .map_err(|source| BootstrapError::Listen {
                        target: addr.clone(),
                        source,
                    })?;
                let bound = listener
                    .local_addr()
                    .map_err(|source| BootstrapError::Listen { target: addr, source })?;
                self.announce(bound).await;
                Ok(Listener::Tcp(listener))
            }
            ListenTarget::Path(path) => {
                let listener = UnixListener::bind(&path)
                    .map_err(|source| BootstrapError::Listen { target: addr, source })?;
                Ok(Listener::Unix(listener))
            }
        }
    }

    /// Convenience for `listen(ListenTarget::parse(first, host))`.
    pub async fn listen_on(&self, first: &str, host: Option<&str>) -> Result<Listener, BootstrapError> {
        self.listen(ListenTarget::parse(first, host)).await
    }

    /// Report `port` unless a port was already reported for this drone.
    pub async fn report_port(&self, port: u16) -> Result<(), BootstrapError> {
        let Some(reporter) = &self.reporter else {
            return Ok(());
        };
        if self.reported.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Err(e) = reporter.report(port).await {
            self.reported.store(false, Ordering::Release);
            return Err(e.into());
        }
        Ok(())
    }

    /// A failed report never fails the listen: after a restart the orchestrator
    /// no longer waits for this spawn and rejects the report.
    async fn announce(&self, bound: SocketAddr) {
        if self.config.reserved.contains(bound.port()) {
            return;
        }
        if let Err(e) = self.report_port(bound.port()).await {
            tracing::warn!(port = bound.port(), error = %e, "Port report failed");
        }
    }
}
