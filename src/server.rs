//! Server composition.
//!
//! Creates the shared listener once, builds one worker per configured thread
//! and runs each on its own named thread. Worker setup (poll creation and
//! listener registration) happens before any thread starts, so a setup
//! failure stops the server before it serves anything.

use crate::config::Config;
use crate::error::SetupError;
use crate::runtime::{Listener, Worker};
use std::net::SocketAddr;
use std::sync::{mpsc, Arc};
use std::thread;
use tracing::{error, info};

/// Server instance
pub struct Server {
    config: Config,
    listener: Arc<Listener>,
}

impl Server {
    /// Bind the listening socket on all interfaces at the configured port.
    pub fn bind(config: Config) -> Result<Self, SetupError> {
        let listener = Listener::create(config.port)?;
        info!(address = %listener.local_addr(), "Server listening");

        Ok(Server {
            config,
            listener: Arc::new(listener),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Run every worker until one of them fails.
    ///
    /// Under normal operation this never returns.
    pub fn run(self) -> Result<(), SetupError> {
        let num_workers = self.config.threads.max(1);

        let workers = (0..num_workers)
            .map(|id| Worker::new(id, Arc::clone(&self.listener)))
            .collect::<Result<Vec<_>, _>>()?;

        info!(workers = num_workers, "Starting workers");

        let (exit_tx, exit_rx) = mpsc::channel();
        let mut handles = Vec::with_capacity(num_workers);

        for worker in workers {
            let id = worker.id();
            let exit_tx = exit_tx.clone();

            let handle = thread::Builder::new()
                .name(format!("worker-{id}"))
                .spawn(move || {
                    let result = worker.run();
                    let _ = exit_tx.send((id, result));
                })
                .map_err(SetupError::Spawn)?;

            handles.push((id, handle));
        }
        drop(exit_tx);

        match exit_rx.recv() {
            Ok((id, Err(e))) => {
                error!(worker = id, error = %e, "Worker failed");
                Err(e)
            }
            Ok((_, Ok(()))) => Ok(()),
            // Every sender is gone without a report: the workers panicked.
            Err(_) => {
                for (id, handle) in handles {
                    if handle.join().is_err() {
                        return Err(SetupError::WorkerPanic(id));
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_binds_ephemeral_port() {
        let config = Config {
            threads: 2,
            port: 0,
            ..Config::default()
        };

        let server = Server::bind(config).unwrap();
        assert_ne!(server.local_addr().port(), 0);
        assert!(server.local_addr().ip().is_unspecified());
    }

    #[test]
    fn test_bind_conflict_fails() {
        let first = Server::bind(Config {
            port: 0,
            ..Config::default()
        })
        .unwrap();

        let second = Server::bind(Config {
            port: first.local_addr().port(),
            ..Config::default()
        });
        assert!(matches!(second, Err(SetupError::Bind { .. })));
    }
}
