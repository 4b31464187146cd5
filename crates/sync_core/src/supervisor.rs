//! crates/sync_core/src/supervisor.rs
//!
//! Single owner of the peer registry and every long-running thread: the
//! discovery beacon, the discovery listener, the TCP accept loop, and the
//! filesystem event dispatcher. Breaks the registry/session reference cycle
//! by being the one place that holds an `Arc<PeerRegistry>` and hands
//! sessions only the narrow `SessionHost` capability.

use std::net::{IpAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{error, info, warn};

use signature::SignatureStore;

use crate::clock::Clock;
use crate::config::Config;
use crate::dir_events::DirEvents;
use crate::discovery::{self, DiscoveryConfig};
use crate::error::{ConfigResult, SyncError};
use crate::event_router::EventRouter;
use crate::ignore::IgnoreSet;
use crate::model::PeerId;
use crate::registry::PeerRegistry;
use crate::session::SessionContext;

/// Owns every component of a running node and its background threads.
pub struct Supervisor {
    config: Config,
    local_id: PeerId,
    registry: Arc<PeerRegistry>,
    sig_store: Arc<SignatureStore>,
    ignore: Arc<IgnoreSet>,
    clock: Arc<dyn Clock>,
    dir_lock: Arc<Mutex<()>>,
    stop: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    listener: Mutex<Option<TcpListener>>,
}

impl Supervisor {
    /// Build a supervisor for a validated `config`, advertising `local_ip`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if `config` fails validation or the signature
    /// store cannot be opened.
    pub fn new(config: Config, local_ip: IpAddr, clock: Arc<dyn Clock>) -> Result<Arc<Self>, SyncError> {
        let config = validate(config)?;
        let sig_store = Arc::new(SignatureStore::open(&config.signature_dir)?);
        let ignore = Arc::new(IgnoreSet::new(config.ignore_grace_s));
        let local_id = PeerId::new(local_ip, config.listen_port);

        let dir_lock = Arc::new(Mutex::new(()));
        let ctx = Arc::new(SessionContext {
            monitored_dir: config.monitored_dir.clone(),
            sig_store: Arc::clone(&sig_store),
            ignore: Arc::clone(&ignore),
            clock: Arc::clone(&clock),
            max_frame_bytes: config.max_frame_bytes,
            send_queue_depth: config.send_queue_depth,
            dir_lock: Arc::clone(&dir_lock),
        });
        let registry = PeerRegistry::new(
            local_id,
            ctx,
            Duration::from_secs(config.connect_timeout_s),
        );

        Ok(Arc::new(Self {
            config,
            local_id,
            registry,
            sig_store,
            ignore,
            clock,
            dir_lock,
            stop: Arc::new(AtomicBool::new(false)),
            threads: Mutex::new(Vec::new()),
            listener: Mutex::new(None),
        }))
    }

    /// This node's advertised identity.
    #[must_use]
    pub fn local_id(&self) -> PeerId {
        self.local_id
    }

    /// The peer registry, for callers that want to inspect live sessions.
    #[must_use]
    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    /// Start the discovery beacon and listener threads.
    pub fn start_discovery(self: &Arc<Self>) {
        let cfg = DiscoveryConfig {
            local_ip: self.local_id.ip,
            listen_port: self.config.listen_port,
            broadcast_port: self.config.broadcast_port,
            beacon_interval: Duration::from_secs(self.config.beacon_interval_s),
        };

        {
            let stop = Arc::clone(&self.stop);
            self.push_thread(thread::spawn(move || discovery::beacon_loop(&cfg, &stop)));
        }
        {
            let stop = Arc::clone(&self.stop);
            let registry = Arc::clone(&self.registry);
            self.push_thread(thread::spawn(move || discovery::listen_loop(&cfg, &registry, &stop)));
        }
    }

    /// Bind the TCP listen port and start the accept loop.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the port cannot be bound.
    pub fn start_accept_loop(self: &Arc<Self>) -> std::io::Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.config.listen_port))?;
        let accept_listener = listener.try_clone()?;
        *self.listener.lock().unwrap_or_else(|e| e.into_inner()) = Some(listener);

        let registry = Arc::clone(&self.registry);
        let stop = Arc::clone(&self.stop);
        self.push_thread(thread::spawn(move || {
            for incoming in accept_listener.incoming() {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                match incoming {
                    Ok(stream) => registry.accept(stream),
                    Err(e) => {
                        if stop.load(Ordering::SeqCst) {
                            break;
                        }
                        warn!(error = %e, "accept loop error");
                    }
                }
            }
        }));
        Ok(())
    }

    /// Run the event router inline against `events` until it closes. Intended
    /// to be called on its own thread by the caller (the `notify`-backed
    /// adapter owns its own watcher thread in the root binary crate).
    #[must_use]
    pub fn event_router(&self) -> EventRouter {
        EventRouter::new(
            self.config.monitored_dir.clone(),
            Arc::clone(&self.sig_store),
            Arc::clone(&self.ignore),
            Arc::clone(&self.clock),
            Arc::clone(&self.registry),
            Arc::clone(&self.dir_lock),
        )
    }

    /// Drive `events` through this supervisor's event router on the calling
    /// thread until the source closes or shutdown is requested.
    pub fn run_event_router(&self, events: &dyn DirEvents) {
        self.event_router().run(events);
    }

    /// Periodically sweep the ignore set. Call from a dedicated thread, or
    /// inline between other work; cheap enough to run often.
    pub fn sweep_ignore_set(&self) {
        self.ignore.sweep(self.clock.as_ref());
    }

    fn push_thread(&self, handle: JoinHandle<()>) {
        self.threads.lock().unwrap_or_else(|e| e.into_inner()).push(handle);
    }

    /// Request shutdown of every background thread and join them. Closing
    /// the listen socket unblocks the accept loop; the beacon/listener
    /// threads notice the stop flag on their own polling interval.
    pub fn shutdown(&self) {
        info!("supervisor shutting down");
        self.stop.store(true, Ordering::SeqCst);
        if let Some(listener) = self.listener.lock().unwrap_or_else(|e| e.into_inner()).take() {
            drop(listener);
        }
        let handles: Vec<_> = self.threads.lock().unwrap_or_else(|e| e.into_inner()).drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                error!("a supervisor thread panicked");
            }
        }
    }
}

fn validate(config: Config) -> ConfigResult<Config> {
    config.validate()
}
