//! Shutdown coordination.
//!
//! A [`ShutdownCoordinator`] owns the shutdown trigger and a completion
//! barrier. Components subscribe with [`ShutdownCoordinator::listener`],
//! register with [`ShutdownCoordinator::register`], and report back through
//! the returned [`CompletionHandle`]. [`ShutdownCoordinator::wait`] resolves
//! once every registered component has reported, however many there are.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Why the process is shutting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Stop for good (SIGINT, SIGTERM, SIGQUIT).
    Terminate,
    /// Stop, reload configuration, and start again (SIGHUP).
    Reload,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Terminate => f.write_str("terminate"),
            ShutdownReason::Reload => f.write_str("reload"),
        }
    }
}

type Trigger = Arc<watch::Sender<Option<ShutdownReason>>>;

/// Owns the trigger and the completion barrier.
pub struct ShutdownCoordinator {
    trigger: Trigger,
    done_tx: mpsc::UnboundedSender<&'static str>,
    done_rx: mpsc::UnboundedReceiver<&'static str>,
    registered: usize,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (trigger, _) = watch::channel(None);
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        Self {
            trigger: Arc::new(trigger),
            done_tx,
            done_rx,
            registered: 0,
        }
    }

    /// A cloneable handle that can start the shutdown.
    pub fn handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            trigger: Arc::clone(&self.trigger),
        }
    }

    /// Subscribe to the trigger.
    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.trigger.subscribe(),
        }
    }

    /// Add a component to the completion barrier.
    pub fn register(&mut self, component: &'static str) -> CompletionHandle {
        self.registered += 1;
        debug!(component, "registered for shutdown");
        CompletionHandle {
            component,
            completed: false,
            tx: self.done_tx.clone(),
        }
    }

    /// Start the shutdown. The first reason wins.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        fire(&self.trigger, reason)
    }

    /// Number of components in the barrier.
    pub fn registered(&self) -> usize {
        self.registered
    }

    /// Wait until every registered component has completed.
    ///
    /// Returns the trigger reason, or [`ShutdownReason::Terminate`] if the
    /// components all finished without a trigger.
    pub async fn wait(self) -> ShutdownReason {
        let Self {
            trigger,
            done_tx,
            mut done_rx,
            registered,
        } = self;
        drop(done_tx);

        let mut remaining = registered;
        while let Some(component) = done_rx.recv().await {
            remaining = remaining.saturating_sub(1);
            info!(component, remaining, "component shut down");
        }

        trigger.borrow().unwrap_or(ShutdownReason::Terminate)
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

fn fire(trigger: &Trigger, reason: ShutdownReason) -> bool {
    let fired = trigger.send_if_modified(|current| {
        if current.is_none() {
            *current = Some(reason);
            true
        } else {
            false
        }
    });
    if fired {
        info!(%reason, "shutdown triggered");
    }
    fired
}

/// Starts the shutdown from anywhere.
#[derive(Clone)]
pub struct ShutdownHandle {
    trigger: Trigger,
}

impl ShutdownHandle {
    /// Start the shutdown. Returns `false` if it had already started.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        fire(&self.trigger, reason)
    }
}

/// Observes the trigger.
#[derive(Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<Option<ShutdownReason>>,
}

impl ShutdownListener {
    pub fn is_triggered(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Resolve once shutdown has been triggered. A dropped coordinator counts
    /// as [`ShutdownReason::Terminate`].
    pub async fn triggered(&mut self) -> ShutdownReason {
        match self.rx.wait_for(Option::is_some).await {
            Ok(reason) => (*reason).unwrap_or(ShutdownReason::Terminate),
            Err(_) => ShutdownReason::Terminate,
        }
    }
}

/// Reports a component's completion when completed or dropped.
pub struct CompletionHandle {
    component: &'static str,
    completed: bool,
    tx: mpsc::UnboundedSender<&'static str>,
}

impl CompletionHandle {
    pub fn complete(mut self) {
        self.completed = true;
    }

    pub fn component(&self) -> &'static str {
        self.component
    }
}

impl Drop for CompletionHandle {
    fn drop(&mut self) {
        if !self.completed {
            warn!(component = self.component, "component stopped without completing shutdown");
        }
        let _ = self.tx.send(self.component);
    }
}
