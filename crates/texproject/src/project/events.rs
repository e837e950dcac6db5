//
// project/events.rs
//
// Project notifications and the build collaborator
//

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::Result;
use async_trait::async_trait;

/// Notifications fired by the manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectEvent {
    /// A new root was selected and its dependency tree parsed
    RootChanged(PathBuf),
    /// A build finished and its `.fls` record was merged
    BuildFinished(PathBuf),
    /// Completion elements of the project were refreshed
    CompletionUpdated(PathBuf),
}

/// Reaction to a [`ProjectEvent`]. The firing call awaits every listener.
#[async_trait]
pub trait ProjectListener: Send + Sync {
    async fn on_event(&self, event: &ProjectEvent);
}

/// Requests a compilation. Running the recipe is the collaborator's job.
#[async_trait]
pub trait BuildTrigger: Send + Sync {
    async fn build(&self, root: &Path, language_id: &str) -> Result<()>;
}

/// Listener list with sequential, awaited delivery
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<Arc<dyn ProjectListener>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn ProjectListener>) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.push(listener);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.read().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every listener in subscription order and return
    /// once all of them have finished.
    pub async fn fire(&self, event: ProjectEvent) {
        // Snapshot so no lock is held across listener awaits
        let listeners: Vec<Arc<dyn ProjectListener>> = match self.listeners.read() {
            Ok(l) => l.clone(),
            Err(_) => return,
        };
        log::debug!("Firing {:?} to {} listeners", event, listeners.len());
        for listener in listeners {
            listener.on_event(&event).await;
        }
    }
}
