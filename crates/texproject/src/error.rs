//
// error.rs
//
// Errors surfaced by the project engine
//

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProjectError {
    /// A `QueueMutex` already has a running holder and a full waiting queue.
    #[error("{name} is busy: {pending} requests already running or queued")]
    QueueFull { name: &'static str, pending: usize },
}
