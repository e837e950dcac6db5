//
// project/mod.rs
//
// LaTeX project dependency tracking
//

pub mod bib;
pub mod cache;
pub mod content;
pub mod elements;
pub mod events;
pub mod fls;
pub mod manager;
pub mod mutex;
pub mod output;
pub mod path_resolve;
pub mod root;
pub mod scanner;
pub mod text;
pub mod watcher;



pub use cache::{CacheEntry, DependencyCache, Stamped};
pub use elements::{ElementExtractor, Elements, RegexElementExtractor};
pub use events::{BuildTrigger, ProjectEvent, ProjectListener};
pub use manager::{Collaborators, Manager, RootState};
pub use root::{FoundRoot, RootSource};
pub use watcher::{FileEvent, FileWatchSet, NotifyBackend, NullBackend, WatchBackend};
