//! Catalog of apps under test
//!
//! Clients ask for an app by `package:version`, by bare package name, or by
//! an identifier paired with an explicit launch activity. The registry maps
//! those requests onto catalogued binaries; the folder watcher keeps the
//! catalog current while the orchestrator runs.

pub mod descriptor;
pub mod inspector;
pub mod registry;
pub mod watcher;

pub use descriptor::{AppDescriptor, AppKey};
pub use inspector::{AaptInspector, AppInspector, InspectError};
pub use registry::AppRegistry;
pub use watcher::{AppFolderWatcher, FolderEvent, FolderScanner, WatcherHandle};
