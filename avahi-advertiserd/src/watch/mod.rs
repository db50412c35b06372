pub mod source;
pub mod watcher;

pub use source::{KubeServiceApi, ServiceApi, ServiceList, WatchItem, WatchStream};
pub use watcher::{WatchSource, WatchUpdate};
