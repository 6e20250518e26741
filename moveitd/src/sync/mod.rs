pub mod engine;
pub mod local_watcher;
pub mod resolver;
