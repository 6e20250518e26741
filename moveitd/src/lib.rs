pub mod daemon;
pub mod settings;
pub mod sync;
