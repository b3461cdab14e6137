pub mod authority;
pub mod auto_cycle;
pub mod cli;
pub mod compose;
pub mod config;
pub mod demo;
pub mod events;
pub mod handler;
pub mod layout;
pub mod metrics;
pub mod panel;
pub mod presets;
pub mod replication;
pub mod resources;
pub mod scheduler;
pub mod session;
pub mod slider;
pub mod time;

pub use panel::{ButtonView, Panel};
pub use session::LocalSession;
