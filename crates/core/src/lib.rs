pub mod config;
pub mod error;
pub mod event;
pub mod finding;
pub mod playbook;
pub mod rule;

pub use config::Config;
pub use error::*;
pub use event::*;
pub use finding::*;
pub use playbook::*;
pub use rule::*;
