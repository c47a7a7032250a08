pub mod capability;
pub mod config;
pub mod dedup;
pub mod error;
pub mod io;
pub mod ladder;
pub mod member;
pub mod paths;
pub mod roster;
pub mod source;
pub mod store;
pub mod sync;
pub mod workflow;

pub use error::{Result, RosterError};
pub use roster::{Roster, Submission};
