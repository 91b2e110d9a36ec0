#![forbid(unsafe_code)]

//! A convenience layer over a hierarchical coordination service: live
//! mirrored views of child lists and property maps, symbolic and property
//! links, a textual tree-definition format with reconciliation, and
//! automatic replay of ephemeral registrations across session loss.

pub mod capability;
pub mod client;
pub mod config;
pub mod core;
pub mod error;
pub mod memory;
pub mod telemetry;
pub mod tree;

pub use config::Config;
pub use error::{Error, Result, Transience};

// Re-export the main surface at the crate root for convenience.
pub use crate::capability::{Coordination, CoordError, CoordEvent, CreateMode, SessionEvent};
pub use crate::client::{
    Children, DeleteOptions, ImportOptions, ImportReport, Properties, TreeClient,
};
pub use crate::core::{PropertyCodec, PropertyMap};
pub use crate::tree::TreeDefinition;
