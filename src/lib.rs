//! Three agents iterate on a Terraform configuration: a creator drafts it, a
//! validator checks it with the Terraform CLI and a human reviewer decides
//! whether it is done.

pub mod agent;
pub mod ai;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod protocol;
pub mod selection;
pub mod termination;
pub mod tools;
pub mod transcript;
