//! Types shared by the scoring engines, the flow core and the CLI.

pub mod domain;
pub mod error;
pub mod protocol;
