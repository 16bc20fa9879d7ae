//! Command line client for pipeline runs.
//!
//! `runlink run` starts a run, feeds it inputs and streams block events to
//! stdout as NDJSON; `runlink join` attaches to a run that is already going.

pub mod cli;
pub mod error;
pub mod inputs;
pub mod logging;
pub mod output;
pub mod run;
pub mod styles;
