//! # loopgrid-headless
//!
//! Headless driver for loopgrid-core.
//!
//! Provides:
//! - `SyntheticCamera`: Capture thread feeding numbered frames into the graph
//! - `KeyScript`: Parser for scripted key presses, waits, frame feeds and render ticks
//! - `HeadlessRunner`: Plays a script against a `Looper` over `MemoryGraph`
//!
//! ## Usage
//! ```ignore
//! use loopgrid_headless::{HeadlessRunner, KeyScript, RunnerConfig};
//!
//! let script = KeyScript::parse("down 1; wait 500; up 1; render 30")?;
//! let summary = HeadlessRunner::new(RunnerConfig::default())?.run(&script)?;
//! println!("{}", serde_json::to_string_pretty(&summary)?);
//! ```

pub mod camera;
pub mod error;
pub mod runner;
pub mod script;

pub use camera::{synthetic_frame, CameraConfig, SyntheticCamera};
pub use error::HeadlessError;
pub use runner::{EventLog, HeadlessRunner, RunEvent, RunSummary, RunnerConfig};
pub use script::{KeyScript, ScriptStep};
