//! A browser agent: a language model plans, a real Chrome session acts.
//!
//! Each iteration the model sees the instruction plus every previous action
//! and its observation, and picks one next action. Browser actions go through
//! [`Executor`] (snapshot, resolve, interact, recover); `askUser` suspends on a
//! [`UserChannel`]; [`Agent`] owns the loop and decides when to stop.

pub mod agent;
pub mod brain;
pub mod config;
pub mod dom;
pub mod driver;
pub mod error;
pub mod executor;
pub mod hands;
pub mod keys;
pub mod motion;
pub mod recovery;
pub mod resolver;
pub mod simulator;
pub mod types;
pub mod user;

pub use agent::{Agent, AgentEvent, AgentState, LoopPhase, TaskOutcome, TaskReport};
pub use brain::{Decision, OpenAiOracle, Oracle};
pub use config::Config;
pub use dom::{SnapshotBuilder, SnapshotSource, format_element_map};
pub use driver::BrowserDriver;
pub use error::ErrorKind;
pub use executor::Executor;
pub use hands::ChromeDriver;
pub use recovery::RecoveryPolicy;
pub use resolver::{ElementResolver, Resolve};
pub use simulator::{Interact, Simulator};
pub use types::*;
pub use user::{ConsoleChannel, ConsoleInput, QueuedChannel, UserChannel};
