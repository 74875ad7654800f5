//! The conversational core of Hisho.
//!
//! A request flows through four pieces:
//!
//! 1. **Capabilities**: a fresh, credential-bound tool set per request
//!    (built by a `CapabilityFactory`)
//! 2. **Sessions**: [`SessionRegistry`] maps a session id to one long-lived
//!    [`Agent`] so conversation history carries across requests
//! 3. **Generation**: [`Agent::generate`] runs the model/tool loop and
//!    reports raw runtime events
//! 4. **Normalization**: [`normalize`] reduces raw events to the two
//!    [`WireEvent`] shapes clients understand
//!
//! [`Orchestrator`] wires these together for each incoming request.

pub mod agent;
pub mod normalize;
pub mod orchestrator;
pub mod prompt;
pub mod session;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use agent::{Agent, AgentSettings};
pub use normalize::{RawEvent, WireEvent, normalize};
pub use orchestrator::{InvokeRequest, NOT_CONNECTED_MESSAGE, Orchestrator};
pub use session::{SessionRegistry, SharedAgent};
