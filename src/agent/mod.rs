//! Tool-calling audit agent.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`llm`] | Chat model trait and OpenAI client |
//! | [`tools`] | Tool names, typed calls, schemas, [`Toolbox`](tools::Toolbox) |
//! | [`mission`] | Per-run state and phases |
//! | [`guard`] | Terminal-call preconditions and SQL checks |
//! | [`executor`] | The mission loop |
//! | [`prompt`] | System and mission prompts |

pub mod executor;
pub mod guard;
pub mod llm;
pub mod mission;
pub mod prompt;
pub mod tools;

pub use executor::{MissionExecutor, MissionOutcome};
pub use llm::{ChatMessage, ChatModel, ModelTurn, OpenAIChatModel, RawToolCall};
pub use mission::ScratchpadEntry;
pub use tools::{ToolCall, ToolName, Toolbox};
