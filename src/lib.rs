pub mod browser;
pub mod core;
pub mod errors;
pub mod testing;
pub mod utils;
pub mod workflow;

pub use crate::browser::{Session, SessionManager, SessionOrigin};
pub use crate::core::{BrowserFactory, BrowserTrait, Config, Credentials};
pub use crate::errors::{AgentError, Result};
pub use crate::utils::html_to_text;
pub use crate::workflow::{
    capture_page, ChatOptions, InteractionReply, InteractionRequest, InteractionResult, Phase,
    PhaseFailure, Workflow,
};

#[cfg(feature = "chrome")]
pub use crate::browser::ChromeBrowser;

/// Engine used by the binary.
#[cfg(feature = "chrome")]
pub type DefaultBrowser = ChromeBrowser;
