#[cfg(feature = "chrome")]
pub mod chrome;
pub mod network;
pub mod resolver;
pub mod session;

#[cfg(feature = "chrome")]
pub use chrome::{ChromeBrowser, ChromeTab};
pub use network::{await_quiescence, QuiescenceReport, QuiescenceSettings, QuiescenceTracker};
pub use resolver::{
    resolve_trigger_control, ElementSnapshot, TriggerInput, TriggerResolution, TriggerResolver,
};
pub use session::{CookieData, PersistedState, Session, SessionManager, SessionOrigin};
