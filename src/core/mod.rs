pub mod browser;
pub mod config;

pub use browser::{
    BrowserFactory, BrowserTrait, ElementKey, ElementRef, FileChooser, NetworkEvent, Target,
    WaitState,
};
pub use config::{
    BrowserConfig, Config, Credentials, PhaseTimeouts, SelectorConfig, SessionConfig,
    TimingConfig, Viewport,
};
