pub mod html;
pub mod javascript;
pub mod screenshot;

pub use html::html_to_text;
pub use javascript::{ElementQuery, Scripts};
pub use screenshot::ScreenshotManager;
