pub mod config;
pub mod messages;
pub mod recognizer;
pub mod state;
pub mod text;
pub mod types;

// Keep the public surface small and intentional.
pub use config::*;
pub use messages::*;
pub use recognizer::*;
pub use state::*;
pub use text::*;
pub use types::*;
