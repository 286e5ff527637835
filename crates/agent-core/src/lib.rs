pub mod agent_loop;
pub mod config;
pub mod error;
pub mod session;
pub mod tool_registry;
pub mod types;

pub use agent_loop::AgentLoop;
pub use config::AppConfig;
pub use error::AgentError;
pub use session::{Session, SessionManager};
pub use tool_registry::{Tool, ToolRegistry};
