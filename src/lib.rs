pub mod components;
pub mod config;
pub mod error;
pub mod llm;
pub mod prompts;
pub mod response_handler;
pub mod schema_rag;
pub mod warehouse;

pub use components::{initialize_components, Components};
pub use config::AppConfig;
pub use error::{AssistantError, Result};
pub use response_handler::{
    generate_initial_response, get_response, trigger_fallback_logic, AssistantResponse, ResponseHandler,
    ResponseKind,
};
