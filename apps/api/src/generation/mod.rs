pub mod executor;
pub mod handlers;
pub mod prompts;
pub mod store;
