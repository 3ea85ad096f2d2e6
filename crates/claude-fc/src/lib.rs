pub mod claude;
pub mod config;
pub mod conversation;
pub mod dispatcher;
pub mod errors;
pub mod functions;
pub mod llm;
pub mod markup;
pub mod metrics;
pub mod models;
pub mod prompt_template;
pub mod providers;
pub mod stream_parser;
