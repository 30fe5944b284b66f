pub mod agent;
pub mod conversation;
pub mod errors;
pub mod executor;
pub mod models;
pub mod prompt_template;
pub mod providers;
pub mod refine;
pub mod store;
pub mod structured;
pub mod systems;
pub mod tasks;
