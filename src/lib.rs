pub mod assets;
pub mod catalog;
pub mod context;
pub mod critique;
pub mod engine;
pub mod errors;
pub mod finalize;
pub mod generation;
pub mod init;
pub mod ledger;
pub mod llm;
pub mod logging;
pub mod resolver;
pub mod stageforge_config;
pub mod store;
pub mod template;
pub mod ui;
pub mod util;
