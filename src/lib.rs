// skillcoach 核心库
// 题库导入、练习组卷与知识点掌握度统计

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use commands::AppState;
pub use config::AppConfig;
pub use error::{Error, Result};
