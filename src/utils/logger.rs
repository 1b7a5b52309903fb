// 日志初始化：stderr 输出，可选同时写入文件

use log::LevelFilter;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Error, Result};

pub fn init_logger(level: &str, log_file: Option<&Path>) -> Result<()> {
    let level = LevelFilter::from_str(level).unwrap_or_else(|_| {
        eprintln!("Unknown log level {:?}, using info", level);
        LevelFilter::Info
    });

    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr());

    if let Some(path) = log_file {
        dispatch = dispatch.chain(fern::log_file(path)?);
    }

    dispatch
        .apply()
        .map_err(|e| Error::Logger(e.to_string()))
}
