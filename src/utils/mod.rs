use std::path::PathBuf;

pub mod logger;

pub use logger::init_logger;

const APP_DIR_NAME: &str = "skillcoach";

pub fn get_app_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|mut path| {
            path.push(APP_DIR_NAME);
            path
        })
        .unwrap_or_else(|| PathBuf::from(".").join(APP_DIR_NAME))
}

pub fn get_database_path() -> PathBuf {
    let mut path = get_app_data_dir();
    path.push("skillcoach.db");
    path
}
