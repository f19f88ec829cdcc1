//! CLI arguments and server configuration defaults.

use clap::{ArgAction, Parser};
use shadow_rs::formatcp;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const UPLOAD_CHUNK_SIZE: usize = 1024 * 1024;
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 10 * 1024 * 1024 * 1024;
pub const SHUTDOWN_GRACE_SECS: u64 = 10;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "file-drop", version = VERSION_INFO, about = "File drop server")]
pub struct Args {
    #[arg(
        short = 'd',
        long,
        env = "FILE_DROP_DATA_DIR",
        default_value = "data",
        help = "Directory every file operation is rooted at"
    )]
    pub data_dir: String,
    #[arg(
        short = 'b',
        long,
        env = "FILE_DROP_BIND",
        default_value = "127.0.0.1",
        help = "Bind address"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "FILE_DROP_PORT",
        default_value_t = 8000,
        help = "HTTP port"
    )]
    pub port: u16,
    #[arg(
        long,
        env = "FILE_DROP_CORS_ORIGINS",
        default_value = "*",
        help = "Comma separated CORS origins, `*` for any"
    )]
    pub cors_origins: String,
    #[arg(
        long,
        env = "FILE_DROP_CONFINE_PATHS",
        default_value_t = true,
        action = ArgAction::Set,
        help = "Reject paths that resolve outside the data directory"
    )]
    pub confine_paths: bool,
    #[arg(
        long,
        env = "FILE_DROP_MAX_UPLOAD_SIZE",
        default_value_t = DEFAULT_MAX_UPLOAD_SIZE,
        help = "Max upload request size in bytes (0 to disable)"
    )]
    pub max_upload_size: u64,
}
