use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "gangway-pier")]
#[command(about = "Bridge server relaying WebSocket sessions to SSH shells")]
pub struct Cli {
    /// Username for ssh login on target hosts
    #[arg(long, env = "GANGWAY_SSH_USER")]
    pub user: String,

    /// Password paired with the username
    #[arg(long, env = "GANGWAY_SSH_PASSWORD")]
    pub password: Option<String>,

    /// Path to an ssh private key paired with the username
    #[arg(long, env = "GANGWAY_SSH_KEY_FILE")]
    pub ssh_key_file: Option<PathBuf>,

    /// Listen address
    #[arg(long, env = "GANGWAY_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Listen port
    #[arg(long, env = "GANGWAY_PORT", default_value_t = 8080)]
    pub port: u16,
}
