use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "gangway")]
#[command(about = "Open an interactive shell on a remote host via a gangway-pier server")]
pub struct Cli {
    /// Remote host to open a shell on; resolved by the pier server
    pub host: String,

    /// Pier server base URL
    #[arg(long, env = "GANGWAY_BRIDGE", default_value = "ws://127.0.0.1:8080")]
    pub bridge: String,
}
