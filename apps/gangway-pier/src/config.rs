//! Startup configuration. Built once from the CLI, then shared read-only by
//! every session.

use std::path::PathBuf;
use std::sync::Arc;

use russh_keys::key::KeyPair;
use thiserror::Error;

use crate::cli::Cli;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("--password and --ssh-key-file can not be used together")]
    ConflictingAuth,
    #[error("failed to read key file '{path}': {source}")]
    ReadKey {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse key file '{path}': {source}")]
    ParseKey {
        path: PathBuf,
        source: russh_keys::Error,
    },
}

/// How the pier authenticates against target hosts.
pub enum AuthMethod {
    Password(String),
    Key(Arc<KeyPair>),
    /// No credentials configured; a `none` authentication attempt is made.
    None,
}

pub struct SshConfig {
    pub user: String,
    pub auth: AuthMethod,
}

pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub ssh: Arc<SshConfig>,
}

impl ServerConfig {
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let auth = match (cli.password, cli.ssh_key_file) {
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingAuth),
            (Some(password), None) => AuthMethod::Password(password),
            (None, Some(path)) => {
                // Parse at startup so a bad key fails fast, not per session.
                let contents = std::fs::read_to_string(&path).map_err(|source| {
                    ConfigError::ReadKey {
                        path: path.clone(),
                        source,
                    }
                })?;
                let key = russh_keys::decode_secret_key(&contents, None)
                    .map_err(|source| ConfigError::ParseKey { path, source })?;
                AuthMethod::Key(Arc::new(key))
            }
            (None, None) => AuthMethod::None,
        };
        Ok(Self {
            bind_address: cli.bind_address,
            port: cli.port,
            ssh: Arc::new(SshConfig {
                user: cli.user,
                auth,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli() -> Cli {
        Cli {
            user: "deploy".to_string(),
            password: None,
            ssh_key_file: None,
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
        }
    }

    #[test]
    fn password_and_key_file_are_mutually_exclusive() {
        let conflicting = Cli {
            password: Some("hunter2".to_string()),
            ssh_key_file: Some(PathBuf::from("/tmp/id_ed25519")),
            ..cli()
        };
        assert!(matches!(
            ServerConfig::from_cli(conflicting),
            Err(ConfigError::ConflictingAuth)
        ));
    }

    #[test]
    fn password_only_selects_password_auth() {
        let config = ServerConfig::from_cli(Cli {
            password: Some("hunter2".to_string()),
            ..cli()
        })
        .expect("config");
        assert!(matches!(config.ssh.auth, AuthMethod::Password(_)));
    }

    #[test]
    fn missing_key_file_is_a_startup_error() {
        let result = ServerConfig::from_cli(Cli {
            ssh_key_file: Some(PathBuf::from("/nonexistent/key")),
            ..cli()
        });
        assert!(matches!(result, Err(ConfigError::ReadKey { .. })));
    }

    #[test]
    fn no_credentials_fall_back_to_none_auth() {
        let config = ServerConfig::from_cli(cli()).expect("config");
        assert!(matches!(config.ssh.auth, AuthMethod::None));
    }
}
