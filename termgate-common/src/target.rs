use serde::{Deserialize, Serialize};

use crate::Secret;

/// Read-only view of a stored server connection, as resolved for one dial.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CredentialRecord {
    pub host: String,
    #[serde(default = "_default_ssh_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub auth: SshAuth,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "method")]
pub enum SshAuth {
    Password {
        password: Secret<String>,
    },
    PrivateKey {
        key: Secret<String>,
        #[serde(default)]
        passphrase: Option<Secret<String>>,
    },
}

impl Default for SshAuth {
    fn default() -> Self {
        SshAuth::Password {
            password: Secret::new(String::new()),
        }
    }
}

fn _default_ssh_port() -> u16 {
    22
}
