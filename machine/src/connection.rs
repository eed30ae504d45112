use crate::config::write_atomic;
use crate::error::MachineError;
use crate::forwarding::{ROOTFUL_GUEST_SOCKET, rootless_guest_socket};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

const LOCALHOST: &str = "127.0.0.1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub uri: String,
    pub identity: PathBuf,
    #[serde(default)]
    pub is_machine: bool,
}

/// SSH shortcuts to the container API inside each machine.
///
/// Every machine owns two entries, `<name>` (rootless user) and
/// `<name>-root`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connections {
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub connections: BTreeMap<String, Connection>,
}

fn ssh_uri(user: &str, port: u16, socket: &str) -> String {
    format!("ssh://{}@{}:{}{}", user, LOCALHOST, port, socket)
}

/// Rewrites the port of an `ssh://user@host:port/path` URI.
fn with_port(uri: &str, port: u16) -> Option<String> {
    let rest = uri.strip_prefix("ssh://")?;
    let (authority, path) = rest.split_at(rest.find('/').unwrap_or(rest.len()));
    let (host, _) = authority.rsplit_once(':')?;
    Some(format!("ssh://{}:{}{}", host, port, path))
}

impl Connections {
    pub async fn load(path: &Path) -> Result<Self, MachineError> {
        match fs::read(path).await {
            Ok(content) => Ok(serde_json::from_slice(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, path: &Path) -> Result<(), MachineError> {
        write_atomic(path, &serde_json::to_vec_pretty(self)?).await
    }

    /// Adds the rootless and rootful entries for a machine.
    pub fn add_pair(
        &mut self,
        name: &str,
        port: u16,
        identity: &Path,
        remote_username: &str,
        uid: u32,
        make_default: bool,
    ) {
        let rootless = Connection {
            uri: ssh_uri(remote_username, port, &rootless_guest_socket(uid)),
            identity: identity.to_path_buf(),
            is_machine: true,
        };
        let rootful = Connection {
            uri: ssh_uri("root", port, ROOTFUL_GUEST_SOCKET),
            identity: identity.to_path_buf(),
            is_machine: true,
        };

        self.connections.insert(name.to_string(), rootless);
        self.connections.insert(format!("{}-root", name), rootful);
        if make_default || self.default.is_none() {
            self.default = Some(name.to_string());
        }
    }

    /// Points both of a machine's entries at a new SSH port.
    pub fn update_pair_port(&mut self, name: &str, port: u16) {
        for key in [name.to_string(), format!("{}-root", name)] {
            let Some(connection) = self.connections.get_mut(&key) else {
                tracing::debug!("No connection named {} to update", key);
                continue;
            };
            match with_port(&connection.uri, port) {
                Some(uri) => connection.uri = uri,
                None => tracing::warn!("Connection {} has malformed uri {}", key, connection.uri),
            }
        }
    }

    pub fn remove_pair(&mut self, name: &str) {
        self.connections.remove(name);
        self.connections.remove(&format!("{}-root", name));
        if self
            .default
            .as_deref()
            .is_some_and(|d| d == name || d == format!("{}-root", name))
        {
            self.default = self.connections.keys().next().cloned();
        }
    }
}
