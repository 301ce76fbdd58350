//! Transport seam: connecting to a machine and running things on it.

use std::fmt;
use std::path::Path;

use tracing::debug;

use sshgrid_core::{Secret, SshConfig, SSH_PRIVATE_KEY_KEY, SSH_USERNAME_KEY};

use crate::error::{RemoteError, RemoteResult};

/// Captured output of a successful remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// An established session with one machine.
///
/// Every call blocks until the remote side finishes. A command that exits
/// non-zero is an error carrying its stdout and stderr.
pub trait MachineClient {
    /// Address this client is connected to.
    fn host(&self) -> &str;

    fn run_command(&self, command: &str) -> RemoteResult<CommandOutput>;

    fn read_file(&self, path: &str) -> RemoteResult<Vec<u8>>;

    fn write_file(&self, path: &str, mode: u32, data: &[u8]) -> RemoteResult<()>;

    fn mkdir_all(&self, path: &str, mode: u32) -> RemoteResult<()>;

    fn move_file(&self, src: &str, dst: &str) -> RemoteResult<()>;
}

/// Opens sessions. The credential is consumed by the session setup.
pub trait Connector {
    fn connect(
        &self,
        ssh: &SshConfig,
        credential: RemoteCredential,
    ) -> RemoteResult<Box<dyn MachineClient>>;
}

/// Username and private key resolved from a credential Secret.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteCredential {
    pub username: String,
    pub private_key: String,
}

impl fmt::Debug for RemoteCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCredential")
            .field("username", &self.username)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

impl RemoteCredential {
    pub fn from_secret(secret: &Secret) -> RemoteResult<Self> {
        let missing = |key: &str| RemoteError::Credential {
            secret: secret.meta.name.clone(),
            reason: format!("missing key {key:?}"),
        };
        let username = secret
            .get(SSH_USERNAME_KEY)
            .ok_or_else(|| missing(SSH_USERNAME_KEY))?;
        let private_key = secret
            .get(SSH_PRIVATE_KEY_KEY)
            .ok_or_else(|| missing(SSH_PRIVATE_KEY_KEY))?;
        if username.is_empty() {
            return Err(RemoteError::Credential {
                secret: secret.meta.name.clone(),
                reason: "empty username".to_string(),
            });
        }
        Ok(Self {
            username: username.to_string(),
            private_key: private_key.to_string(),
        })
    }
}

/// Place a file at a path the connecting user may not be able to write
/// directly: write it under `/tmp`, then move it into place.
pub fn install_file(
    client: &dyn MachineClient,
    path: &str,
    mode: u32,
    data: &[u8],
) -> RemoteResult<()> {
    let target = Path::new(path);
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "sshgrid-upload".to_string());
    if let Some(dir) = target.parent().and_then(|d| d.to_str()) {
        if !dir.is_empty() {
            client.mkdir_all(dir, 0o755)?;
        }
    }
    let tmp_path = format!("/tmp/{file_name}");
    debug!(host = client.host(), %tmp_path, %path, "installing file");
    client.write_file(&tmp_path, mode, data)?;
    client.move_file(&tmp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingClient {
        calls: RefCell<Vec<String>>,
    }

    impl MachineClient for RecordingClient {
        fn host(&self) -> &str {
            "10.0.0.1"
        }

        fn run_command(&self, command: &str) -> RemoteResult<CommandOutput> {
            self.calls.borrow_mut().push(format!("run {command}"));
            Ok(CommandOutput::default())
        }

        fn read_file(&self, path: &str) -> RemoteResult<Vec<u8>> {
            self.calls.borrow_mut().push(format!("read {path}"));
            Ok(Vec::new())
        }

        fn write_file(&self, path: &str, mode: u32, data: &[u8]) -> RemoteResult<()> {
            self.calls
                .borrow_mut()
                .push(format!("write {path} {mode:o} {}", data.len()));
            Ok(())
        }

        fn mkdir_all(&self, path: &str, mode: u32) -> RemoteResult<()> {
            self.calls.borrow_mut().push(format!("mkdir {path} {mode:o}"));
            Ok(())
        }

        fn move_file(&self, src: &str, dst: &str) -> RemoteResult<()> {
            self.calls.borrow_mut().push(format!("mv {src} {dst}"));
            Ok(())
        }
    }

    #[test]
    fn install_file_goes_through_tmp() {
        let client = RecordingClient::default();
        install_file(&client, "/etc/etcd/pki/ca.key", 0o600, b"KEY").unwrap();
        assert_eq!(
            client.calls.into_inner(),
            vec![
                "mkdir /etc/etcd/pki 755",
                "write /tmp/ca.key 600 3",
                "mv /tmp/ca.key /etc/etcd/pki/ca.key",
            ]
        );
    }

    #[test]
    fn credential_from_secret() {
        let secret = Secret::new("default", "sshCredential")
            .with(SSH_USERNAME_KEY, "ubuntu")
            .with(SSH_PRIVATE_KEY_KEY, "-----BEGIN KEY-----");
        let cred = RemoteCredential::from_secret(&secret).unwrap();
        assert_eq!(cred.username, "ubuntu");
        assert!(!format!("{cred:?}").contains("BEGIN"));
    }

    #[test]
    fn credential_missing_key() {
        let secret = Secret::new("default", "sshCredential").with(SSH_USERNAME_KEY, "ubuntu");
        let err = RemoteCredential::from_secret(&secret).unwrap_err();
        assert!(matches!(err, RemoteError::Credential { reason, .. } if reason.contains("ssh-privatekey")));
    }
}
