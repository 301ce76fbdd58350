//! OpenSSH-backed transport.
//!
//! Each remote call spawns the system `ssh` binary and blocks until it exits.
//! The private key and, when host keys are known, a `known_hosts` file live
//! in a per-session temp directory that is removed when the client drops.
//!
//! Without host public keys the session runs with
//! `StrictHostKeyChecking=no` and a warning is logged.

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tempfile::TempDir;
use tracing::{debug, warn};

use sshgrid_core::config::SshClientConfig;
use sshgrid_core::SshConfig;

use crate::client::{CommandOutput, Connector, MachineClient, RemoteCredential};
use crate::error::{RemoteError, RemoteResult};

/// Opens [`SshClient`] sessions using the settings from `[ssh]`.
#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    settings: SshClientConfig,
}

impl SshConnector {
    pub fn new(settings: SshClientConfig) -> Self {
        Self { settings }
    }
}

impl Connector for SshConnector {
    fn connect(
        &self,
        ssh: &SshConfig,
        credential: RemoteCredential,
    ) -> RemoteResult<Box<dyn MachineClient>> {
        let client = SshClient::new(ssh, credential, &self.settings)?;
        // Establish the session up front so an unreachable machine fails here
        // rather than halfway through a workflow.
        client.run_command("true").map_err(|e| {
            let reason = match std::error::Error::source(&e) {
                Some(cause) => format!("{e}: {cause}"),
                None => e.to_string(),
            };
            RemoteError::Connect {
                host: ssh.host.clone(),
                port: ssh.port,
                reason,
            }
        })?;
        debug!(host = %ssh.host, port = ssh.port, "ssh session established");
        Ok(Box::new(client))
    }
}

/// One SSH session, materialized as a set of `ssh` arguments.
pub struct SshClient {
    host: String,
    port: u16,
    username: String,
    binary: String,
    connect_timeout_secs: u64,
    use_sudo: bool,
    key_path: PathBuf,
    known_hosts: Option<PathBuf>,
    _workdir: TempDir,
}

impl SshClient {
    pub fn new(
        ssh: &SshConfig,
        credential: RemoteCredential,
        settings: &SshClientConfig,
    ) -> RemoteResult<Self> {
        let workdir = tempfile::Builder::new()
            .prefix("sshgrid-ssh-")
            .tempdir()
            .map_err(|e| RemoteError::io("unable to create ssh session directory", e))?;

        let key_path = workdir.path().join("id");
        write_private(&key_path, credential.private_key.as_bytes())?;

        let known_hosts = if ssh.public_keys.is_empty() {
            warn!(
                host = %ssh.host,
                "not able to verify machine SSH identity: no public keys given, continuing"
            );
            None
        } else {
            let path = workdir.path().join("known_hosts");
            let pattern = if ssh.port == 22 {
                ssh.host.clone()
            } else {
                format!("[{}]:{}", ssh.host, ssh.port)
            };
            let lines: String = ssh
                .public_keys
                .iter()
                .map(|key| format!("{pattern} {}\n", key.trim()))
                .collect();
            write_private(&path, lines.as_bytes())?;
            Some(path)
        };

        Ok(Self {
            host: ssh.host.clone(),
            port: ssh.port,
            username: credential.username,
            binary: settings.binary.clone(),
            connect_timeout_secs: settings.connect_timeout_secs,
            use_sudo: settings.use_sudo,
            key_path,
            known_hosts,
            _workdir: workdir,
        })
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-p")
            .arg(self.port.to_string())
            .arg("-i")
            .arg(&self.key_path)
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg("IdentitiesOnly=yes")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout_secs));
        match &self.known_hosts {
            Some(path) => {
                cmd.arg("-o")
                    .arg("StrictHostKeyChecking=yes")
                    .arg("-o")
                    .arg(format!("UserKnownHostsFile={}", path.display()));
            }
            None => {
                cmd.arg("-o")
                    .arg("StrictHostKeyChecking=no")
                    .arg("-o")
                    .arg("UserKnownHostsFile=/dev/null");
            }
        }
        cmd.arg(format!("{}@{}", self.username, self.host));
        cmd
    }

    fn exec(&self, command: &str, stdin: Option<&[u8]>) -> RemoteResult<CommandOutput> {
        let mut cmd = self.base_command();
        cmd.arg(command);
        debug!(host = %self.host, %command, "running remote command");

        let output = match stdin {
            None => cmd
                .stdin(Stdio::null())
                .output()
                .map_err(|e| RemoteError::io(format!("failed to execute {}", self.binary), e))?,
            Some(data) => {
                let mut child = cmd
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .spawn()
                    .map_err(|e| {
                        RemoteError::io(format!("failed to execute {}", self.binary), e)
                    })?;
                if let Some(mut pipe) = child.stdin.take() {
                    pipe.write_all(data)
                        .map_err(|e| RemoteError::io("failed to stream file to ssh", e))?;
                }
                child
                    .wait_with_output()
                    .map_err(|e| RemoteError::io("failed to wait for ssh", e))?
            }
        };

        if !output.status.success() {
            return Err(RemoteError::Command {
                host: self.host.clone(),
                command: command.to_string(),
                status: output.status.to_string(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(CommandOutput {
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn privileged(&self, command: String) -> String {
        if self.use_sudo {
            format!("sudo {command}")
        } else {
            command
        }
    }
}

impl MachineClient for SshClient {
    fn host(&self) -> &str {
        &self.host
    }

    fn run_command(&self, command: &str) -> RemoteResult<CommandOutput> {
        self.exec(command, None)
    }

    fn read_file(&self, path: &str) -> RemoteResult<Vec<u8>> {
        let command = self.privileged(format!("cat {}", shell_quote(path)));
        Ok(self.exec(&command, None)?.stdout)
    }

    fn write_file(&self, path: &str, mode: u32, data: &[u8]) -> RemoteResult<()> {
        let quoted = shell_quote(path);
        let command = format!("cat > {quoted} && chmod {mode:o} {quoted}");
        self.exec(&command, Some(data)).map(|_| ())
    }

    fn mkdir_all(&self, path: &str, mode: u32) -> RemoteResult<()> {
        let command = self.privileged(format!("mkdir -p -m {mode:o} {}", shell_quote(path)));
        self.exec(&command, None).map(|_| ())
    }

    fn move_file(&self, src: &str, dst: &str) -> RemoteResult<()> {
        let command = self.privileged(format!("mv {} {}", shell_quote(src), shell_quote(dst)));
        self.exec(&command, None).map(|_| ())
    }
}

fn write_private(path: &std::path::Path, data: &[u8]) -> RemoteResult<()> {
    std::fs::write(path, data)
        .map_err(|e| RemoteError::io(format!("unable to write {}", path.display()), e))?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| RemoteError::io(format!("unable to chmod {}", path.display()), e))
}

/// Single-quote a string for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ssh_config(public_keys: Vec<String>, port: u16) -> SshConfig {
        SshConfig {
            host: "10.0.0.7".to_string(),
            port,
            public_keys,
            credential_secret: "sshCredential".to_string(),
        }
    }

    fn credential() -> RemoteCredential {
        RemoteCredential {
            username: "ubuntu".to_string(),
            private_key: "PRIVATE".to_string(),
        }
    }

    fn args(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn quote_escapes_single_quotes() {
        assert_eq!(shell_quote("/tmp/a b"), "'/tmp/a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn insecure_mode_without_public_keys() {
        let client =
            SshClient::new(&ssh_config(vec![], 22), credential(), &SshClientConfig::default())
                .unwrap();
        let args = args(&client.base_command());
        assert!(args.contains(&"StrictHostKeyChecking=no".to_string()));
        assert!(args.contains(&"UserKnownHostsFile=/dev/null".to_string()));
        assert_eq!(args.last().unwrap(), "ubuntu@10.0.0.7");
    }

    #[test]
    fn known_hosts_written_from_public_keys() {
        let keys = vec!["ssh-ed25519 AAAAC3Nza host\n".to_string()];
        let client =
            SshClient::new(&ssh_config(keys, 2222), credential(), &SshClientConfig::default())
                .unwrap();
        let known_hosts = client.known_hosts.as_ref().unwrap();
        let content = std::fs::read_to_string(known_hosts).unwrap();
        assert_eq!(content, "[10.0.0.7]:2222 ssh-ed25519 AAAAC3Nza host\n");
        assert!(args(&client.base_command()).contains(&"StrictHostKeyChecking=yes".to_string()));
    }

    #[test]
    fn private_key_file_is_owner_only() {
        let client =
            SshClient::new(&ssh_config(vec![], 22), credential(), &SshClientConfig::default())
                .unwrap();
        let meta = std::fs::metadata(&client.key_path).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
        assert_eq!(std::fs::read_to_string(&client.key_path).unwrap(), "PRIVATE");
    }

    #[test]
    fn sudo_prefix_follows_settings() {
        let settings = SshClientConfig {
            use_sudo: false,
            ..SshClientConfig::default()
        };
        let client = SshClient::new(&ssh_config(vec![], 22), credential(), &settings).unwrap();
        assert_eq!(client.privileged("mv a b".to_string()), "mv a b");

        let client =
            SshClient::new(&ssh_config(vec![], 22), credential(), &SshClientConfig::default())
                .unwrap();
        assert_eq!(client.privileged("mv a b".to_string()), "sudo mv a b");
    }

    #[test]
    fn missing_binary_is_io_error() {
        let settings = SshClientConfig {
            binary: "/nonexistent/ssh".to_string(),
            ..SshClientConfig::default()
        };
        let client = SshClient::new(&ssh_config(vec![], 22), credential(), &settings).unwrap();
        let err = client.run_command("true").unwrap_err();
        assert!(matches!(err, RemoteError::Io { .. }));
    }
}
