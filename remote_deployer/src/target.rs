use core::fmt;
use std::{
    fmt::{Debug, Display},
    net::Ipv4Addr,
    path::PathBuf,
    time::Duration,
};

/// How the remote user authenticates
#[derive(Clone, PartialEq, Eq)]
pub enum Secret {
    /// Plain password authentication
    Password(String),
    /// Public key authentication using a private key file, with an optional
    /// passphrase for an encrypted key
    IdentityFile {
        path: PathBuf,
        passphrase: Option<String>,
    },
}

// passwords and passphrases must never end up in logs or error stacks
impl Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Secret::Password(_) => f.write_str("Password(<redacted>)"),
            Secret::IdentityFile { path, passphrase } => f
                .debug_struct("IdentityFile")
                .field("path", path)
                .field(
                    "passphrase",
                    &passphrase.as_ref().map(|_| "<redacted>"),
                )
                .finish(),
        }
    }
}

impl Secret {
    /// Returns `Self::Password` with the argument
    pub fn password(password: impl AsRef<str>) -> Self {
        Self::Password(password.as_ref().to_owned())
    }

    /// Returns `Self::IdentityFile` without a passphrase
    pub fn identity_file(path: impl Into<PathBuf>) -> Self {
        Self::IdentityFile {
            path: path.into(),
            passphrase: None,
        }
    }
}

/// The single host that one invocation provisions. This is constructed once
/// from validated input and never changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: Ipv4Addr,
    pub port: u16,
    pub user: String,
    pub secret: Secret,
}

impl Target {
    /// Creates a `Target` on the default ssh port 22
    pub fn new(host: Ipv4Addr, user: impl AsRef<str>, secret: Secret) -> Self {
        Self {
            host,
            port: 22,
            user: user.as_ref().to_owned(),
            secret,
        }
    }

    /// Sets a different ssh port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Returns the `host:port` socket address string
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

/// What to do with the host key presented by the server
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Every host key is trusted. Keys not seen before are added to the
    /// in-memory known hosts of the session and a warning with the fingerprint
    /// is logged. Nothing is written to disk.
    ///
    /// This is the permissive behavior that avoids an interactive trust prompt,
    /// it does not protect against a man-in-the-middle.
    #[default]
    AcceptAny,
    /// The host key must match an entry of this OpenSSH `known_hosts` file,
    /// unknown and mismatched keys fail the connection.
    KnownHosts(PathBuf),
}

/// Transport level configuration of a `RemoteShell`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub host_key_policy: HostKeyPolicy,
    /// Limit on establishing the TCP connection
    pub connect_timeout: Duration,
    /// Limit on any single blocking session call once connected. `None` means
    /// a hung remote command hangs the whole run.
    pub command_timeout: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            host_key_policy: HostKeyPolicy::default(),
            connect_timeout: Duration::from_secs(30),
            command_timeout: None,
        }
    }
}

impl SessionOptions {
    /// Sets `host_key_policy`
    pub fn host_key_policy(mut self, host_key_policy: HostKeyPolicy) -> Self {
        self.host_key_policy = host_key_policy;
        self
    }

    /// Sets `connect_timeout`
    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Sets `command_timeout`
    pub fn command_timeout(mut self, command_timeout: Option<Duration>) -> Self {
        self.command_timeout = command_timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_credentials() {
        let target = Target::new(Ipv4Addr::new(10, 0, 0, 7), "root", Secret::password("hunter2"));
        let dbg = format!("{target:?}");
        assert!(!dbg.contains("hunter2"));
        assert!(dbg.contains("<redacted>"));

        let secret = Secret::IdentityFile {
            path: "/home/op/.ssh/id_ed25519".into(),
            passphrase: Some("open sesame".to_owned()),
        };
        let dbg = format!("{secret:?}");
        assert!(!dbg.contains("open sesame"));
        assert!(dbg.contains("id_ed25519"));
    }

    #[test]
    fn display_and_address() {
        let target =
            Target::new(Ipv4Addr::new(192, 168, 1, 20), "deploy", Secret::password("x")).port(2222);
        assert_eq!(target.to_string(), "deploy@192.168.1.20:2222");
        assert_eq!(target.socket_address(), "192.168.1.20:2222");
    }
}
