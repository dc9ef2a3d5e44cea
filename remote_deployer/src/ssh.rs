use core::fmt;
use std::{
    fmt::{Debug, Write as _},
    io::Read,
    net::{SocketAddr, TcpStream},
};

use ssh2::{CheckResult, HashType, KnownHostFileKind, Session};
use stacked_errors::{bail, bail_locationless, Result, StackableErr};
use tokio::task;
use tracing::{debug, trace};

use crate::{HostKeyPolicy, RawOutput, RemoteShell, Secret, SessionOptions, Target};

/// [RemoteShell] backed by a libssh2 session.
///
/// libssh2 calls block, so each of them is moved onto the blocking thread pool
/// together with the session and the session is handed back afterwards.
pub struct SshSession {
    options: SessionOptions,
    session: Option<Session>,
    fingerprint: Option<String>,
}

impl Debug for SshSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshSession")
            .field("options", &self.options)
            .field("connected", &self.session.is_some())
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

impl SshSession {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            options,
            session: None,
            fingerprint: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// The SHA256 fingerprint of the host key of the last connection
    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }
}

impl Default for SshSession {
    fn default() -> Self {
        Self::new(SessionOptions::default())
    }
}

impl RemoteShell for SshSession {
    #[tracing::instrument(skip_all, fields(target = %target))]
    async fn connect(&mut self, target: &Target) -> Result<()> {
        if self.session.is_some() {
            bail!("SshSession::connect -> already connected")
        }
        let target = target.clone();
        let options = self.options.clone();
        let (session, fingerprint) =
            task::spawn_blocking(move || connect_blocking(&target, &options))
                .await
                .stack()??;
        debug!(fingerprint = %fingerprint, "ssh session established");
        self.session = Some(session);
        self.fingerprint = Some(fingerprint);
        Ok(())
    }

    async fn run(&mut self, command: &str) -> Result<RawOutput> {
        let session = self
            .session
            .take()
            .stack_err_locationless("SshSession::run -> not connected")?;
        trace!(command, "running remote command");
        let command = command.to_owned();
        let (session, res) = task::spawn_blocking(move || {
            let res = run_blocking(&session, &command);
            (session, res)
        })
        .await
        .stack()?;
        self.session = Some(session);
        res
    }

    async fn close(&mut self) -> Result<()> {
        let Some(session) = self.session.take() else {
            return Ok(())
        };
        task::spawn_blocking(move || {
            session
                .disconnect(None, "deployment finished", None)
                .stack_err("SshSession::close -> disconnect failed")
        })
        .await
        .stack()??;
        debug!("ssh session closed");
        Ok(())
    }

    fn connection_warning(&self) -> Option<String> {
        if self.session.is_none() {
            return None
        }
        unverified_key_warning(&self.options.host_key_policy, self.fingerprint.as_deref()?)
    }
}

fn unverified_key_warning(policy: &HostKeyPolicy, fingerprint: &str) -> Option<String> {
    match policy {
        HostKeyPolicy::AcceptAny => {
            Some(format!("trusting host key {fingerprint} without verification"))
        }
        HostKeyPolicy::KnownHosts(_) => None,
    }
}

fn connect_blocking(target: &Target, options: &SessionOptions) -> Result<(Session, String)> {
    let address = SocketAddr::from((target.host, target.port));
    let tcp = TcpStream::connect_timeout(&address, options.connect_timeout)
        .stack_err_with_locationless(|| format!("failed to reach {address}"))?;

    let mut session = Session::new().stack_err("failed to initialize ssh session")?;
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .stack_err_with_locationless(|| format!("ssh handshake with {address} failed"))?;
    // zero disables the timeout
    let timeout_ms = options
        .command_timeout
        .map(|t| u32::try_from(t.as_millis()).unwrap_or(u32::MAX).max(1))
        .unwrap_or(0);
    session.set_timeout(timeout_ms);

    let fingerprint = verify_host_key(&session, target, &options.host_key_policy)?;

    let auth = match &target.secret {
        Secret::Password(password) => session.userauth_password(&target.user, password),
        Secret::IdentityFile { path, passphrase } => {
            if !path.is_file() {
                bail_locationless!("identity file {path:?} does not exist")
            }
            session.userauth_pubkey_file(&target.user, None, path, passphrase.as_deref())
        }
    };
    auth.stack_err_with_locationless(|| {
        format!("authentication as \"{}\" rejected by {address}", target.user)
    })?;
    if !session.authenticated() {
        bail_locationless!("authentication as \"{}\" rejected by {address}", target.user)
    }
    Ok((session, fingerprint))
}

fn verify_host_key(session: &Session, target: &Target, policy: &HostKeyPolicy) -> Result<String> {
    let host = target.host.to_string();
    let (key, key_type) = session
        .host_key()
        .stack_err_locationless("server did not present a host key")?;
    let fingerprint = fingerprint(session);
    let mut known_hosts = session.known_hosts().stack()?;
    match policy {
        HostKeyPolicy::AcceptAny => {
            // the operator is warned through `connection_warning` once the
            // connection indicator is gone
            debug!(
                host = %host,
                fingerprint = %fingerprint,
                "trusting host key without verification"
            );
            // only the in-memory collection of this session, nothing is written
            known_hosts
                .add(&host, key, "remote_deployer", key_type.into())
                .stack_err("failed to record host key")?;
        }
        HostKeyPolicy::KnownHosts(path) => {
            known_hosts
                .read_file(path, KnownHostFileKind::OpenSSH)
                .stack_err_with_locationless(|| format!("failed to read known hosts {path:?}"))?;
            match known_hosts.check_port(&host, target.port, key) {
                CheckResult::Match => (),
                CheckResult::NotFound => bail_locationless!(
                    "host key {fingerprint} of {host} is not in {path:?}"
                ),
                CheckResult::Mismatch => bail_locationless!(
                    "host key {fingerprint} of {host} does not match the entry in {path:?}"
                ),
                CheckResult::Failure => {
                    bail_locationless!("failed to check the host key of {host} against {path:?}")
                }
            }
        }
    }
    Ok(fingerprint)
}

fn fingerprint(session: &Session) -> String {
    let mut s = String::from("SHA256:");
    if let Some(hash) = session.host_key_hash(HashType::Sha256) {
        for (i, byte) in hash.iter().enumerate() {
            if i != 0 {
                s.push(':');
            }
            let _ = write!(s, "{byte:02x}");
        }
    }
    s
}

fn run_blocking(session: &Session, command: &str) -> Result<RawOutput> {
    let mut channel = session
        .channel_session()
        .stack_err("failed to open ssh channel")?;
    channel
        .exec(command)
        .stack_err_with_locationless(|| format!("failed to start `{command}`"))?;
    let mut stdout = Vec::new();
    channel
        .read_to_end(&mut stdout)
        .stack_err_with_locationless(|| format!("failed to read stdout of `{command}`"))?;
    let mut stderr = Vec::new();
    channel
        .stderr()
        .read_to_end(&mut stderr)
        .stack_err_with_locationless(|| format!("failed to read stderr of `{command}`"))?;
    channel
        .wait_close()
        .stack_err_with_locationless(|| format!("failed to close channel of `{command}`"))?;
    Ok(RawOutput {
        stdout,
        stderr,
        exit_status: channel.exit_status().ok(),
    })
}

#[cfg(test)]
mod tests {
    use std::{net::Ipv4Addr, time::Duration};

    use super::*;

    #[tokio::test]
    async fn unconnected_session() {
        let mut session = SshSession::default();
        assert!(!session.is_connected());
        assert!(session.fingerprint().is_none());
        assert!(session.run("ls").await.is_err());
        assert!(session.connection_warning().is_none());
        // closing something never opened is fine
        session.close().await.unwrap();
    }

    #[test]
    fn only_unverified_keys_warn() {
        let warning = unverified_key_warning(&HostKeyPolicy::AcceptAny, "SHA256:ab:cd").unwrap();
        assert_eq!(warning, "trusting host key SHA256:ab:cd without verification");
        let strict = HostKeyPolicy::KnownHosts("/root/.ssh/known_hosts".into());
        assert!(unverified_key_warning(&strict, "SHA256:ab:cd").is_none());
    }

    #[tokio::test]
    async fn unreachable_host_is_a_connection_error() {
        // nothing listens on port 1 of the loopback
        let target = Target::new(Ipv4Addr::LOCALHOST, "root", Secret::password("root")).port(1);
        let mut session =
            SshSession::new(SessionOptions::default().connect_timeout(Duration::from_secs(2)));
        assert!(session.connect(&target).await.is_err());
        assert!(!session.is_connected());
    }
}
