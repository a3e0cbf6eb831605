//! Server: accept sessions, authenticate clients, assign addresses, and
//! bridge each authenticated session onto its own virtual interface.

use crate::channel::SessionChannel;
use crate::config::ServerConfig;
use crate::device::TunOptions;
use crate::encoder::build_chain;
use crate::error::{Result, TunError};
use crate::forward;
use crate::packet::{AuthInfo, AuthResult, NatInfo, Packet};
use crate::pool::IpPool;
use crate::tunnel::TcpServerTunnel;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Credential backend.
pub trait UserLookup: Send + Sync + 'static {
    fn check(&self, username: &str, password: &str) -> bool;
}

/// Line-oriented `user password` credentials file.
///
/// Read on every check, so edits take effect without a restart. Empty lines
/// and lines starting with `#` are skipped; the first line whose username
/// matches decides the outcome.
pub struct FileUsers {
    path: PathBuf,
}

impl FileUsers {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl UserLookup for FileUsers {
    fn check(&self, username: &str, password: &str) -> bool {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) => {
                log::error!("cannot read users file {}: {err}", self.path.display());
                return false;
            }
        };
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let (Some(user), Some(pass)) = (fields.next(), fields.next()) else {
                continue;
            };
            if user == username {
                return pass == password;
            }
        }
        false
    }
}

pub struct Server {
    config: ServerConfig,
    users: Arc<dyn UserLookup>,
    pool: Arc<Mutex<IpPool>>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Result<Self> {
        check_users_file(&config.auth.users)?;
        let pool = IpPool::new(config.nat.net, config.nat.gateway)?;
        let users = Arc::new(FileUsers::new(&config.auth.users));
        Ok(Self {
            config,
            users,
            pool: Arc::new(Mutex::new(pool)),
        })
    }

    /// Accept loop. Each connection gets its own task; a failed session only
    /// logs, the listener keeps running.
    pub async fn run(&self) -> Result<()> {
        let chain = build_chain(&self.config.packet.encoders)?;
        let tunnel = TcpServerTunnel::bind(&self.config.tunnel, chain).await?;

        loop {
            let session = tunnel.accept().await?;

            let users = self.users.clone();
            let pool = self.pool.clone();
            let nat = self.config.nat.clone();
            tokio::spawn(async move {
                let result = handle_session(session, users, pool, nat.gateway, nat.net.netmask(), nat.mtu).await;
                match result {
                    Ok(()) => log::info!("session ended"),
                    Err(err) => log::error!("session failed: {err}"),
                }
            });
        }
    }
}

async fn handle_session(
    mut session: SessionChannel,
    users: Arc<dyn UserLookup>,
    pool: Arc<Mutex<IpPool>>,
    gateway: Ipv4Addr,
    netmask: Ipv4Addr,
    mtu: u16,
) -> Result<()> {
    let nat = authenticate(&mut session, users.as_ref(), &pool, gateway, netmask, mtu).await?;
    log::info!("client authenticated, assigned {}", nat.client_ip);

    let (reader, writer) = TunOptions::gateway_side(&nat, mtu).open()?;
    forward::run(session, reader, writer).await
}

/// Server half of the handshake: expect one auth packet, reply exactly once.
///
/// A malformed request gets no reply; the peer learns of the failure from
/// the closing connection.
pub(crate) async fn authenticate(
    session: &mut SessionChannel,
    users: &dyn UserLookup,
    pool: &Mutex<IpPool>,
    gateway: Ipv4Addr,
    netmask: Ipv4Addr,
    mtu: u16,
) -> Result<NatInfo> {
    let request = session.recv().await?;
    let info: AuthInfo = request.payload()?;

    // A full pool answers every client the same way, before credentials are
    // even looked at.
    if pool.lock().unwrap_or_else(PoisonError::into_inner).is_empty() {
        session
            .send(Packet::auth(&AuthResult::rejected("ip used up"))?)
            .await?;
        return Err(TunError::PoolExhausted);
    }

    if !users.check(&info.username, &info.password) {
        session
            .send(Packet::auth(&AuthResult::rejected("invalid user"))?)
            .await?;
        return Err(TunError::Auth(format!(
            "rejected credentials for {}",
            info.username
        )));
    }

    // Allocate only after the credentials pass; rejected attempts must not
    // burn addresses. The pool may still come up empty here if another
    // session won the race for the last address.
    let client_ip = pool
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .next();
    let Some(client_ip) = client_ip else {
        session
            .send(Packet::auth(&AuthResult::rejected("ip used up"))?)
            .await?;
        return Err(TunError::PoolExhausted);
    };

    let nat = NatInfo {
        client_ip,
        gateway,
        netmask,
        mtu: Some(mtu),
    };
    session.send(Packet::auth(&AuthResult::accepted(nat))?).await?;
    Ok(nat)
}

/// Fail fast on a missing users file at startup instead of at the first
/// handshake.
fn check_users_file(path: &Path) -> Result<()> {
    std::fs::metadata(path).map_err(|e| {
        TunError::config_invalid(
            "auth.users",
            format!("{}: {e}", path.display()),
        )
    })?;
    Ok(())
}
