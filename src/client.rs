//! Client session: dial the server, authenticate, then bridge the virtual
//! interface onto the tunnel.

use crate::channel::SessionChannel;
use crate::config::{ClientAuth, ClientConfig};
use crate::device::TunOptions;
use crate::encoder::build_chain;
use crate::error::{Result, TunError};
use crate::forward;
use crate::packet::{AuthInfo, AuthResult, NatInfo, Packet};
use crate::tunnel::TcpClientTunnel;

pub struct Client {
    config: ClientConfig,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Run the client until the tunnel ends. Connects, authenticates, brings
    /// up the virtual interface with the server-assigned addresses, and
    /// forwards packets until either side stops.
    pub async fn run(&self) -> Result<()> {
        let chain = build_chain(&self.config.packet.encoders)?;
        let tunnel = TcpClientTunnel::connect(&self.config.tunnel, chain).await?;
        let mut session = tunnel.start();

        let nat = authenticate(&mut session, &self.config.auth).await?;
        log::info!(
            "authenticated, assigned {} via gateway {}",
            nat.client_ip,
            nat.gateway
        );

        let (reader, writer) = TunOptions::client_side(&nat).open()?;
        forward::run(session, reader, writer).await
    }
}

/// Perform the authentication exchange: one auth packet out, one reply in.
pub(crate) async fn authenticate(
    session: &mut SessionChannel,
    auth: &ClientAuth,
) -> Result<NatInfo> {
    let info = AuthInfo {
        username: auth.username.clone(),
        password: auth.password.clone(),
    };
    session.send(Packet::auth(&info)?).await?;

    let reply = session.recv().await?;
    let result: AuthResult = reply.payload()?;
    if !result.ok {
        return Err(TunError::Auth(result.message));
    }
    result
        .nat
        .ok_or_else(|| TunError::Protocol("auth reply accepted but carried no addresses".into()))
}
