//! MPIF: the per-chip broker between the MAC and PHY endpoints.
//!
//! Accepts exactly two inbound connections, identified by their first
//! message (`MAC` or `PHY`), then pipes whole length-delimited messages in
//! both directions without interpreting them.

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::message::{self, Primitive, WireStream};

pub struct Mpif {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl Mpif {
    /// Bind an ephemeral localhost endpoint and wait for the two clients.
    pub async fn bind() -> std::io::Result<Mpif> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let local_addr = listener.local_addr()?;
        debug!(%local_addr, "MPIF listening");
        let task = tokio::spawn(accept_pair(listener));
        Ok(Mpif { local_addr, task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for Mpif {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_pair(listener: TcpListener) {
    let mut mac: Option<WireStream> = None;
    let mut phy: Option<WireStream> = None;

    while mac.is_none() || phy.is_none() {
        let (socket, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(error) => {
                error!(%error, "MPIF accept failed");
                return;
            }
        };
        let mut stream = message::wire(socket);
        let identity = match stream.next().await {
            Some(Ok(frame)) => Primitive::decode(&frame).ok().flatten(),
            _ => None,
        };
        match identity {
            Some(Primitive::MacIdentify) if mac.is_none() => {
                debug!(%peer, "MAC endpoint connected");
                mac = Some(stream);
            }
            Some(Primitive::PhyIdentify) if phy.is_none() => {
                debug!(%peer, "PHY endpoint connected");
                phy = Some(stream);
            }
            other => {
                warn!(%peer, ?other, "unidentified MPIF client, closing");
            }
        }
    }

    let (mac_sink, mac_stream) = mac.expect("identified above").split();
    let (phy_sink, phy_stream) = phy.expect("identified above").split();
    debug!("both endpoints connected, relaying");
    tokio::join!(relay(mac_stream, phy_sink), relay(phy_stream, mac_sink));
}

/// Forward whole frames until either side goes away.
async fn relay(mut from: SplitStream<WireStream>, mut to: SplitSink<WireStream, Bytes>) {
    while let Some(frame) = from.next().await {
        let Ok(frame) = frame else { break };
        if to.send(frame.freeze()).await.is_err() {
            break;
        }
    }
}
