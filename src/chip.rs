//! One WiFi chip: an MPIF broker, a PHY and a MAC wired together, plus the
//! user-facing send/activate/shutdown surface.

use std::net::SocketAddr;

use tokio::sync::watch;
use tracing::info;

use crate::error::LinkError;
use crate::mac::{AuthAlgorithm, LinkStatus, Mac, MacCommand, MacConfig};
use crate::mpif::Mpif;
use crate::parameters::{Parameters, WEP_KEYS};
use crate::phy::Phy;
use crate::{MacAddr, PhyRate, Role};

/// Construction parameters of one chip.
#[derive(Debug, Clone)]
pub struct ChipConfig {
    pub role: Role,
    pub identifier: String,
    /// Address of the shared channel server.
    pub channel_addr: SocketAddr,
    pub parameters: Parameters,
    pub authentication_algorithm: AuthAlgorithm,
    pub wep_keys: [[u8; 5]; 4],
    pub phy_rate: PhyRate,
    pub fixed_rate: bool,
    pub always_rts_cts: bool,
}

impl ChipConfig {
    pub fn new(role: Role, identifier: impl Into<String>, channel_addr: SocketAddr) -> Self {
        ChipConfig {
            role,
            identifier: identifier.into(),
            channel_addr,
            parameters: Parameters::default(),
            authentication_algorithm: AuthAlgorithm::OpenSystem,
            wep_keys: WEP_KEYS,
            phy_rate: PhyRate::R6,
            fixed_rate: false,
            always_rts_cts: false,
        }
    }
}

/// A wired chip. Construction connects all three blocks; [`Chip::activate`]
/// starts the role-specific advertisement (beaconing as AP, scanning as
/// STA).
pub struct Chip {
    identifier: String,
    mpif: Mpif,
    phy: Phy,
    mac: Mac,
}

impl Chip {
    pub async fn new(config: ChipConfig) -> Result<Chip, LinkError> {
        info!(identifier = %config.identifier, role = ?config.role, "establishing chip");
        let mpif = Mpif::bind().await?;
        let phy = Phy::spawn(
            config.identifier.clone(),
            mpif.local_addr(),
            config.channel_addr,
        )
        .await?;
        let mac = Mac::spawn(
            MacConfig {
                role: config.role,
                identifier: config.identifier.clone(),
                parameters: config.parameters,
                authentication_algorithm: config.authentication_algorithm,
                wep_keys: config.wep_keys,
                phy_rate: config.phy_rate,
                fixed_rate: config.fixed_rate,
                always_rts_cts: config.always_rts_cts,
            },
            mpif.local_addr(),
        )
        .await?;
        Ok(Chip {
            identifier: config.identifier,
            mpif,
            phy,
            mac,
        })
    }

    /// Start beaconing (AP) or scanning (STA).
    pub fn activate(&self) {
        self.mac.command(MacCommand::Activate);
    }

    pub fn address(&self) -> MacAddr {
        self.mac.address()
    }

    /// Observable MAC state; await changes with `watch::Receiver::wait_for`.
    pub fn status(&self) -> watch::Receiver<LinkStatus> {
        self.mac.status()
    }

    /// Encode `text` as UTF-8 and queue it as an acknowledged data frame
    /// toward the currently associated peer.
    pub fn send_text(&self, text: &str) {
        info!(identifier = %self.identifier, octets = text.len(), "sending text");
        self.mac.command(MacCommand::SendData {
            payload: text.as_bytes().to_vec(),
        });
    }

    /// Queue a data frame toward an explicit destination.
    pub fn send_data_frame(&self, destination: MacAddr, payload: Vec<u8>) {
        self.mac.command(MacCommand::SendDataTo {
            destination,
            payload,
        });
    }

    /// Pre-seed a mutual association with `peer`, bypassing the air
    /// exchange. Intended for harnesses that start from a joined state.
    pub fn install_association(&self, peer: MacAddr, algorithm: AuthAlgorithm) {
        self.mac.command(MacCommand::InstallAssociation { peer, algorithm });
    }

    /// Cooperative shutdown: flush the MAC queue, then close all three
    /// endpoints.
    pub fn shutdown(&self) {
        info!(identifier = %self.identifier, "chip shutdown");
        self.mac.command(MacCommand::Shutdown);
        self.phy.shutdown();
        self.mpif.shutdown();
    }
}
