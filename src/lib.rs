//! IEEE 802.11a/g stack simulation based on the IEEE Std 802.11-2020 OFDM PHY
//! (Clause 17) and the pre-RSN MAC procedures.
//!
//! A [`chip::Chip`] bundles one MAC, one PHY and an intra-chip message broker
//! ([`mpif`]). Several chips connect to one shared [`channel::Channel`], which
//! convolves every transmitted baseband frame with an impulse response and
//! adds complex Gaussian noise. A chip plays either the AP or the STA role;
//! the two sides discover, authenticate, associate and exchange acknowledged
//! data frames over the air interface, bit-exact to the standard's
//! scrambling, convolutional coding, interleaving and OFDM modulation.

pub mod parameters;

pub use parameters::*;

pub mod channel;
pub mod chip;
pub mod error;
pub mod mac;
pub mod message;
pub mod mpif;
pub mod phy;

/// A 48-bit MAC address.
///
/// One structural byte-sequence type for every comparison and map key; the
/// broadcast address is [`MacAddr::BROADCAST`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xFF; 6]);

    /// Generate a random locally administered unicast address.
    ///
    /// The low two bits of the first octet are forced to `10`: bit 0 clear
    /// (unicast), bit 1 set (locally administered).
    pub fn generate() -> MacAddr {
        let mut octets: [u8; 6] = rand::random();
        octets[0] = (octets[0] & 0b1111_1100) | 0b0000_0010;
        MacAddr(octets)
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(octets: [u8; 6]) -> Self {
        MacAddr(octets)
    }
}

impl core::fmt::Display for MacAddr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl core::fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(self, f)
    }
}

/// Role a chip plays on the shared medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Access point: broadcasts beacons, authenticates and associates
    /// stations, sends downlink data.
    Ap,
    /// Station: scans for an access point, authenticates, associates, sends
    /// uplink data.
    Sta,
}

/// Nominal PHY rate in Mb/s; index into the modulation-and-coding table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhyRate {
    R6,
    R9,
    R12,
    R18,
    R24,
    R36,
    R48,
    R54,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateOutOfRange(pub u64);

impl PhyRate {
    /// All legal rates, slowest first. Rate selection walks this ladder.
    pub const LADDER: [PhyRate; 8] = [
        PhyRate::R6,
        PhyRate::R9,
        PhyRate::R12,
        PhyRate::R18,
        PhyRate::R24,
        PhyRate::R36,
        PhyRate::R48,
        PhyRate::R54,
    ];

    pub const fn mbps(&self) -> u64 {
        match *self {
            PhyRate::R6 => 6,
            PhyRate::R9 => 9,
            PhyRate::R12 => 12,
            PhyRate::R18 => 18,
            PhyRate::R24 => 24,
            PhyRate::R36 => 36,
            PhyRate::R48 => 48,
            PhyRate::R54 => 54,
        }
    }

    /// One step down the ladder, saturating at 6 Mb/s.
    pub fn step_down(&self) -> PhyRate {
        let i = Self::LADDER.iter().position(|r| r == self).unwrap_or(0);
        Self::LADDER[i.saturating_sub(1)]
    }

    /// One step up the ladder, saturating at 54 Mb/s.
    pub fn step_up(&self) -> PhyRate {
        let i = Self::LADDER.iter().position(|r| r == self).unwrap_or(0);
        Self::LADDER[(i + 1).min(Self::LADDER.len() - 1)]
    }
}

impl TryFrom<u64> for PhyRate {
    type Error = RateOutOfRange;

    fn try_from(mbps: u64) -> Result<Self, Self::Error> {
        Ok(match mbps {
            6 => PhyRate::R6,
            9 => PhyRate::R9,
            12 => PhyRate::R12,
            18 => PhyRate::R18,
            24 => PhyRate::R24,
            36 => PhyRate::R36,
            48 => PhyRate::R48,
            54 => PhyRate::R54,
            other => return Err(RateOutOfRange(other)),
        })
    }
}
