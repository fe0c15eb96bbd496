//! End-to-end scenarios over real sockets: one channel server, one AP chip,
//! one STA chip, everything exchanged as OFDM baseband samples.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use dot11::channel::Channel;
use dot11::chip::{Chip, ChipConfig};
use dot11::mac::{AuthAlgorithm, LinkStatus};
use dot11::{PhyRate, Role};
use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::{sleep, timeout};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn local() -> SocketAddr {
    (Ipv4Addr::LOCALHOST, 0).into()
}

/// Identity impulse response at 25 dB SNR.
async fn identity_channel() -> Channel {
    Channel::bind(local(), vec![Complex64::new(1.0, 0.0)], 25.0)
        .await
        .expect("channel binds")
}

async fn wait_status<F>(chip: &Chip, limit: Duration, predicate: F) -> bool
where
    F: FnMut(&LinkStatus) -> bool,
{
    let mut status = chip.status();
    timeout(limit, status.wait_for(predicate))
        .await
        .map(|result| result.is_ok())
        .unwrap_or(false)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn open_system_association() {
    init_tracing();
    let channel = identity_channel().await;
    let ap = Chip::new(ChipConfig::new(Role::Ap, "AP", channel.local_addr()))
        .await
        .unwrap();
    let sta = Chip::new(ChipConfig::new(Role::Sta, "STA 1", channel.local_addr()))
        .await
        .unwrap();
    let (ap_addr, sta_addr) = (ap.address(), sta.address());

    ap.activate();
    sta.activate();

    assert!(
        wait_status(&sta, Duration::from_secs(60), |s| s.associated_ap == Some(ap_addr)).await,
        "STA did not associate"
    );
    assert!(
        wait_status(&ap, Duration::from_secs(10), |s| s
            .associated_sta
            .contains(&sta_addr))
        .await,
        "AP did not associate"
    );
    assert_eq!(
        sta.status().borrow().encryption_type.get(&ap_addr),
        Some(&AuthAlgorithm::OpenSystem)
    );
    assert_eq!(
        ap.status().borrow().encryption_type.get(&sta_addr),
        Some(&AuthAlgorithm::OpenSystem)
    );

    ap.shutdown();
    sta.shutdown();
    channel.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shared_key_association() {
    init_tracing();
    let channel = identity_channel().await;
    let ap = Chip::new(ChipConfig::new(Role::Ap, "AP", channel.local_addr()))
        .await
        .unwrap();
    let mut sta_config = ChipConfig::new(Role::Sta, "STA 1", channel.local_addr());
    sta_config.authentication_algorithm = AuthAlgorithm::SharedKey;
    let sta = Chip::new(sta_config).await.unwrap();
    let (ap_addr, sta_addr) = (ap.address(), sta.address());

    ap.activate();
    sta.activate();

    assert!(
        wait_status(&sta, Duration::from_secs(60), |s| s.associated_ap == Some(ap_addr)).await,
        "STA did not associate over shared-key"
    );
    assert_eq!(
        sta.status().borrow().encryption_type.get(&ap_addr),
        Some(&AuthAlgorithm::SharedKey)
    );
    assert_eq!(
        ap.status().borrow().encryption_type.get(&sta_addr),
        Some(&AuthAlgorithm::SharedKey)
    );

    ap.shutdown();
    sta.shutdown();
    channel.shutdown().await;
}

/// A STA holding a different key table never authenticates; after the
/// attempt limit it blacklists the AP and resumes scanning.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mismatched_wep_keys_blacklist_the_ap() {
    init_tracing();
    let channel = identity_channel().await;
    let ap = Chip::new(ChipConfig::new(Role::Ap, "AP", channel.local_addr()))
        .await
        .unwrap();
    let mut sta_config = ChipConfig::new(Role::Sta, "STA 1", channel.local_addr());
    sta_config.authentication_algorithm = AuthAlgorithm::SharedKey;
    // Swap the keys pairwise so every index disagrees with the AP's table.
    sta_config.wep_keys.swap(0, 1);
    sta_config.wep_keys.swap(2, 3);
    let sta = Chip::new(sta_config).await.unwrap();
    let (ap_addr, sta_addr) = (ap.address(), sta.address());

    ap.activate();
    sta.activate();

    assert!(
        wait_status(&sta, Duration::from_secs(120), |s| s
            .probed_ap_blacklist
            .contains(&ap_addr))
        .await,
        "AP was not blacklisted"
    );
    let sta_status = sta.status().borrow().clone();
    assert_eq!(sta_status.authenticated_ap, None);
    assert_eq!(sta_status.associated_ap, None);
    assert!(sta_status.encryption_type.is_empty());
    let ap_status = ap.status().borrow().clone();
    assert!(!ap_status.authenticated_sta.contains(&sta_addr));
    assert!(ap_status.encryption_type.is_empty());

    ap.shutdown();
    sta.shutdown();
    channel.shutdown().await;
}

/// Downlink text over a pre-seeded association: 2000 ASCII characters must
/// arrive bit-exact.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn data_transfer_over_installed_association() {
    init_tracing();
    let channel = identity_channel().await;
    let ap = Chip::new(ChipConfig::new(Role::Ap, "AP", channel.local_addr()))
        .await
        .unwrap();
    let sta = Chip::new(ChipConfig::new(Role::Sta, "STA 1", channel.local_addr()))
        .await
        .unwrap();
    ap.install_association(sta.address(), AuthAlgorithm::OpenSystem);
    sta.install_association(ap.address(), AuthAlgorithm::OpenSystem);

    let mut rng = StdRng::seed_from_u64(2000);
    let message: String = (0..2000)
        .map(|_| char::from(rng.gen_range(0x20u8..0x7F)))
        .collect();
    ap.send_text(&message);

    assert!(
        wait_status(&sta, Duration::from_secs(60), |s| s.last_data.as_deref()
            == Some(message.as_bytes()))
        .await,
        "payload did not arrive intact"
    );

    ap.shutdown();
    sta.shutdown();
    channel.shutdown().await;
}

/// Without an association on the receiving side, data frames are dropped.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn data_without_association_is_rejected() {
    init_tracing();
    let channel = identity_channel().await;
    let ap = Chip::new(ChipConfig::new(Role::Ap, "AP", channel.local_addr()))
        .await
        .unwrap();
    let sta = Chip::new(ChipConfig::new(Role::Sta, "STA 1", channel.local_addr()))
        .await
        .unwrap();
    // Only the AP believes the link exists.
    ap.install_association(sta.address(), AuthAlgorithm::OpenSystem);

    ap.send_data_frame(sta.address(), b"should not arrive".to_vec());

    // Enough time for the frame and all its retries.
    sleep(Duration::from_secs(12)).await;
    assert_eq!(sta.status().borrow().last_data, None);

    ap.shutdown();
    sta.shutdown();
    channel.shutdown().await;
}

/// With RTS/CTS forced on, the data frame is held back until the CTS and
/// still arrives.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rts_cts_gates_the_data_frame() {
    init_tracing();
    let channel = identity_channel().await;
    let ap = Chip::new(ChipConfig::new(Role::Ap, "AP", channel.local_addr()))
        .await
        .unwrap();
    let mut sta_config = ChipConfig::new(Role::Sta, "STA 1", channel.local_addr());
    sta_config.always_rts_cts = true;
    let sta = Chip::new(sta_config).await.unwrap();
    ap.install_association(sta.address(), AuthAlgorithm::OpenSystem);
    sta.install_association(ap.address(), AuthAlgorithm::OpenSystem);

    sta.send_text("cleared to send?");

    assert!(
        wait_status(&sta, Duration::from_secs(15), |s| s.rts_cts_active).await,
        "RTS/CTS exchange never engaged"
    );
    assert!(
        wait_status(&ap, Duration::from_secs(30), |s| s.last_data.as_deref()
            == Some(b"cleared to send?".as_slice()))
        .await,
        "gated payload did not arrive"
    );

    ap.shutdown();
    sta.shutdown();
    channel.shutdown().await;
}

/// A fixed-rate AP never leaves its configured rate while the STA's rate
/// selection walks the ladder.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fixed_rate_stays_put() {
    init_tracing();
    let channel = identity_channel().await;
    let mut ap_config = ChipConfig::new(Role::Ap, "AP", channel.local_addr());
    ap_config.fixed_rate = true;
    let ap = Chip::new(ap_config).await.unwrap();
    let sta = Chip::new(ChipConfig::new(Role::Sta, "STA 1", channel.local_addr()))
        .await
        .unwrap();
    let ap_addr = ap.address();

    ap.activate();
    sta.activate();

    assert!(
        wait_status(&sta, Duration::from_secs(60), |s| s.phy_rate != PhyRate::R6).await,
        "STA rate never moved"
    );
    assert!(
        wait_status(&sta, Duration::from_secs(60), |s| s.associated_ap == Some(ap_addr)).await,
        "STA did not associate"
    );
    assert_eq!(ap.status().borrow().phy_rate, PhyRate::R6);

    ap.shutdown();
    sta.shutdown();
    channel.shutdown().await;
}

/// Shutdown closes the endpoints: the channel stops accepting and the MAC
/// status feed ends.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_closes_endpoints() {
    init_tracing();
    let channel = identity_channel().await;
    let chip = Chip::new(ChipConfig::new(Role::Sta, "STA 1", channel.local_addr()))
        .await
        .unwrap();
    let channel_addr = channel.local_addr();

    chip.shutdown();
    channel.shutdown().await;
    sleep(Duration::from_millis(500)).await;

    assert!(
        chip.status().has_changed().is_err(),
        "MAC status feed still open"
    );
    assert!(
        tokio::net::TcpStream::connect(channel_addr).await.is_err(),
        "channel endpoint still accepting"
    );
}
