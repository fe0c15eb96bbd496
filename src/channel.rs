//! The shared lossy medium: accepts PHY connections, convolves every
//! transmitted baseband frame with a fixed impulse response, adds complex
//! Gaussian noise at the configured SNR, and broadcasts the result to every
//! connected client, the originator included.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use num_complex::Complex64;
use rand::Rng;
use rand_distr::StandardNormal;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{ConfigError, LinkError};
use crate::message::{self, Primitive, WireStream};
use crate::phy::ofdm::round3;

type ClientSinks = Arc<Mutex<HashMap<u64, SplitSink<WireStream, Bytes>>>>;

/// Propagation model: convolution with an impulse response plus AWGN.
struct Medium {
    impulse_response: Vec<Complex64>,
    snr_db: f64,
}

impl Medium {
    /// y = x ∗ h, then n ~ CN(0, σ²) with σ² = mean|y|² · 10^(−SNR/10),
    /// rounded to three decimals per component.
    fn pass_signal(&self, samples: &[Complex64]) -> Vec<Complex64> {
        if samples.is_empty() {
            return Vec::new();
        }
        let h = &self.impulse_response;
        let mut out = vec![Complex64::default(); samples.len() + h.len() - 1];
        for (i, &x) in samples.iter().enumerate() {
            for (j, &tap) in h.iter().enumerate() {
                out[i + j] += x * tap;
            }
        }

        let power = out.iter().map(|v| v.norm_sqr()).sum::<f64>() / out.len() as f64;
        let sigma2 = power * 10f64.powf(-self.snr_db / 10.0);
        let scale = (sigma2 / 2.0).sqrt();
        let mut rng = rand::thread_rng();
        for value in &mut out {
            let noise = Complex64::new(
                scale * rng.sample::<f64, _>(StandardNormal),
                scale * rng.sample::<f64, _>(StandardNormal),
            );
            *value = round3(*value + noise);
        }
        out
    }
}

/// A running channel server.
pub struct Channel {
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
    clients: ClientSinks,
    client_tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Channel {
    /// Bind the medium on `addr` (port 0 picks an ephemeral port).
    pub async fn bind(
        addr: SocketAddr,
        impulse_response: Vec<Complex64>,
        snr_db: f64,
    ) -> Result<Channel, LinkError> {
        if impulse_response.is_empty() {
            return Err(ConfigError::EmptyImpulseResponse.into());
        }
        let listener = TcpListener::bind(addr).await.map_err(LinkError::Io)?;
        let local_addr = listener.local_addr().map_err(LinkError::Io)?;
        info!(%local_addr, snr_db, taps = impulse_response.len(), "channel up");

        let medium = Arc::new(Medium {
            impulse_response,
            snr_db,
        });
        let clients: ClientSinks = Arc::new(Mutex::new(HashMap::new()));
        let client_tasks = Arc::new(Mutex::new(Vec::new()));

        let accept_task = tokio::spawn(accept_loop(
            listener,
            medium,
            clients.clone(),
            client_tasks.clone(),
        ));

        Ok(Channel {
            local_addr,
            accept_task,
            clients,
            client_tasks,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, drop every connection.
    pub async fn shutdown(&self) {
        self.accept_task.abort();
        for task in self.client_tasks.lock().await.drain(..) {
            task.abort();
        }
        self.clients.lock().await.clear();
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    medium: Arc<Medium>,
    clients: ClientSinks,
    client_tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
) {
    let mut next_id = 0u64;
    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(error) => {
                error!(%error, "channel accept failed");
                return;
            }
        };
        let id = next_id;
        next_id += 1;
        debug!(%peer, id, "channel client connected");

        let (sink, stream) = message::wire(socket).split();
        clients.lock().await.insert(id, sink);
        let task = tokio::spawn(serve_client(id, stream, medium.clone(), clients.clone()));
        client_tasks.lock().await.push(task);
    }
}

async fn serve_client(
    id: u64,
    mut stream: futures::stream::SplitStream<WireStream>,
    medium: Arc<Medium>,
    clients: ClientSinks,
) {
    loop {
        match message::recv(&mut stream).await {
            Ok(Some(Primitive::RfSignal(samples))) => {
                debug!(id, samples = samples.len(), "RF signal through the medium");
                let passed = medium.pass_signal(&samples);
                broadcast(&clients, &Primitive::RfSignal(passed)).await;
            }
            Ok(Some(other)) => debug!(id, name = other.name(), "non-RF message ignored"),
            Ok(None) => {
                debug!(id, "channel client disconnected");
                break;
            }
            Err(error) => {
                // Malformed traffic costs the sender its connection, nobody
                // else's.
                warn!(id, %error, "channel client error, dropping connection");
                break;
            }
        }
    }
    clients.lock().await.remove(&id);
}

/// Send to every connected client; a failed send evicts that client.
async fn broadcast(clients: &ClientSinks, primitive: &Primitive) {
    let encoded = primitive.encode();
    let mut guard = clients.lock().await;
    let mut dead = Vec::new();
    for (&id, sink) in guard.iter_mut() {
        if let Err(error) = sink.send(encoded.clone()).await {
            warn!(id, %error, "broadcast send failed, evicting client");
            dead.push(id);
        }
    }
    for id in dead {
        guard.remove(&id);
    }
}
