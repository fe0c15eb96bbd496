//! Bit-exact OFDM transmitter and receiver, and the PHY task that drives
//! them from MAC primitives on one side and channel samples on the other.
//!
//! The DSP pipelines are pure: [`Transmitter`] consumes a TXVECTOR and PSDU
//! octets and yields PPDU samples, [`receive`] turns PPDU samples back into a
//! PSDU. The async task in [`Phy`] only wires them to the sockets.

pub mod convolutional;
pub mod interleaver;
pub mod modulation;
pub mod ofdm;
pub mod scrambler;

use modular_bitfield::prelude::*;
use num_complex::Complex64;
use rand::Rng;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{ConfigError, DecodeError, LinkError};
use crate::message::{self, Primitive, TxVector};
use crate::parameters::{CodingRate, Modulation};
use crate::PhyRate;

use convolutional::{viterbi_decode, BccEncoder};
use ofdm::FieldKind;

/// SIGNAL field layout (17.3.4): RATE, one reserved bit, LENGTH transmitted
/// LSB first, even parity over the preceding bits, six tail zeros. Byte bits
/// read LSB first give the transmit order.
#[bitfield]
#[derive(Debug, Clone, Copy)]
pub struct SignalField {
    pub rate: B4,
    pub reserved: B1,
    pub length: B12,
    pub parity: B1,
    pub tail: B6,
}

/// Per-frame symbol accounting derived from a TXVECTOR (17.3.5.4).
#[derive(Debug, Clone, Copy)]
pub struct FrameParams {
    pub rate: PhyRate,
    /// PSDU octets.
    pub length: usize,
    /// DATA OFDM symbols holding SERVICE ∥ PSDU ∥ TAIL ∥ PAD.
    pub n_symbols: usize,
    /// Total DATA field bits, `n_symbols × n_dbps`.
    pub n_data: usize,
    pub pad_bits: usize,
}

impl FrameParams {
    pub fn derive(tx_vector: TxVector) -> Result<Self, ConfigError> {
        if !(1..=4095).contains(&tx_vector.length) {
            return Err(ConfigError::LengthOutOfRange(tx_vector.length));
        }
        let n_dbps = tx_vector.rate.mcs().n_dbps;
        let payload_bits = 16 + 8 * tx_vector.length + 6;
        let n_symbols = payload_bits.div_ceil(n_dbps);
        let n_data = n_symbols * n_dbps;
        Ok(FrameParams {
            rate: tx_vector.rate,
            length: tx_vector.length,
            n_symbols,
            n_data,
            pad_bits: n_data - payload_bits,
        })
    }
}

/// Serialize the 24 SIGNAL bits in transmit order.
pub fn signal_field_bits(params: &FrameParams) -> [u8; 24] {
    let coding = params.rate.mcs().signal_field_coding;
    let rate_code = coding[0] | coding[1] << 1 | coding[2] << 2 | coding[3] << 3;
    let ones = u32::from(rate_code).count_ones() + (params.length as u32).count_ones();
    let field = SignalField::new()
        .with_rate(rate_code)
        .with_length(params.length as u16)
        .with_parity((ones % 2) as u8);

    let bytes = field.into_bytes();
    let mut bits = [0u8; 24];
    for (index, bit) in bits.iter_mut().enumerate() {
        *bit = (bytes[index / 8] >> (index % 8)) & 1;
    }
    bits
}

/// Recover RATE and LENGTH from 24 decoded SIGNAL bits.
pub fn parse_signal_field(bits: &[u8]) -> Result<TxVector, DecodeError> {
    let ones: u32 = bits[..18].iter().map(|&b| u32::from(b)).sum();
    if ones % 2 != 0 {
        return Err(DecodeError::FormatViolation);
    }
    let rate =
        PhyRate::from_signal_field_coding(&bits[..4]).ok_or(DecodeError::FormatViolation)?;
    let length = bits[5..17]
        .iter()
        .rev()
        .fold(0usize, |acc, &bit| (acc << 1) | usize::from(bit));
    Ok(TxVector { rate, length })
}

/// Transmit-side state of one frame. Fed one PSDU octet at a time; DATA
/// symbols are encoded as soon as `n_dbps` bits are buffered.
pub struct Transmitter {
    params: FrameParams,
    scramble_sequence: Vec<u8>,
    scramble_pos: usize,
    encoder: BccEncoder,
    pilot_polarity: [f64; 127],
    pilot_index: usize,
    buffer: Vec<u8>,
    remaining_octets: usize,
    signal: Vec<Complex64>,
    data: Vec<Complex64>,
}

impl Transmitter {
    /// Cache the TXVECTOR, derive the MCS parameters, pre-build the SIGNAL
    /// symbol and seed the scrambler. The DATA field starts with the 16-bit
    /// all-zero SERVICE field already buffered.
    pub fn new(tx_vector: TxVector, scramble_seed: u8) -> Result<Self, ConfigError> {
        let params = FrameParams::derive(tx_vector)?;
        let pilot_polarity = scrambler::pilot_polarity();

        // SIGNAL: BPSK, rate 1/2, never scrambled, own encoder run.
        let signal_bits = signal_field_bits(&params);
        let coded = BccEncoder::new().encode(&signal_bits, CodingRate::Half);
        let mcs6 = PhyRate::R6.mcs();
        let interleaved = interleaver::interleave(&coded, mcs6);
        let mapped = modulation::map_bits(&interleaved, Modulation::Bpsk);
        let tones = ofdm::insert_pilots(&mapped, pilot_polarity[0]);
        let signal = ofdm::to_time_domain(&tones, FieldKind::Signal);

        Ok(Transmitter {
            scramble_sequence: scrambler::lfsr_sequence(params.n_data, scramble_seed),
            scramble_pos: 0,
            encoder: BccEncoder::new(),
            pilot_polarity,
            pilot_index: 1,
            buffer: vec![0; 16],
            remaining_octets: params.length,
            signal,
            data: Vec::new(),
            params,
        })
    }

    pub fn params(&self) -> &FrameParams {
        &self.params
    }

    /// All octets received and the DATA field assembled.
    pub fn is_complete(&self) -> bool {
        !self.data.is_empty()
    }

    /// Append one octet (eight bits, most significant first).
    pub fn push_octet(&mut self, bits: &[u8]) {
        debug_assert_eq!(bits.len(), 8);
        if self.remaining_octets == 0 {
            warn!("PSDU octet past the announced LENGTH, ignored");
            return;
        }
        self.buffer.extend_from_slice(bits);

        let n_dbps = self.params.rate.mcs().n_dbps;
        if self.buffer.len() >= n_dbps {
            let chunk: Vec<u8> = self.buffer.drain(..n_dbps).collect();
            let symbol = self.encode_symbol(&chunk, false);
            self.append_data_symbol(symbol);
        }

        self.remaining_octets -= 1;
        if self.remaining_octets == 0 {
            // TAIL and PAD close the DATA field to exactly n_symbols × n_dbps.
            self.buffer
                .resize(self.buffer.len() + 6 + self.params.pad_bits, 0);
            let chunk: Vec<u8> = std::mem::take(&mut self.buffer);
            let symbol = self.encode_symbol(&chunk, true);
            self.append_data_symbol(symbol);
        }
    }

    fn encode_symbol(&mut self, bits: &[u8], is_last: bool) -> Vec<Complex64> {
        let sequence = &self.scramble_sequence[self.scramble_pos..self.scramble_pos + bits.len()];
        let mut scrambled = scrambler::apply(bits, sequence);
        self.scramble_pos += bits.len();
        if is_last {
            // TAIL bits return the encoder to the zero state; they are zeroed
            // after scrambling (17.3.5.3 d).
            let tail_start = scrambled.len() - self.params.pad_bits - 6;
            for bit in &mut scrambled[tail_start..tail_start + 6] {
                *bit = 0;
            }
        }

        let mcs = self.params.rate.mcs();
        let coded = self.encoder.encode(&scrambled, mcs.coding_rate);
        let interleaved = interleaver::interleave(&coded, mcs);
        let mapped = modulation::map_bits(&interleaved, mcs.modulation);
        // The polarity sequence repeats every 127 symbols.
        let polarity = self.pilot_polarity[self.pilot_index % self.pilot_polarity.len()];
        let tones = ofdm::insert_pilots(&mapped, polarity);
        self.pilot_index += 1;
        ofdm::to_time_domain(&tones, FieldKind::Data)
    }

    fn append_data_symbol(&mut self, symbol: Vec<Complex64>) {
        // One-sample overlap between adjacent symbols.
        match self.data.last_mut() {
            Some(last) => *last += symbol[0],
            None => self.data.push(symbol[0]),
        }
        self.data.extend_from_slice(&symbol[1..]);
    }

    /// Preamble ∥ SIGNAL ∥ DATA with single-sample overlaps at both seams.
    pub fn ppdu(&self) -> Vec<Complex64> {
        debug_assert!(self.is_complete());
        let preamble = ofdm::preamble();
        let mut samples = Vec::with_capacity(
            ofdm::PREAMBLE_LEN + ofdm::SYMBOL_LEN * (1 + self.params.n_symbols),
        );
        samples.extend_from_slice(&preamble[..preamble.len() - 1]);
        samples.push(preamble[preamble.len() - 1] + self.signal[0]);
        samples.extend_from_slice(&self.signal[1..self.signal.len() - 1]);
        samples.push(self.signal[self.signal.len() - 1] + self.data[0]);
        samples.extend_from_slice(&self.data[1..]);
        samples
    }
}

/// A decoded PSDU, as recovered by [`receive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedPsdu {
    pub rx_vector: TxVector,
    /// PSDU bits, eight per octet, most significant first.
    pub bits: Vec<u8>,
}

/// Full receive pipeline on a detected frame starting at `start`: channel
/// estimation from the LTF, SIGNAL decode, per-symbol equalisation and
/// demapping, Viterbi decode, scrambler seed search, descramble and strip.
pub fn receive(samples: &[Complex64], start: usize) -> Result<ReceivedPsdu, DecodeError> {
    if samples.len() < start + 400 {
        return Err(DecodeError::FormatViolation);
    }
    let estimate = ofdm::estimate_channel(&samples[start + 160..start + 320]);

    let signal_tones = ofdm::to_frequency_domain(&samples[start + 320..start + 400]);
    let equalized = ofdm::equalize(&signal_tones, &estimate);
    let demapped = modulation::demap(&equalized, Modulation::Bpsk);
    let deinterleaved = interleaver::deinterleave(&demapped, PhyRate::R6.mcs());
    let signal_bits = viterbi_decode(&deinterleaved, CodingRate::Half);
    let rx_vector = parse_signal_field(&signal_bits)?;
    let params = FrameParams::derive(rx_vector).map_err(|_| DecodeError::FormatViolation)?;

    let data_start = start + 400;
    if samples.len() < data_start + ofdm::SYMBOL_LEN * params.n_symbols {
        return Err(DecodeError::FormatViolation);
    }
    let mcs = rx_vector.rate.mcs();
    let mut coded = Vec::with_capacity(params.n_symbols * mcs.n_cbps);
    for index in 0..params.n_symbols {
        let from = data_start + ofdm::SYMBOL_LEN * index;
        let tones = ofdm::to_frequency_domain(&samples[from..from + ofdm::SYMBOL_LEN]);
        let equalized = ofdm::equalize(&tones, &estimate);
        let demapped = modulation::demap(&equalized, mcs.modulation);
        coded.extend(interleaver::deinterleave(&demapped, mcs));
    }

    let decoded = viterbi_decode(&coded, mcs.coding_rate);
    let seed =
        scrambler::find_seed(&decoded[..16]).ok_or(DecodeError::ScrambleSeedNotFound)?;
    let sequence = scrambler::lfsr_sequence(decoded.len(), seed);
    let descrambled = scrambler::apply(&decoded, &sequence);
    let bits = descrambled[16..descrambled.len() - 6 - params.pad_bits].to_vec();
    Ok(ReceivedPsdu { rx_vector, bits })
}

/// The PHY task: request/indication machine between the MAC (via MPIF) and
/// the channel.
pub struct Phy {
    task: JoinHandle<()>,
}

impl Phy {
    /// Connect to the chip's MPIF and the shared channel, identify as the
    /// PHY endpoint, and start the primitive loop.
    pub async fn spawn(
        identifier: String,
        mpif_addr: std::net::SocketAddr,
        channel_addr: std::net::SocketAddr,
    ) -> Result<Phy, LinkError> {
        let mut mpif = message::wire(TcpStream::connect(mpif_addr).await?);
        message::send(&mut mpif, &Primitive::PhyIdentify).await?;
        let channel = message::wire(TcpStream::connect(channel_addr).await?);
        let task = tokio::spawn(run(identifier, mpif, channel));
        Ok(Phy { task })
    }

    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for Phy {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    identifier: String,
    mpif: message::WireStream,
    channel: message::WireStream,
) {
    use futures::StreamExt;

    let (mut mac_sink, mut mac_stream) = mpif.split();
    let (mut channel_sink, mut channel_stream) = channel.split();

    let mut transmitter: Option<Transmitter> = None;
    // Our own last transmission, still expected back as the channel echo.
    let mut echo_pending = false;

    loop {
        let result: Result<bool, LinkError> = tokio::select! {
            primitive = message::recv(&mut mac_stream) => match primitive {
                Ok(Some(primitive)) => {
                    on_mac_primitive(
                        &identifier,
                        primitive,
                        &mut transmitter,
                        &mut echo_pending,
                        &mut mac_sink,
                        &mut channel_sink,
                    )
                    .await
                }
                Ok(None) => Ok(false),
                Err(error) => Err(error),
            },
            primitive = message::recv(&mut channel_stream) => match primitive {
                Ok(Some(primitive)) => {
                    on_channel_primitive(
                        &identifier,
                        primitive,
                        &mut echo_pending,
                        &mut mac_sink,
                    )
                    .await
                }
                Ok(None) => Ok(false),
                Err(error) => Err(error),
            },
        };

        match result {
            Ok(true) => {}
            Ok(false) => {
                debug!(%identifier, "PHY link closed, stopping");
                break;
            }
            Err(error) => {
                error!(%identifier, %error, "PHY link failure, stopping");
                break;
            }
        }
    }
}

async fn on_mac_primitive<S>(
    identifier: &str,
    primitive: Primitive,
    transmitter: &mut Option<Transmitter>,
    echo_pending: &mut bool,
    mac_sink: &mut S,
    channel_sink: &mut S,
) -> Result<bool, LinkError>
where
    S: futures::Sink<bytes::Bytes, Error = std::io::Error> + Unpin,
{
    match primitive {
        Primitive::TxStartRequest(tx_vector) => {
            debug!(%identifier, ?tx_vector, "TXSTART");
            let seed = rand::thread_rng().gen_range(1..=127);
            match Transmitter::new(tx_vector, seed) {
                Ok(tx) => {
                    *transmitter = Some(tx);
                    message::send(mac_sink, &Primitive::TxStartConfirm).await?;
                }
                Err(error) => error!(%identifier, %error, "TXVECTOR rejected"),
            }
        }
        Primitive::DataRequest(bits) => {
            if let Some(tx) = transmitter.as_mut() {
                tx.push_octet(&bits);
                message::send(mac_sink, &Primitive::DataConfirm).await?;
            } else {
                warn!(%identifier, "PHY-DATA.request outside a transmission");
            }
        }
        Primitive::TxEndRequest => {
            if let Some(tx) = transmitter.take() {
                if tx.is_complete() {
                    let ppdu = tx.ppdu();
                    info!(%identifier, samples = ppdu.len(), "PPDU on the air");
                    message::send(mac_sink, &Primitive::TxEndConfirm).await?;
                    message::send(channel_sink, &Primitive::RfSignal(ppdu)).await?;
                    *echo_pending = true;
                } else {
                    warn!(%identifier, "PHY-TXEND.request before the last octet");
                }
            }
        }
        other => debug!(%identifier, name = other.name(), "ignored MAC primitive"),
    }
    Ok(true)
}

async fn on_channel_primitive<S>(
    identifier: &str,
    primitive: Primitive,
    echo_pending: &mut bool,
    mac_sink: &mut S,
) -> Result<bool, LinkError>
where
    S: futures::Sink<bytes::Bytes, Error = std::io::Error> + Unpin,
{
    let Primitive::RfSignal(samples) = primitive else {
        return Ok(true);
    };
    if *echo_pending {
        // The channel broadcasts to every client including the originator.
        *echo_pending = false;
        return Ok(true);
    }

    let Some(start) = ofdm::detect_frame(&samples) else {
        message::send(mac_sink, &Primitive::CcaIdle).await?;
        return Ok(true);
    };
    debug!(%identifier, start, "frame detected");
    message::send(mac_sink, &Primitive::CcaBusy).await?;

    match receive(&samples, start) {
        Err(DecodeError::FormatViolation) => {
            message::send(mac_sink, &Primitive::RxEndFormatViolation).await?;
        }
        Err(DecodeError::ScrambleSeedNotFound) => {
            message::send(mac_sink, &Primitive::RxEndScrambleSeedNotFound).await?;
        }
        Ok(psdu) => {
            debug!(%identifier, octets = psdu.rx_vector.length, "PSDU toward MAC");
            for octet in psdu.bits.chunks(8) {
                message::send(mac_sink, &Primitive::DataIndication(octet.to_vec())).await?;
            }
            message::send(mac_sink, &Primitive::RxEndNoError).await?;
            message::send(mac_sink, &Primitive::CcaIdle).await?;
        }
    }
    Ok(true)
}
