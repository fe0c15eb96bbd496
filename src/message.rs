//! Wire messages exchanged between MAC, PHY, MPIF and the channel.
//!
//! Every message is one length-delimited frame holding a JSON object
//! `{"PRIMITIVE": <string>, "DATA": <array>}`. The `DATA` array carries,
//! depending on the primitive: nothing, a `[rate, length]` TXVECTOR, the
//! eight bits of one PSDU octet, or `[[re, im], …]` baseband samples.
//! Unknown primitive names are skipped, not errors.

use bytes::{Bytes, BytesMut};
use futures::{Sink, SinkExt, Stream, StreamExt};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::error::LinkError;
use crate::PhyRate;

/// RATE and LENGTH the MAC hands to the PHY for one frame; the receive side
/// recovers the same pair from the SIGNAL field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxVector {
    pub rate: PhyRate,
    /// PSDU length in octets.
    pub length: usize,
}

/// Typed form of every primitive on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    /// First message of the MAC endpoint toward its MPIF.
    MacIdentify,
    /// First message of the PHY endpoint toward its MPIF.
    PhyIdentify,
    TxStartRequest(TxVector),
    TxStartConfirm,
    /// One PSDU octet as eight bits, most significant first.
    DataRequest(Vec<u8>),
    DataConfirm,
    TxEndRequest,
    TxEndConfirm,
    CcaBusy,
    CcaIdle,
    /// One decoded PSDU octet as eight bits, most significant first.
    DataIndication(Vec<u8>),
    RxEndNoError,
    RxEndFormatViolation,
    RxEndScrambleSeedNotFound,
    /// Baseband samples toward or from the channel.
    RfSignal(Vec<Complex64>),
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    #[serde(rename = "PRIMITIVE")]
    primitive: String,
    #[serde(rename = "DATA")]
    data: Value,
}

impl Primitive {
    pub fn name(&self) -> &'static str {
        match self {
            Primitive::MacIdentify => "MAC",
            Primitive::PhyIdentify => "PHY",
            Primitive::TxStartRequest(_) => "PHY-TXSTART.request",
            Primitive::TxStartConfirm => "PHY-TXSTART.confirm",
            Primitive::DataRequest(_) => "PHY-DATA.request",
            Primitive::DataConfirm => "PHY-DATA.confirm",
            Primitive::TxEndRequest => "PHY-TXEND.request",
            Primitive::TxEndConfirm => "PHY-TXEND.confirm",
            Primitive::CcaBusy => "PHY-CCA.indication(BUSY)",
            Primitive::CcaIdle => "PHY-CCA.indication(IDLE)",
            Primitive::DataIndication(_) => "PHY-DATA.indication",
            Primitive::RxEndNoError => "PHY-RXEND.indication(No_Error)",
            Primitive::RxEndFormatViolation => "PHY-RXEND.indication(FormatViolation)",
            Primitive::RxEndScrambleSeedNotFound => "PHY-RXEND.indication(ScrambleSeedNotFound)",
            Primitive::RfSignal(_) => "RF-SIGNAL",
        }
    }

    fn data(&self) -> Value {
        match self {
            Primitive::TxStartRequest(tx_vector) => {
                json!([tx_vector.rate.mbps(), tx_vector.length])
            }
            Primitive::DataRequest(bits) | Primitive::DataIndication(bits) => json!(bits),
            Primitive::RfSignal(samples) => Value::Array(
                samples
                    .iter()
                    .map(|sample| json!([sample.re, sample.im]))
                    .collect(),
            ),
            _ => json!([]),
        }
    }

    pub fn encode(&self) -> Bytes {
        let message = WireMessage {
            primitive: self.name().to_owned(),
            data: self.data(),
        };
        // WireMessage serialization cannot fail: strings and finite numbers.
        Bytes::from(serde_json::to_vec(&message).expect("wire message serializes"))
    }

    /// Decode one frame. `Ok(None)` means an unknown primitive to be skipped.
    pub fn decode(frame: &[u8]) -> Result<Option<Primitive>, LinkError> {
        let message: WireMessage = serde_json::from_slice(frame)?;
        let bad = || LinkError::BadData(message.primitive.clone());

        Ok(Some(match message.primitive.as_str() {
            "MAC" => Primitive::MacIdentify,
            "PHY" => Primitive::PhyIdentify,
            "PHY-TXSTART.request" => {
                let pair = message.data.as_array().ok_or_else(bad)?;
                let rate = pair.first().and_then(Value::as_u64).ok_or_else(bad)?;
                let length = pair.get(1).and_then(Value::as_u64).ok_or_else(bad)?;
                Primitive::TxStartRequest(TxVector {
                    rate: PhyRate::try_from(rate).map_err(|_| bad())?,
                    length: length as usize,
                })
            }
            "PHY-TXSTART.confirm" => Primitive::TxStartConfirm,
            "PHY-DATA.request" => Primitive::DataRequest(decode_bits(&message.data).ok_or_else(bad)?),
            "PHY-DATA.confirm" => Primitive::DataConfirm,
            "PHY-TXEND.request" => Primitive::TxEndRequest,
            "PHY-TXEND.confirm" => Primitive::TxEndConfirm,
            "PHY-CCA.indication(BUSY)" => Primitive::CcaBusy,
            "PHY-CCA.indication(IDLE)" => Primitive::CcaIdle,
            "PHY-DATA.indication" => {
                Primitive::DataIndication(decode_bits(&message.data).ok_or_else(bad)?)
            }
            "PHY-RXEND.indication(No_Error)" => Primitive::RxEndNoError,
            "PHY-RXEND.indication(FormatViolation)" => Primitive::RxEndFormatViolation,
            "PHY-RXEND.indication(ScrambleSeedNotFound)" => Primitive::RxEndScrambleSeedNotFound,
            "RF-SIGNAL" => {
                let pairs = message.data.as_array().ok_or_else(bad)?;
                let mut samples = Vec::with_capacity(pairs.len());
                for pair in pairs {
                    let pair = pair.as_array().ok_or_else(bad)?;
                    let re = pair.first().and_then(Value::as_f64).ok_or_else(bad)?;
                    let im = pair.get(1).and_then(Value::as_f64).ok_or_else(bad)?;
                    samples.push(Complex64::new(re, im));
                }
                Primitive::RfSignal(samples)
            }
            _ => return Ok(None),
        }))
    }
}

fn decode_bits(data: &Value) -> Option<Vec<u8>> {
    data.as_array()?
        .iter()
        .map(|bit| match bit.as_u64() {
            Some(b @ 0..=1) => Some(b as u8),
            _ => None,
        })
        .collect()
}

/// A TCP stream with length-delimited message framing.
pub type WireStream = Framed<TcpStream, LengthDelimitedCodec>;

pub fn wire(stream: TcpStream) -> WireStream {
    Framed::new(stream, LengthDelimitedCodec::new())
}

pub async fn send<S>(sink: &mut S, primitive: &Primitive) -> Result<(), LinkError>
where
    S: Sink<Bytes, Error = std::io::Error> + Unpin,
{
    sink.send(primitive.encode()).await?;
    Ok(())
}

/// Receive the next known primitive; `Ok(None)` when the peer closed the
/// connection. Unknown primitive names are skipped.
pub async fn recv<S>(stream: &mut S) -> Result<Option<Primitive>, LinkError>
where
    S: Stream<Item = Result<BytesMut, std::io::Error>> + Unpin,
{
    while let Some(frame) = stream.next().await {
        if let Some(primitive) = Primitive::decode(&frame?)? {
            return Ok(Some(primitive));
        }
    }
    Ok(None)
}
