//! Socket-level MQTT 3.1.1 broker
//!
//! Speaks just enough of the wire protocol for a client to connect,
//! subscribe and complete QoS 1/2 publish handshakes. Every packet the
//! client sends is recorded in arrival order.

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::wait_for;

/// SUBACK return code for a refused subscription
const SUBACK_FAILURE: u8 = 0x80;

/// A packet received from the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WirePacket {
    Connect {
        client_id: String,
        will_topic: Option<String>,
    },
    Subscribe {
        pkid: u16,
        topics: Vec<String>,
    },
    Publish {
        topic: String,
        qos: u8,
        pkid: u16,
        payload: Vec<u8>,
    },
    PubAck {
        pkid: u16,
    },
    PubRel {
        pkid: u16,
    },
    PingReq,
    Disconnect,
    Other(u8),
}

impl WirePacket {
    /// Publish payload parsed as JSON, `Null` for anything else
    pub fn json(&self) -> serde_json::Value {
        match self {
            WirePacket::Publish { payload, .. } => {
                serde_json::from_slice(payload).unwrap_or(serde_json::Value::Null)
            }
            _ => serde_json::Value::Null,
        }
    }

    /// Whether this is an attendance publish carrying the given tag
    pub fn is_attendance(&self, tag: &str) -> bool {
        let json = self.json();
        json["event"] == "attendance" && json["data"]["event"] == tag
    }
}

#[derive(Default)]
struct Shared {
    packets: Mutex<Vec<WirePacket>>,
    reject_subscriptions: Mutex<bool>,
    ack_delay: Mutex<Option<Duration>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    connections: Mutex<Vec<JoinHandle<()>>>,
}

/// MQTT broker listening on a local port
pub struct WireBroker {
    addr: SocketAddr,
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl WireBroker {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind wire broker");
        let addr = listener.local_addr().expect("wire broker address");
        let shared = Arc::new(Shared::default());

        let accepting = shared.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let connection = tokio::spawn(serve(stream, accepting.clone()));
                accepting.connections.lock().push(connection);
            }
        });

        Self { addr, shared, task }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Plain-TCP URL of this broker
    pub fn url(&self) -> String {
        format!("mqtt://127.0.0.1:{}", self.addr.port())
    }

    /// Answer every following SUBSCRIBE with return code 0x80
    pub fn reject_subscriptions(&self) {
        *self.shared.reject_subscriptions.lock() = true;
    }

    /// Hold back PUBACK, PUBREC and PUBCOMP by `delay`
    pub fn delay_acks(&self, delay: Duration) {
        *self.shared.ack_delay.lock() = Some(delay);
    }

    /// Send a QoS 0 publish to the most recent connection
    pub fn deliver(&self, topic: &str, payload: &[u8]) -> bool {
        let mut body = Vec::with_capacity(2 + topic.len() + payload.len());
        put_string(&mut body, topic);
        body.extend_from_slice(payload);

        match self.shared.outbound.lock().as_ref() {
            Some(outbound) => outbound.send(frame(0x30, &body)).is_ok(),
            None => false,
        }
    }

    pub fn packets(&self) -> Vec<WirePacket> {
        self.shared.packets.lock().clone()
    }

    /// Index of the first recorded packet matching `predicate`
    pub fn position<F>(&self, predicate: F) -> Option<usize>
    where
        F: Fn(&WirePacket) -> bool,
    {
        self.shared.packets.lock().iter().position(predicate)
    }

    /// Wait until a packet matching `predicate` has been received
    pub async fn wait_for_packet<F>(&self, predicate: F, max_wait: Duration) -> bool
    where
        F: Fn(&WirePacket) -> bool,
    {
        wait_for(|| self.position(&predicate).is_some(), max_wait).await
    }
}

impl Drop for WireBroker {
    fn drop(&mut self) {
        self.task.abort();
        for connection in self.shared.connections.lock().drain(..) {
            connection.abort();
        }
    }
}

async fn serve(stream: TcpStream, shared: Arc<Shared>) {
    let (mut reader, mut writer) = stream.into_split();
    let (outbound, mut frames) = mpsc::unbounded_channel::<Vec<u8>>();
    *shared.outbound.lock() = Some(outbound.clone());

    let writing = tokio::spawn(async move {
        while let Some(bytes) = frames.recv().await {
            if writer.write_all(&bytes).await.is_err() {
                break;
            }
        }
    });

    while let Ok(Some((header, body))) = read_packet(&mut reader).await {
        let packet = decode(header, &body);
        shared.packets.lock().push(packet.clone());

        let ack_delay = *shared.ack_delay.lock();
        match packet {
            WirePacket::Connect { .. } => {
                let _ = outbound.send(frame(0x20, &[0x00, 0x00]));
            }
            WirePacket::Subscribe { pkid, topics } => {
                let code = if *shared.reject_subscriptions.lock() {
                    SUBACK_FAILURE
                } else {
                    0x02
                };
                let mut body = pkid.to_be_bytes().to_vec();
                body.extend(std::iter::repeat(code).take(topics.len()));
                let _ = outbound.send(frame(0x90, &body));
            }
            WirePacket::Publish { qos: 1, pkid, .. } => {
                acknowledge(&outbound, frame(0x40, &pkid.to_be_bytes()), ack_delay);
            }
            WirePacket::Publish { qos: 2, pkid, .. } => {
                acknowledge(&outbound, frame(0x50, &pkid.to_be_bytes()), ack_delay);
            }
            WirePacket::PubRel { pkid } => {
                acknowledge(&outbound, frame(0x70, &pkid.to_be_bytes()), ack_delay);
            }
            WirePacket::PingReq => {
                let _ = outbound.send(frame(0xD0, &[]));
            }
            WirePacket::Disconnect => break,
            _ => {}
        }
    }

    writing.abort();
}

fn acknowledge(outbound: &mpsc::UnboundedSender<Vec<u8>>, ack: Vec<u8>, delay: Option<Duration>) {
    match delay {
        Some(delay) => {
            let outbound = outbound.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = outbound.send(ack);
            });
        }
        None => {
            let _ = outbound.send(ack);
        }
    }
}

/// Read one packet: fixed header byte and body
async fn read_packet<R>(reader: &mut R) -> std::io::Result<Option<(u8, Vec<u8>)>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 1];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let mut length = 0usize;
    let mut shift = 0;
    loop {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte).await?;
        length |= ((byte[0] & 0x7F) as usize) << shift;
        if byte[0] & 0x80 == 0 {
            break;
        }
        shift += 7;
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;
    Ok(Some((header[0], body)))
}

fn decode(header: u8, body: &[u8]) -> WirePacket {
    let mut cursor = Cursor { buf: body, pos: 0 };
    let packet = match header >> 4 {
        1 => decode_connect(&mut cursor),
        3 => {
            let qos = (header >> 1) & 0x03;
            cursor.string().and_then(|topic| {
                let pkid = if qos > 0 { cursor.u16()? } else { 0 };
                Some(WirePacket::Publish {
                    topic,
                    qos,
                    pkid,
                    payload: cursor.rest().to_vec(),
                })
            })
        }
        4 => cursor.u16().map(|pkid| WirePacket::PubAck { pkid }),
        6 => cursor.u16().map(|pkid| WirePacket::PubRel { pkid }),
        8 => cursor.u16().map(|pkid| {
            let mut topics = Vec::new();
            while let Some(topic) = cursor.string() {
                let _requested = cursor.u8();
                topics.push(topic);
            }
            WirePacket::Subscribe { pkid, topics }
        }),
        12 => Some(WirePacket::PingReq),
        14 => Some(WirePacket::Disconnect),
        _ => None,
    };

    packet.unwrap_or(WirePacket::Other(header))
}

fn decode_connect(cursor: &mut Cursor<'_>) -> Option<WirePacket> {
    let _protocol = cursor.string()?;
    let _level = cursor.u8()?;
    let flags = cursor.u8()?;
    let _keep_alive = cursor.u16()?;
    let client_id = cursor.string()?;
    let will_topic = if flags & 0x04 != 0 {
        let topic = cursor.string()?;
        let _will_payload = cursor.bytes()?;
        Some(topic)
    } else {
        None
    };
    Some(WirePacket::Connect {
        client_id,
        will_topic,
    })
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn u8(&mut self) -> Option<u8> {
        let byte = *self.buf.get(self.pos)?;
        self.pos += 1;
        Some(byte)
    }

    fn u16(&mut self) -> Option<u16> {
        let bytes = self.buf.get(self.pos..self.pos + 2)?;
        self.pos += 2;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn bytes(&mut self) -> Option<&'a [u8]> {
        let len = self.u16()? as usize;
        let bytes = self.buf.get(self.pos..self.pos + len)?;
        self.pos += len;
        Some(bytes)
    }

    fn string(&mut self) -> Option<String> {
        self.bytes()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    fn rest(&mut self) -> &'a [u8] {
        let rest = self.buf.get(self.pos..).unwrap_or(&[]);
        self.pos = self.buf.len();
        rest
    }
}

fn put_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u16).to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
}

/// Encode a packet with its remaining-length prefix
fn frame(header: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![header];
    let mut length = body.len();
    loop {
        let mut byte = (length % 128) as u8;
        length /= 128;
        if length > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if length == 0 {
            break;
        }
    }
    out.extend_from_slice(body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_length_prefix() {
        assert_eq!(frame(0x20, &[0, 0]), vec![0x20, 0x02, 0x00, 0x00]);

        let long = frame(0x30, &[0u8; 321]);
        assert_eq!(&long[..3], &[0x30, 0xC1, 0x02]);
        assert_eq!(long.len(), 3 + 321);
    }

    #[test]
    fn test_decode_qos2_publish() {
        let mut body = Vec::new();
        put_string(&mut body, "stream/room1/sender");
        body.extend_from_slice(&7u16.to_be_bytes());
        body.extend_from_slice(b"{}");

        assert_eq!(
            decode(0x34, &body),
            WirePacket::Publish {
                topic: "stream/room1/sender".to_string(),
                qos: 2,
                pkid: 7,
                payload: b"{}".to_vec(),
            }
        );
    }

    #[test]
    fn test_decode_subscribe_filters() {
        let mut body = 3u16.to_be_bytes().to_vec();
        put_string(&mut body, "a/b");
        body.push(2);
        put_string(&mut body, "a/c");
        body.push(2);

        assert_eq!(
            decode(0x82, &body),
            WirePacket::Subscribe {
                pkid: 3,
                topics: vec!["a/b".to_string(), "a/c".to_string()],
            }
        );
    }
}
