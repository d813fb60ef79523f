//! Byte-level MAVLink endpoints
//!
//! Frames are read raw and decoded afterwards, so a payload whose enum fields
//! the dialect does not know still reaches raw-message subscribers. Sockets
//! carry a read timeout so the receive thread can notice shutdown.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use mavlink::ardupilotmega::MavMessage;
use mavlink::error::MessageReadError;
use mavlink::peek_reader::PeekReader;
use mavlink::{MavHeader, MavlinkVersion, Message};
use tracing::{debug, info};

use super::{ConnectionUrl, RawMessage, Scheme};

/// Longest a read blocks before the receive loop checks for shutdown
pub const READ_TIMEOUT: Duration = Duration::from_millis(250);

/// Largest datagram read in one go
const MTU_SIZE: usize = 1500;

/// One received frame
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: MavHeader,
    pub raw: RawMessage,
    /// `None` when the dialect cannot decode the payload
    pub message: Option<MavMessage>,
}

impl Frame {
    /// Decode a raw frame, keeping the payload even if decoding fails
    pub fn decode(header: MavHeader, raw: RawMessage) -> Self {
        let message = match MavMessage::parse(MavlinkVersion::V2, raw.message_id, &raw.payload) {
            Ok(message) => Some(message),
            Err(e) => {
                debug!("Keeping undecodable message {} raw: {}", raw.message_id, e);
                None
            }
        };

        Self { header, raw, message }
    }
}

/// Datagram reader that remembers who sent the last datagram
struct UdpRead {
    socket: UdpSocket,
    buffer: VecDeque<u8>,
    last_sender: Option<SocketAddr>,
}

impl Read for UdpRead {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.buffer.is_empty() {
            let mut datagram = [0u8; MTU_SIZE];
            let (len, sender) = self.socket.recv_from(&mut datagram)?;
            self.buffer.extend(&datagram[..len]);
            self.last_sender = Some(sender);
        }
        self.buffer.read(buf)
    }
}

enum Inbound {
    Udp(UdpRead),
    Tcp(TcpStream),
}

impl Read for Inbound {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Inbound::Udp(reader) => reader.read(buf),
            Inbound::Tcp(stream) => stream.read(buf),
        }
    }
}

enum Outbound {
    Udp {
        socket: UdpSocket,
        dest: Option<SocketAddr>,
    },
    Tcp(TcpStream),
}

/// An open MAVLink v2 connection
pub struct Endpoint {
    reader: Mutex<PeekReader<Inbound>>,
    writer: Mutex<Outbound>,
    /// `udpin` replies to whoever spoke last
    follows_sender: bool,
}

impl Endpoint {
    /// Open the connection described by `url`
    ///
    /// `tcpin` blocks until one client connects.
    ///
    /// # Errors
    ///
    /// Returns the socket error if binding or connecting fails
    pub fn open(url: &ConnectionUrl) -> io::Result<Self> {
        let address = SocketAddr::new(url.ip(), url.port());

        match url.scheme() {
            Scheme::UdpIn => Self::udp(UdpSocket::bind(address)?, None, true),
            Scheme::UdpOut => {
                let local: SocketAddr = if address.is_ipv4() {
                    ([0u8; 4], 0).into()
                } else {
                    ([0u16; 8], 0).into()
                };
                Self::udp(UdpSocket::bind(local)?, Some(address), false)
            }
            Scheme::TcpIn => {
                let listener = TcpListener::bind(address)?;
                info!("Waiting for a TCP client on {}", address);
                let (stream, peer) = listener.accept()?;
                debug!("Accepted TCP client {}", peer);
                Self::tcp(stream)
            }
            Scheme::TcpOut => Self::tcp(TcpStream::connect(address)?),
        }
    }

    fn udp(socket: UdpSocket, dest: Option<SocketAddr>, follows_sender: bool) -> io::Result<Self> {
        socket.set_read_timeout(Some(READ_TIMEOUT))?;
        Ok(Self {
            reader: Mutex::new(PeekReader::new(Inbound::Udp(UdpRead {
                socket: socket.try_clone()?,
                buffer: VecDeque::new(),
                last_sender: None,
            }))),
            writer: Mutex::new(Outbound::Udp { socket, dest }),
            follows_sender,
        })
    }

    fn tcp(stream: TcpStream) -> io::Result<Self> {
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        Ok(Self {
            reader: Mutex::new(PeekReader::new(Inbound::Tcp(stream.try_clone()?))),
            writer: Mutex::new(Outbound::Tcp(stream)),
            follows_sender: false,
        })
    }

    /// Local address of the socket
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match &*self.writer.lock().unwrap_or_else(PoisonError::into_inner) {
            Outbound::Udp { socket, .. } => socket.local_addr(),
            Outbound::Tcp(stream) => stream.local_addr(),
        }
    }

    /// Read the next frame with a valid checksum
    ///
    /// # Errors
    ///
    /// Returns [`MessageReadError::Io`] on timeout or when the socket fails
    pub fn recv(&self) -> Result<Frame, MessageReadError> {
        let mut reader = self.reader.lock().unwrap_or_else(PoisonError::into_inner);
        let raw = mavlink::read_v2_raw_message::<MavMessage, _>(&mut *reader)?;

        if self.follows_sender {
            if let Inbound::Udp(udp) = reader.reader_ref() {
                if let Some(sender) = udp.last_sender {
                    if let Outbound::Udp { dest, .. } =
                        &mut *self.writer.lock().unwrap_or_else(PoisonError::into_inner)
                    {
                        *dest = Some(sender);
                    }
                }
            }
        }

        let header = MavHeader {
            system_id: raw.system_id(),
            component_id: raw.component_id(),
            sequence: raw.sequence(),
        };
        Ok(Frame::decode(
            header,
            RawMessage {
                message_id: raw.message_id(),
                payload: raw.payload().to_vec(),
            },
        ))
    }

    /// Send one message as a MAVLink v2 frame
    ///
    /// A `udpin` endpoint that has not heard from anyone yet drops the message.
    ///
    /// # Errors
    ///
    /// Returns error if encoding or writing fails
    pub fn send(&self, header: MavHeader, message: &MavMessage) -> io::Result<()> {
        let mut frame = Vec::new();
        mavlink::write_v2_msg(&mut frame, header, message)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

        match &mut *self.writer.lock().unwrap_or_else(PoisonError::into_inner) {
            Outbound::Udp { socket, dest: Some(dest) } => {
                socket.send_to(&frame, *dest)?;
            }
            Outbound::Udp { dest: None, .. } => {}
            Outbound::Tcp(stream) => stream.write_all(&frame)?,
        }
        Ok(())
    }
}

/// Whether a read error only means nothing arrived in time
pub fn is_transient(error: &MessageReadError) -> bool {
    match error {
        MessageReadError::Io(e) => matches!(
            e.kind(),
            io::ErrorKind::WouldBlock
                | io::ErrorKind::TimedOut
                | io::ErrorKind::Interrupted
                | io::ErrorKind::ConnectionRefused
        ),
        MessageReadError::Parse(_) => true,
    }
}

#[cfg(test)]
pub mod frames {
    //! Hand-built wire frames for tests

    use super::*;

    /// Encode a MAVLink v2 frame around an arbitrary payload
    pub fn encode(header: MavHeader, message_id: u32, payload: &[u8]) -> Vec<u8> {
        let id = message_id.to_le_bytes();
        let mut frame = vec![
            mavlink::MAV_STX_V2,
            payload.len() as u8,
            0,
            0,
            header.sequence,
            header.system_id,
            header.component_id,
            id[0],
            id[1],
            id[2],
        ];
        frame.extend_from_slice(payload);
        let crc = mavlink::calculate_crc(&frame[1..], MavMessage::extra_crc(message_id));
        frame.extend_from_slice(&crc.to_le_bytes());
        frame
    }

    /// Encode a typed message
    pub fn encode_message(header: MavHeader, message: &MavMessage) -> Vec<u8> {
        let mut frame = Vec::new();
        mavlink::write_v2_msg(&mut frame, header, message).unwrap();
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::frames::encode;
    use super::*;
    use mavlink::ardupilotmega::{MagCalStatus, MAG_CAL_REPORT_DATA};

    fn header() -> MavHeader {
        MavHeader {
            system_id: 1,
            component_id: 1,
            sequence: 7,
        }
    }

    fn udp_pair() -> (Endpoint, UdpSocket) {
        let vehicle = UdpSocket::bind("127.0.0.1:0").unwrap();
        let url = ConnectionUrl::new("udpout", "127.0.0.1", vehicle.local_addr().unwrap().port())
            .unwrap();
        (Endpoint::open(&url).unwrap(), vehicle)
    }

    fn endpoint_addr(endpoint: &Endpoint) -> SocketAddr {
        SocketAddr::new([127, 0, 0, 1].into(), endpoint.local_addr().unwrap().port())
    }

    #[test]
    fn test_frame_keeps_unknown_enum_payload() {
        let mut payload = [0u8; 44];
        payload[40] = 2;
        payload[42] = 200;

        let frame = Frame::decode(
            header(),
            RawMessage {
                message_id: 192,
                payload: payload.to_vec(),
            },
        );
        assert!(frame.message.is_none());
        assert_eq!(frame.raw.payload[42], 200);
    }

    #[test]
    fn test_frame_decodes_known_message() {
        let message = MavMessage::MAG_CAL_REPORT(MAG_CAL_REPORT_DATA {
            cal_status: MagCalStatus::MAG_CAL_SUCCESS,
            ..MAG_CAL_REPORT_DATA::default()
        });
        let frame = Frame::decode(header(), RawMessage::encode(&message));
        assert_eq!(frame.message, Some(message));
    }

    #[test]
    fn test_recv_unknown_status_over_udp() {
        let (endpoint, vehicle) = udp_pair();

        let mut payload = [0u8; 44];
        payload[42] = 200;
        vehicle
            .send_to(&encode(header(), 192, &payload), endpoint_addr(&endpoint))
            .unwrap();

        let frame = endpoint.recv().unwrap();
        assert_eq!(frame.header, header());
        assert_eq!(frame.raw.message_id, 192);
        assert_eq!(frame.raw.payload[42], 200);
        assert!(frame.message.is_none());
    }

    #[test]
    fn test_recv_times_out() {
        let (endpoint, _vehicle) = udp_pair();
        let error = endpoint.recv().unwrap_err();
        assert!(is_transient(&error));
    }

    #[test]
    fn test_udpin_replies_to_last_sender() {
        let reserve = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = reserve.local_addr().unwrap().port();
        drop(reserve);
        let endpoint = Endpoint::open(&ConnectionUrl::new("udpin", "127.0.0.1", port).unwrap()).unwrap();

        let message = MavMessage::MAG_CAL_REPORT(MAG_CAL_REPORT_DATA::default());
        // Nobody to reply to yet
        endpoint.send(header(), &message).unwrap();

        let vehicle = UdpSocket::bind("127.0.0.1:0").unwrap();
        vehicle.set_read_timeout(Some(Duration::from_secs(1))).unwrap();
        vehicle
            .send_to(&encode(header(), 191, &[0u8; 27]), ("127.0.0.1", port))
            .unwrap();
        endpoint.recv().unwrap();

        endpoint.send(header(), &message).unwrap();
        let mut buf = [0u8; 300];
        let len = vehicle.recv(&mut buf).unwrap();
        assert_eq!(buf[0], mavlink::MAV_STX_V2);
        assert!(len > 10);
    }
}
