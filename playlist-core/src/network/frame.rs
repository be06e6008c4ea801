//! Session frames
//!
//! Control frames and application payloads share one request-response
//! protocol. Each frame is a tag byte followed by its body.

use std::io;

use async_trait::async_trait;
use futures::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use libp2p::{request_response, StreamProtocol};

use super::discovery::Announcement;

/// Request-response protocol carrying session frames
pub const SESSION_PROTOCOL: StreamProtocol = StreamProtocol::new("/shared-playlist/session/1.0.0");

/// Largest frame we read or write
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

const TAG_PROBE: u8 = 0x01;
const TAG_INVITE: u8 = 0x02;
const TAG_DATA: u8 = 0x03;
const TAG_LEAVE: u8 = 0x04;
const TAG_KEEP_ALIVE: u8 = 0x05;

const TAG_ANNOUNCE: u8 = 0x81;
const TAG_HIDDEN: u8 = 0x82;
const TAG_ACCEPTED: u8 = 0x83;
const TAG_REJECTED: u8 = 0x84;
const TAG_ACK: u8 = 0x85;

/// Frames sent as requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionFrame {
    /// Are you advertising a playlist?
    Probe,
    /// Ask to join the receiver's session
    Invite,
    /// Opaque application payload
    Data(Vec<u8>),
    /// We are leaving the session
    Leave,
    /// Session heartbeat; answered with [`SessionReply::Ack`]
    KeepAlive,
}

/// Frames sent as replies
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionReply {
    Announce(Announcement),
    /// Not advertising
    Hidden,
    Accepted,
    Rejected,
    Ack,
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn check_size(len: usize) -> io::Result<()> {
    if len > MAX_FRAME_SIZE {
        return Err(invalid(format!(
            "frame of {} bytes exceeds {} byte limit",
            len, MAX_FRAME_SIZE
        )));
    }
    Ok(())
}

impl SessionFrame {
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let bytes = match self {
            SessionFrame::Probe => vec![TAG_PROBE],
            SessionFrame::Invite => vec![TAG_INVITE],
            SessionFrame::Data(payload) => {
                let mut bytes = Vec::with_capacity(payload.len() + 1);
                bytes.push(TAG_DATA);
                bytes.extend_from_slice(payload);
                bytes
            }
            SessionFrame::Leave => vec![TAG_LEAVE],
            SessionFrame::KeepAlive => vec![TAG_KEEP_ALIVE],
        };
        check_size(bytes.len())?;
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> io::Result<Self> {
        let (tag, body) = bytes
            .split_first()
            .ok_or_else(|| invalid("empty session frame"))?;
        match *tag {
            TAG_PROBE => Ok(SessionFrame::Probe),
            TAG_INVITE => Ok(SessionFrame::Invite),
            TAG_DATA => Ok(SessionFrame::Data(body.to_vec())),
            TAG_LEAVE => Ok(SessionFrame::Leave),
            TAG_KEEP_ALIVE => Ok(SessionFrame::KeepAlive),
            other => Err(invalid(format!("unknown request tag 0x{:02x}", other))),
        }
    }
}

impl SessionReply {
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let bytes = match self {
            SessionReply::Announce(announcement) => {
                let body = serde_json::to_vec(announcement).map_err(io::Error::other)?;
                let mut bytes = Vec::with_capacity(body.len() + 1);
                bytes.push(TAG_ANNOUNCE);
                bytes.extend_from_slice(&body);
                bytes
            }
            SessionReply::Hidden => vec![TAG_HIDDEN],
            SessionReply::Accepted => vec![TAG_ACCEPTED],
            SessionReply::Rejected => vec![TAG_REJECTED],
            SessionReply::Ack => vec![TAG_ACK],
        };
        check_size(bytes.len())?;
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> io::Result<Self> {
        let (tag, body) = bytes
            .split_first()
            .ok_or_else(|| invalid("empty session reply"))?;
        match *tag {
            TAG_ANNOUNCE => serde_json::from_slice(body)
                .map(SessionReply::Announce)
                .map_err(|e| invalid(format!("bad announcement: {}", e))),
            TAG_HIDDEN => Ok(SessionReply::Hidden),
            TAG_ACCEPTED => Ok(SessionReply::Accepted),
            TAG_REJECTED => Ok(SessionReply::Rejected),
            TAG_ACK => Ok(SessionReply::Ack),
            other => Err(invalid(format!("unknown reply tag 0x{:02x}", other))),
        }
    }
}

async fn read_frame<T>(io: &mut T) -> io::Result<Vec<u8>>
where
    T: AsyncRead + Unpin + Send,
{
    let mut bytes = Vec::new();
    // One extra byte so oversized frames are detected rather than truncated
    io.take(MAX_FRAME_SIZE as u64 + 1)
        .read_to_end(&mut bytes)
        .await?;
    check_size(bytes.len())?;
    Ok(bytes)
}

async fn write_frame<T>(io: &mut T, bytes: &[u8]) -> io::Result<()>
where
    T: AsyncWrite + Unpin + Send,
{
    io.write_all(bytes).await?;
    io.close().await
}

/// request-response codec for [`SessionFrame`] / [`SessionReply`]
#[derive(Debug, Clone, Default)]
pub struct FrameCodec;

#[async_trait]
impl request_response::Codec for FrameCodec {
    type Protocol = StreamProtocol;
    type Request = SessionFrame;
    type Response = SessionReply;

    async fn read_request<T>(&mut self, _: &Self::Protocol, io: &mut T) -> io::Result<Self::Request>
    where
        T: AsyncRead + Unpin + Send,
    {
        SessionFrame::from_bytes(&read_frame(io).await?)
    }

    async fn read_response<T>(
        &mut self,
        _: &Self::Protocol,
        io: &mut T,
    ) -> io::Result<Self::Response>
    where
        T: AsyncRead + Unpin + Send,
    {
        SessionReply::from_bytes(&read_frame(io).await?)
    }

    async fn write_request<T>(
        &mut self,
        _: &Self::Protocol,
        io: &mut T,
        request: Self::Request,
    ) -> io::Result<()>
    where
        T: AsyncWrite + Unpin + Send,
    {
        write_frame(io, &request.to_bytes()?).await
    }

    async fn write_response<T>(
        &mut self,
        _: &Self::Protocol,
        io: &mut T,
        response: Self::Response,
    ) -> io::Result<()>
    where
        T: AsyncWrite + Unpin + Send,
    {
        write_frame(io, &response.to_bytes()?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::discovery::{discovery_info, SERVICE_TYPE};
    use futures::io::Cursor;
    use libp2p::request_response::Codec;

    fn announcement() -> Announcement {
        Announcement {
            service_type: SERVICE_TYPE.to_string(),
            display_name: "Living room".to_string(),
            info: discovery_info("Party"),
        }
    }

    #[test]
    fn test_request_layout() {
        assert_eq!(SessionFrame::Probe.to_bytes().unwrap(), vec![TAG_PROBE]);
        assert_eq!(
            SessionFrame::Data(b"{}".to_vec()).to_bytes().unwrap(),
            vec![TAG_DATA, b'{', b'}']
        );
        assert_eq!(
            SessionFrame::from_bytes(&[TAG_DATA]).unwrap(),
            SessionFrame::Data(Vec::new())
        );
        assert_eq!(SessionFrame::KeepAlive.to_bytes().unwrap(), vec![0x05]);
        assert_eq!(
            SessionFrame::from_bytes(&[0x05]).unwrap(),
            SessionFrame::KeepAlive
        );
    }

    #[test]
    fn test_unknown_tags_are_invalid_data() {
        let err = SessionFrame::from_bytes(&[0x7f]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let err = SessionReply::from_bytes(&[TAG_PROBE]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        assert!(SessionFrame::from_bytes(&[]).is_err());
    }

    #[test]
    fn test_announce_carries_json() {
        let bytes = SessionReply::Announce(announcement()).to_bytes().unwrap();
        assert_eq!(bytes[0], TAG_ANNOUNCE);
        let body: serde_json::Value = serde_json::from_slice(&bytes[1..]).unwrap();
        assert_eq!(body["displayName"], "Living room");
        assert_eq!(body["info"]["playlistName"], "Party");

        assert_eq!(
            SessionReply::from_bytes(&bytes).unwrap(),
            SessionReply::Announce(announcement())
        );
        assert!(SessionReply::from_bytes(&[TAG_ANNOUNCE, b'x']).is_err());
    }

    #[test]
    fn test_oversized_frame_refused() {
        let frame = SessionFrame::Data(vec![0; MAX_FRAME_SIZE]);
        assert!(frame.to_bytes().is_err());
        assert!(SessionFrame::Data(vec![0; MAX_FRAME_SIZE - 1])
            .to_bytes()
            .is_ok());
    }

    #[tokio::test]
    async fn test_codec_over_stream() {
        let mut codec = FrameCodec;
        let mut out = Cursor::new(Vec::new());
        codec
            .write_request(
                &SESSION_PROTOCOL,
                &mut out,
                SessionFrame::Data(b"hello".to_vec()),
            )
            .await
            .unwrap();

        let mut input = Cursor::new(out.into_inner());
        let frame = codec
            .read_request(&SESSION_PROTOCOL, &mut input)
            .await
            .unwrap();
        assert_eq!(frame, SessionFrame::Data(b"hello".to_vec()));

        let mut too_big = Cursor::new(vec![TAG_DATA; MAX_FRAME_SIZE + 10]);
        assert!(codec
            .read_request(&SESSION_PROTOCOL, &mut too_big)
            .await
            .is_err());
    }
}
