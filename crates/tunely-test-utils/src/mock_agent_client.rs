//! A minimal WebSocket client that speaks the Tunely control-channel
//! protocol, for driving the broker's WS upgrade endpoint in integration
//! tests without a real agent process. Adapted from the teacher's
//! `rt_test_utils::mock_ws_client::MockWsClient`, narrowed to Tunely's
//! `tunely_protocol::Message` wire type.

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message as WsFrame;
use tokio_tungstenite::MaybeTlsStream;
use tunely_protocol::{codec, DecodedFrame, Message};

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub struct MockAgentClient {
    write: futures_util::stream::SplitSink<WsStream, WsFrame>,
    read: futures_util::stream::SplitStream<WsStream>,
}

impl MockAgentClient {
    pub async fn connect(url: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url).await?;
        let (write, read) = ws_stream.split();
        Ok(Self { write, read })
    }

    pub async fn send(&mut self, msg: &Message) -> Result<(), Box<dyn std::error::Error>> {
        let text = codec::encode(msg)?;
        self.write.send(WsFrame::Text(text.into())).await?;
        Ok(())
    }

    /// Receive the next known frame, skipping WS-level ping/pong control
    /// frames and silently dropping any frame with an unrecognized `type`.
    pub async fn recv(&mut self) -> Result<Message, Box<dyn std::error::Error>> {
        loop {
            match self.read.next().await {
                Some(Ok(WsFrame::Text(text))) => match codec::decode(&text, usize::MAX)? {
                    DecodedFrame::Known(msg) => return Ok(msg),
                    DecodedFrame::Unknown(_) => continue,
                },
                Some(Ok(WsFrame::Ping(_))) | Some(Ok(WsFrame::Pong(_))) => continue,
                Some(Ok(WsFrame::Close(_))) => return Err("connection closed by broker".into()),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err("connection stream ended".into()),
            }
        }
    }

    pub async fn close(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.write.send(WsFrame::Close(None)).await?;
        Ok(())
    }
}
