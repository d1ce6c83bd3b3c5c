//! WebSocket gateway transport.

use std::sync::Mutex;

use {
    async_trait::async_trait,
    dbhq_common::{Error, Method, RestRequest, Result, RouteKey},
    dbhq_gateway::{Command, Frame, GatewayConnection, GatewayTransport},
    dbhq_ratelimit::LimitedRest,
    futures::{SinkExt, StreamExt},
    tokio::net::TcpStream,
    tokio_tungstenite::{
        MaybeTlsStream, WebSocketStream, connect_async,
        tungstenite::{
            Message,
            protocol::{CloseFrame, frame::coding::CloseCode},
        },
    },
    tracing::{debug, info, warn},
};

use crate::{
    codec::{self, Identity},
    wire,
};

const QUERY: &str = "?v=10&encoding=json";

/// Connects to the gateway over `tokio-tungstenite`.
///
/// The gateway address comes from configuration when set, otherwise from
/// `GET /gateway/bot`, looked up once and reused.
pub struct WsTransport {
    identity: Identity,
    configured_url: Option<String>,
    rest: LimitedRest,
    discovered: Mutex<Option<String>>,
}

impl WsTransport {
    #[must_use]
    pub fn new(identity: Identity, gateway_url: Option<String>, rest: LimitedRest) -> Self {
        Self {
            identity,
            configured_url: gateway_url,
            rest,
            discovered: Mutex::new(None),
        }
    }

    async fn gateway_url(&self) -> Result<String> {
        if let Some(url) = &self.configured_url {
            return Ok(url.clone());
        }
        if let Some(url) = self
            .discovered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        {
            return Ok(url);
        }

        let request = RestRequest::new(
            Method::Get,
            "/gateway/bot",
            RouteKey::new(Method::Get, "/gateway/bot"),
        );
        let response = self.rest.send(&request).await?;
        let gateway: wire::GatewayBot =
            serde_json::from_value(response.body).map_err(Error::malformed)?;
        debug!(url = %gateway.url, "gateway url discovered");
        *self.discovered.lock().unwrap_or_else(|e| e.into_inner()) = Some(gateway.url.clone());
        Ok(gateway.url)
    }
}

#[async_trait]
impl GatewayTransport for WsTransport {
    async fn connect(&self, resume_url: Option<&str>) -> Result<Box<dyn GatewayConnection>> {
        let base = match resume_url {
            Some(url) => url.to_string(),
            None => self.gateway_url().await?,
        };
        let url = format!("{}/{QUERY}", base.trim_end_matches('/'));
        info!(url = %url, resuming = resume_url.is_some(), "connecting to gateway");

        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::transient(format!("gateway connect failed: {e}")))?;
        Ok(Box::new(WsConnection {
            stream,
            identity: self.identity.clone(),
        }))
    }
}

struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    identity: Identity,
}

#[async_trait]
impl GatewayConnection for WsConnection {
    async fn send(&mut self, command: Command) -> Result<()> {
        let text = codec::encode(&command, &self.identity);
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| Error::transient(format!("gateway send failed: {e}")))
    }

    async fn recv(&mut self) -> Result<Option<Frame>> {
        // Only `next()` is awaited, so dropping this future loses nothing.
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => match codec::decode(&text) {
                    Ok(Some(frame)) => return Ok(Some(frame)),
                    Ok(None) => {},
                    Err(e) => warn!(error = %e, "dropping undecodable gateway frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.as_str().to_owned()))
                        .unwrap_or((1005, String::new()));
                    info!(code, reason = %reason, "gateway closed the connection");
                    return codec::close_to_frame(code, &reason);
                },
                Some(Ok(_)) => {},
                Some(Err(e)) => return Err(Error::transient(format!("gateway read failed: {e}"))),
                None => return Ok(None),
            }
        }
    }

    async fn close(&mut self) {
        // A 1000 close would invalidate the session; 4000 keeps it resumable.
        let frame = CloseFrame {
            code: CloseCode::Library(4000),
            reason: "reconnecting".into(),
        };
        if let Err(e) = self.stream.close(Some(frame)).await {
            debug!(error = %e, "gateway close failed");
        }
    }
}
