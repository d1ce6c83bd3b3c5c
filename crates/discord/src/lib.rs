//! Discord adapter: gateway JSON codec, WebSocket transport, HTTP REST
//! client, REST-backed entity fetcher, and the runtime that wires them to the
//! cache, action queue, dispatcher and gateway session.

pub mod codec;
mod fetch;
mod rest;
mod runtime;
mod transport;
mod wire;

pub use {
    codec::Identity,
    fetch::DiscordFetcher,
    rest::HttpRestClient,
    runtime::{BotIdentity, BotRuntime},
    transport::WsTransport,
};
