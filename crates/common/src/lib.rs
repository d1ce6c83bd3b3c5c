//! Shared types, error definitions, and telemetry used across all dbhq crates.
//!
//! The entity model, gateway events and REST request/response shapes live here
//! so the cache, action queue, dispatcher and gateway session can exchange
//! them without depending on each other.

pub mod entity;
pub mod error;
pub mod event;
pub mod ids;
pub mod rest;
pub mod telemetry;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use {
    entity::{Entity, EntityData, Version},
    error::{Error, ErrorKind, FromMessage, Result},
    event::{Envelope, EventKind, EventPayload},
    ids::{EntityKey, EntityKind, Snowflake},
    rest::{
        MAX_REMOTE_DELAY, Method, RestClient, RestRequest, RestResponse, RouteKey, delay_from_secs,
    },
    telemetry::{CoreEvent, TelemetrySink, TracingSink},
};
