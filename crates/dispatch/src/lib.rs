//! Event ingestion: deduplicate, apply to the state cache, resolve handlers,
//! run them on a bounded pool.

mod apply;
pub mod command;
mod context;
mod cooldown;
mod dedup;
mod dispatcher;
mod registry;

pub use {
    apply::apply_to_cache,
    command::ParsedCommand,
    context::HandlerContext,
    cooldown::{CommandCooldown, CooldownCheck},
    dedup::DedupWindow,
    dispatcher::{CommandStatus, DispatchOutcome, DispatchReport, Dispatcher, DispatcherConfig},
    registry::{CommandInfo, EventHandler, EventMatcher, FnHandler, HandlerId, HandlerRegistry},
};
