//! Commands every bot process registers.

use std::sync::Arc;

use dbhq_dispatch::{CommandInfo, FnHandler, HandlerContext, HandlerRegistry};

pub fn register(registry: &HandlerRegistry, prefix: &str) {
    let prefix = prefix.to_string();
    registry.register_command(
        "help",
        "List available commands",
        Arc::new(FnHandler::new("help", move |ctx: HandlerContext| {
            let text = render_help(&ctx.commands(), &prefix);
            async move {
                let _ = ctx.reply(text);
                Ok::<(), anyhow::Error>(())
            }
        })),
    );
}

fn render_help(commands: &[CommandInfo], prefix: &str) -> String {
    let mut text = String::from("Available commands:");
    for command in commands {
        text.push_str(&format!("\n`{prefix}{}`", command.name));
        if !command.description.is_empty() {
            text.push_str(&format!(" - {}", command.description));
        }
    }
    text
}
