//! Mattermost integration for pollbot.
//!
//! - **Slash commands** (`commands`): `/poll create`, `/poll vote`, `/poll results`, ...
//!   parsed shell-style and routed onto the poll service.
//! - **Responses** (`responses`): markdown replies in the shape Mattermost expects
//!   from a slash command webhook (`response_type` + `text`).
//! - **Client** (`client`): REST client used to announce expired polls in their channel.
//!
//! # Setup
//!
//! 1. Create a slash command `/poll` pointing at `POST {server}/command`.
//! 2. Copy its token into `POLLBOT_MATTERMOST_WEBHOOK_TOKEN`.
//! 3. Optionally create a bot account and set `POLLBOT_MATTERMOST_URL` and
//!    `POLLBOT_MATTERMOST_BOT_TOKEN` to get "poll ended" channel posts.
//!
//! ```text
//! Mattermost → POST /command → CommandRouter → PollService → PollStore
//!                                   ↓
//!                          CommandResponse (markdown)
//! ```

pub mod client;
pub mod commands;
pub mod responses;

pub use client::MattermostClient;
pub use commands::{
    parse_poll_command, CommandContext, CommandParseError, CommandRouter, PollCommand,
    PollCommandService, SlashCommandPayload,
};
pub use responses::{CommandResponse, ResponseType};
