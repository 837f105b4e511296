use serde::{Deserialize, Serialize};

use pollbot_core::domain::poll::{Poll, PollId};
use pollbot_core::domain::vote::Vote;
use pollbot_core::service::{OptionTally, VoteResults};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    /// Visible only to the user who ran the command.
    Ephemeral,
    InChannel,
}

/// Body Mattermost expects back from a slash command webhook.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub response_type: ResponseType,
    pub text: String,
}

impl CommandResponse {
    pub fn ephemeral(text: impl Into<String>) -> Self {
        Self { response_type: ResponseType::Ephemeral, text: text.into() }
    }

    pub fn in_channel(text: impl Into<String>) -> Self {
        Self { response_type: ResponseType::InChannel, text: text.into() }
    }
}

/// Accumulates Mattermost markdown line by line.
#[derive(Default)]
pub struct MarkdownBuilder {
    text: String,
}

impl MarkdownBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn heading(mut self, text: impl AsRef<str>) -> Self {
        self.text.push_str("### ");
        self.text.push_str(text.as_ref());
        self.text.push_str("\n\n");
        self
    }

    pub fn field(mut self, label: &str, value: impl AsRef<str>) -> Self {
        self.text.push_str(&format!("**{label}:** {}\n", value.as_ref()));
        self
    }

    pub fn line(mut self, text: impl AsRef<str>) -> Self {
        self.text.push_str(text.as_ref());
        self.text.push('\n');
        self
    }

    pub fn blank(mut self) -> Self {
        self.text.push('\n');
        self
    }

    pub fn numbered<I, S>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for (idx, item) in items.into_iter().enumerate() {
            self.text.push_str(&format!("{}. {}\n", idx + 1, item.as_ref()));
        }
        self
    }

    pub fn build(self) -> String {
        self.text
    }
}

pub fn error_response(message: &str) -> CommandResponse {
    CommandResponse::ephemeral(format!("Error: {message}"))
}

pub fn poll_created(poll: &Poll) -> CommandResponse {
    let text = MarkdownBuilder::new()
        .heading(&poll.question)
        .field("Poll ID", &poll.id.0)
        .blank()
        .numbered(&poll.options)
        .blank()
        .line("**How to vote:**")
        .line(format!("Use `/poll vote {} NUMBER` to vote", poll.id))
        .blank()
        .field("Expires in", poll.remaining_time())
        .build();

    CommandResponse::in_channel(text)
}

/// `option_idx` is zero-based; the confirmation shows it one-based.
pub fn vote_confirmed(poll: &Poll, option_idx: i64) -> CommandResponse {
    let option = usize::try_from(option_idx)
        .ok()
        .and_then(|idx| poll.options.get(idx))
        .map(String::as_str)
        .unwrap_or_default();

    CommandResponse::ephemeral(format!(
        "Your vote for option {}: \"{option}\" has been recorded.",
        option_idx + 1
    ))
}

fn percentage(votes: u64, total: u64) -> u64 {
    if total == 0 {
        0
    } else {
        votes * 100 / total
    }
}

fn tally_lines(builder: MarkdownBuilder, results: &VoteResults) -> MarkdownBuilder {
    results.options.iter().fold(builder, |builder, option| {
        builder
            .line(format!(
                "{}. **{}** - **{} votes** ({}%)",
                option.index + 1,
                option.text,
                option.votes,
                percentage(option.votes, results.total_votes)
            ))
            .blank()
    })
}

pub fn poll_results(results: &VoteResults, ephemeral: bool) -> CommandResponse {
    let mut builder = MarkdownBuilder::new()
        .heading(format!("Results: {}", results.question))
        .field("Poll ID", &results.poll_id.0)
        .field("Total votes", results.total_votes.to_string())
        .blank();

    builder = match (&results.remaining_time, results.is_active) {
        (Some(remaining), true) => {
            builder.field("Status", format!("Active (Remaining time: {remaining})")).blank()
        }
        _ => builder.field("Status", "Closed").blank(),
    };

    builder = tally_lines(builder, results);
    if results.is_active {
        builder = builder.line(format!("**To vote:** `/poll vote {} NUMBER`", results.poll_id));
    }

    let text = builder.build();
    if ephemeral {
        CommandResponse::ephemeral(text)
    } else {
        CommandResponse::in_channel(text)
    }
}

pub fn poll_ended(results: &VoteResults) -> CommandResponse {
    let mut builder = MarkdownBuilder::new()
        .heading(format!("Poll Ended: {}", results.question))
        .field("Poll ID", &results.poll_id.0)
        .field("Total votes", results.total_votes.to_string())
        .blank();

    let leaders: Vec<&OptionTally> = results.leaders();
    match leaders.as_slice() {
        [] => {}
        [winner] => {
            builder = builder.field("Winner", format!("{} with {} votes", winner.text, winner.votes)).blank();
        }
        tied => {
            let names: Vec<&str> = tied.iter().map(|option| option.text.as_str()).collect();
            builder = builder
                .field("Tie between", format!("{} with {} votes each", names.join(", "), tied[0].votes))
                .blank();
        }
    }

    CommandResponse::in_channel(tally_lines(builder, results).build())
}

pub fn poll_deleted(poll_id: &PollId) -> CommandResponse {
    CommandResponse::ephemeral(format!("Poll with ID `{poll_id}` has been deleted."))
}

pub fn poll_info(poll: &Poll, own_vote: Option<&Vote>) -> CommandResponse {
    let mut builder = MarkdownBuilder::new()
        .heading("Poll Information")
        .field("Question", &poll.question)
        .blank()
        .field("Poll ID", &poll.id.0)
        .field("Status", poll.status.as_str())
        .field("Created by", &poll.created_by)
        .field("Created at", poll.formatted_creation_time());

    builder = if poll.is_active() {
        builder
            .field("Expires at", poll.formatted_expiration_time())
            .field("Remaining time", poll.remaining_time())
            .blank()
    } else {
        builder.field("Expired at", poll.formatted_expiration_time()).blank()
    };

    builder = builder.line("**Options:**").numbered(&poll.options);

    if let Some(vote) = own_vote {
        let option = usize::try_from(vote.option_idx)
            .ok()
            .and_then(|idx| poll.options.get(idx))
            .map(String::as_str)
            .unwrap_or("unknown option");
        builder = builder.blank().field("Your vote", format!("{}. {option}", vote.option_idx + 1));
    }

    CommandResponse::ephemeral(builder.build())
}

pub fn poll_list(title: &str, polls: &[Poll]) -> CommandResponse {
    if polls.is_empty() {
        return CommandResponse::ephemeral(format!("{title}: no polls found."));
    }

    let builder = polls.iter().fold(MarkdownBuilder::new().heading(title), |builder, poll| {
        builder.line(format!("- `{}` **{}** ({})", poll.id, poll.question, poll.status))
    });
    CommandResponse::ephemeral(builder.build())
}

pub fn help_text() -> &'static str {
    r#"Available commands:

/poll create "Question" "Option 1" "Option 2" [--duration=86400]
    Create a new poll with specified options and optional duration in seconds

/poll vote POLL_ID OPTION_NUMBER
    Vote for an option in the specified poll

/poll results POLL_ID
    Show current results of the poll

/poll end POLL_ID
    End the poll and show final results (only creator can end)

/poll delete POLL_ID
    Delete the poll (only creator can delete)

/poll info POLL_ID
    Show detailed information about the poll

/poll list
    List polls in this channel

/poll mine
    List polls you created"#
}

pub fn help_response() -> CommandResponse {
    CommandResponse::ephemeral(help_text())
}

/// Channel post announcing that a poll ran out of time.
pub fn poll_expired_notice(poll: &Poll) -> String {
    format!(
        "Poll time ended: \"{}\". Use `/poll results {}` to see the final results.",
        poll.question, poll.id
    )
}
