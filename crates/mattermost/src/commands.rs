use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use pollbot_core::domain::poll::{Poll, PollId};
use pollbot_core::domain::vote::Vote;
use pollbot_core::errors::{ErrorKind, PollError};
use pollbot_core::service::{PollService, VoteResults};

use crate::responses::{self, CommandResponse};

/// Form fields Mattermost posts for a slash command. Unknown fields are
/// ignored; missing ones default to empty so the HTTP layer can report them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct SlashCommandPayload {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub team_id: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub trigger_id: String,
}

impl SlashCommandPayload {
    pub const REQUIRED_FIELDS: [&'static str; 5] = ["token", "team_id", "channel_id", "user_id", "command"];

    /// Names of required fields that are empty.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [&self.token, &self.team_id, &self.channel_id, &self.user_id, &self.command]
            .into_iter()
            .zip(Self::REQUIRED_FIELDS)
            .filter(|(value, _)| value.trim().is_empty())
            .map(|(_, name)| name)
            .collect()
    }

    pub fn context(&self, request_id: impl Into<String>) -> CommandContext {
        CommandContext {
            user_id: self.user_id.clone(),
            channel_id: self.channel_id.clone(),
            team_id: self.team_id.clone(),
            request_id: request_id.into(),
        }
    }
}

/// Who ran a command, and where.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandContext {
    pub user_id: String,
    pub channel_id: String,
    pub team_id: String,
    pub request_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollCommand {
    Create { question: String, options: Vec<String>, duration_secs: i64 },
    /// `option_idx` is zero-based; users type it one-based.
    Vote { poll_id: PollId, option_idx: i64 },
    Results { poll_id: PollId },
    End { poll_id: PollId },
    Delete { poll_id: PollId },
    Info { poll_id: PollId },
    List,
    Mine,
    Help,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("error parsing command: unbalanced quotes")]
    Tokenize,
    #[error("invalid subcommand")]
    InvalidSubcommand(String),
    #[error("poll ID is required")]
    MissingPollId,
    #[error("option index is required")]
    MissingOptionIndex,
    #[error("invalid duration format, use --duration=SECONDS")]
    InvalidDuration,
    #[error(transparent)]
    Poll(#[from] PollError),
}

impl CommandParseError {
    pub fn user_message(&self) -> String {
        match self {
            Self::Poll(error) => error.user_message(),
            other => other.to_string(),
        }
    }
}

const DURATION_FLAG: &str = "--duration=";

/// Parses the text after `/poll`. Words are split shell-style so quoted
/// questions and options may contain spaces.
pub fn parse_poll_command(text: &str) -> Result<PollCommand, CommandParseError> {
    if text.trim().is_empty() {
        return Ok(PollCommand::Help);
    }

    let args = shlex::split(text).ok_or(CommandParseError::Tokenize)?;
    let Some((verb, rest)) = args.split_first() else {
        return Ok(PollCommand::Help);
    };

    match verb.to_ascii_lowercase().as_str() {
        "create" => parse_create(rest),
        "vote" => parse_vote(rest),
        "results" => Ok(PollCommand::Results { poll_id: require_poll_id(rest)? }),
        "end" => Ok(PollCommand::End { poll_id: require_poll_id(rest)? }),
        "delete" => Ok(PollCommand::Delete { poll_id: require_poll_id(rest)? }),
        "info" => Ok(PollCommand::Info { poll_id: require_poll_id(rest)? }),
        "list" => Ok(PollCommand::List),
        "mine" => Ok(PollCommand::Mine),
        "help" | "" => Ok(PollCommand::Help),
        other => Err(CommandParseError::InvalidSubcommand(other.to_owned())),
    }
}

fn parse_create(args: &[String]) -> Result<PollCommand, CommandParseError> {
    let Some((question, rest)) = args.split_first() else {
        return Err(PollError::TooFewOptions.into());
    };
    if rest.is_empty() {
        return Err(PollError::TooFewOptions.into());
    }
    if question.is_empty() {
        return Err(PollError::EmptyQuestion.into());
    }

    let mut duration_secs = 0;
    let mut options = Vec::with_capacity(rest.len());
    let mut duration_seen = false;
    for arg in rest {
        match arg.strip_prefix(DURATION_FLAG) {
            Some(value) if !duration_seen => {
                duration_secs = value.parse::<i64>().map_err(|_| CommandParseError::InvalidDuration)?;
                duration_seen = true;
            }
            _ => options.push(arg.clone()),
        }
    }

    if options.len() < 2 {
        return Err(PollError::TooFewOptions.into());
    }

    let mut seen = HashSet::with_capacity(options.len());
    if !options.iter().all(|option| seen.insert(option.as_str())) {
        return Err(PollError::DuplicateOption.into());
    }

    Ok(PollCommand::Create { question: question.clone(), options, duration_secs })
}

fn parse_vote(args: &[String]) -> Result<PollCommand, CommandParseError> {
    let poll_id = require_poll_id(args)?;
    let number = args.get(1).ok_or(CommandParseError::MissingOptionIndex)?;
    let number = number.parse::<i64>().map_err(|_| PollError::InvalidOption)?;
    if number < 1 {
        return Err(PollError::InvalidOption.into());
    }

    Ok(PollCommand::Vote { poll_id, option_idx: number - 1 })
}

fn require_poll_id(args: &[String]) -> Result<PollId, CommandParseError> {
    args.first().map(|id| PollId(id.clone())).ok_or(CommandParseError::MissingPollId)
}

/// Poll operations the command router needs.
#[async_trait]
pub trait PollCommandService: Send + Sync {
    async fn create_poll(
        &self,
        question: &str,
        options: Vec<String>,
        created_by: &str,
        channel_id: &str,
        duration_secs: i64,
    ) -> Result<Poll, PollError>;

    async fn vote(&self, poll_id: &PollId, user_id: &str, option_idx: i64) -> Result<(), PollError>;

    async fn get_poll(&self, poll_id: &PollId) -> Result<Poll, PollError>;

    async fn calculate_results(&self, poll: &Poll) -> Result<VoteResults, PollError>;

    async fn end_poll(&self, poll_id: &PollId, user_id: &str) -> Result<VoteResults, PollError>;

    async fn delete_poll(&self, poll_id: &PollId, user_id: &str) -> Result<(), PollError>;

    async fn user_vote(&self, poll_id: &PollId, user_id: &str) -> Result<Vote, PollError>;

    async fn list_channel_polls(&self, channel_id: &str) -> Result<Vec<Poll>, PollError>;

    async fn list_user_polls(&self, user_id: &str) -> Result<Vec<Poll>, PollError>;
}

#[async_trait]
impl PollCommandService for PollService {
    async fn create_poll(
        &self,
        question: &str,
        options: Vec<String>,
        created_by: &str,
        channel_id: &str,
        duration_secs: i64,
    ) -> Result<Poll, PollError> {
        PollService::create_poll(self, question, options, created_by, channel_id, duration_secs).await
    }

    async fn vote(&self, poll_id: &PollId, user_id: &str, option_idx: i64) -> Result<(), PollError> {
        PollService::vote(self, poll_id, user_id, option_idx).await
    }

    async fn get_poll(&self, poll_id: &PollId) -> Result<Poll, PollError> {
        PollService::get_poll(self, poll_id).await
    }

    async fn calculate_results(&self, poll: &Poll) -> Result<VoteResults, PollError> {
        PollService::calculate_results(self, poll).await
    }

    async fn end_poll(&self, poll_id: &PollId, user_id: &str) -> Result<VoteResults, PollError> {
        PollService::end_poll(self, poll_id, user_id).await
    }

    async fn delete_poll(&self, poll_id: &PollId, user_id: &str) -> Result<(), PollError> {
        PollService::delete_poll(self, poll_id, user_id).await
    }

    async fn user_vote(&self, poll_id: &PollId, user_id: &str) -> Result<Vote, PollError> {
        PollService::user_vote(self, poll_id, user_id).await
    }

    async fn list_channel_polls(&self, channel_id: &str) -> Result<Vec<Poll>, PollError> {
        PollService::list_channel_polls(self, channel_id).await
    }

    async fn list_user_polls(&self, user_id: &str) -> Result<Vec<Poll>, PollError> {
        PollService::list_user_polls(self, user_id).await
    }
}

pub struct CommandRouter<S> {
    service: Arc<S>,
}

impl<S> Clone for CommandRouter<S> {
    fn clone(&self) -> Self {
        Self { service: self.service.clone() }
    }
}

impl<S> CommandRouter<S>
where
    S: PollCommandService,
{
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }

    /// Parses and runs one command. Every outcome, including failures, is
    /// rendered as a response for the user.
    pub async fn route(&self, text: &str, context: &CommandContext) -> CommandResponse {
        let command = match parse_poll_command(text) {
            Ok(command) => command,
            Err(error) => {
                debug!(
                    event_name = "command.parse_failed",
                    request_id = %context.request_id,
                    user_id = %context.user_id,
                    error = %error,
                    "slash command rejected"
                );
                return responses::error_response(&error.user_message());
            }
        };

        match self.dispatch(command, context).await {
            Ok(response) => response,
            Err(error) => {
                if error.kind() == ErrorKind::Storage {
                    warn!(
                        event_name = "command.failed",
                        request_id = %context.request_id,
                        user_id = %context.user_id,
                        channel_id = %context.channel_id,
                        error = %error,
                        "poll command failed"
                    );
                } else {
                    debug!(
                        event_name = "command.denied",
                        request_id = %context.request_id,
                        user_id = %context.user_id,
                        error = %error,
                        "poll command denied"
                    );
                }
                responses::error_response(&error.user_message())
            }
        }
    }

    async fn dispatch(
        &self,
        command: PollCommand,
        context: &CommandContext,
    ) -> Result<CommandResponse, PollError> {
        match command {
            PollCommand::Create { question, options, duration_secs } => {
                let poll = self
                    .service
                    .create_poll(&question, options, &context.user_id, &context.channel_id, duration_secs)
                    .await?;
                Ok(responses::poll_created(&poll))
            }
            PollCommand::Vote { poll_id, option_idx } => {
                let poll = self.service.get_poll(&poll_id).await?;
                self.service.vote(&poll_id, &context.user_id, option_idx).await?;
                Ok(responses::vote_confirmed(&poll, option_idx))
            }
            PollCommand::Results { poll_id } => {
                let poll = self.service.get_poll(&poll_id).await?;
                let results = self.service.calculate_results(&poll).await?;
                Ok(responses::poll_results(&results, !poll.can_be_manipulated_by(&context.user_id)))
            }
            PollCommand::End { poll_id } => {
                let results = self.service.end_poll(&poll_id, &context.user_id).await?;
                Ok(responses::poll_ended(&results))
            }
            PollCommand::Delete { poll_id } => {
                self.service.delete_poll(&poll_id, &context.user_id).await?;
                Ok(responses::poll_deleted(&poll_id))
            }
            PollCommand::Info { poll_id } => {
                let poll = self.service.get_poll(&poll_id).await?;
                let own_vote = match self.service.user_vote(&poll_id, &context.user_id).await {
                    Ok(vote) => Some(vote),
                    Err(PollError::VoteNotFound) => None,
                    Err(error) => return Err(error),
                };
                Ok(responses::poll_info(&poll, own_vote.as_ref()))
            }
            PollCommand::List => {
                let polls = self.service.list_channel_polls(&context.channel_id).await?;
                Ok(responses::poll_list("Polls in this channel", &polls))
            }
            PollCommand::Mine => {
                let polls = self.service.list_user_polls(&context.user_id).await?;
                Ok(responses::poll_list("Your polls", &polls))
            }
            PollCommand::Help => Ok(responses::help_response()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use pollbot_core::config::PollConfig;
    use pollbot_core::domain::poll::{Poll, PollId};
    use pollbot_core::domain::vote::Vote;
    use pollbot_core::errors::PollError;
    use pollbot_core::service::{PollService, VoteResults};
    use pollbot_db::InMemoryPollStore;

    use super::{
        parse_poll_command, CommandContext, CommandParseError, CommandRouter, PollCommand,
        PollCommandService, SlashCommandPayload,
    };
    use crate::responses::ResponseType;

    fn context(user_id: &str) -> CommandContext {
        CommandContext {
            user_id: user_id.to_owned(),
            channel_id: "c1".to_owned(),
            team_id: "t1".to_owned(),
            request_id: format!("req-{user_id}"),
        }
    }

    fn router() -> CommandRouter<PollService> {
        let store = Arc::new(InMemoryPollStore::default());
        CommandRouter::new(Arc::new(PollService::new(store, PollConfig::default())))
    }

    /// Delegates to a real service, but every poll read fails once a vote
    /// has been stored.
    struct ReadsFailAfterVote {
        inner: PollService,
        voted: AtomicBool,
    }

    #[async_trait]
    impl PollCommandService for ReadsFailAfterVote {
        async fn create_poll(
            &self,
            question: &str,
            options: Vec<String>,
            created_by: &str,
            channel_id: &str,
            duration_secs: i64,
        ) -> Result<Poll, PollError> {
            self.inner.create_poll(question, options, created_by, channel_id, duration_secs).await
        }

        async fn vote(&self, poll_id: &PollId, user_id: &str, option_idx: i64) -> Result<(), PollError> {
            self.inner.vote(poll_id, user_id, option_idx).await?;
            self.voted.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn get_poll(&self, poll_id: &PollId) -> Result<Poll, PollError> {
            if self.voted.load(Ordering::SeqCst) {
                return Err(PollError::Storage("error getting poll: disk unplugged".to_owned()));
            }
            self.inner.get_poll(poll_id).await
        }

        async fn calculate_results(&self, poll: &Poll) -> Result<VoteResults, PollError> {
            self.inner.calculate_results(poll).await
        }

        async fn end_poll(&self, poll_id: &PollId, user_id: &str) -> Result<VoteResults, PollError> {
            self.inner.end_poll(poll_id, user_id).await
        }

        async fn delete_poll(&self, poll_id: &PollId, user_id: &str) -> Result<(), PollError> {
            self.inner.delete_poll(poll_id, user_id).await
        }

        async fn user_vote(&self, poll_id: &PollId, user_id: &str) -> Result<Vote, PollError> {
            self.inner.user_vote(poll_id, user_id).await
        }

        async fn list_channel_polls(&self, channel_id: &str) -> Result<Vec<Poll>, PollError> {
            self.inner.list_channel_polls(channel_id).await
        }

        async fn list_user_polls(&self, user_id: &str) -> Result<Vec<Poll>, PollError> {
            self.inner.list_user_polls(user_id).await
        }
    }

    fn poll_id_from(text: &str) -> String {
        text.lines()
            .find_map(|line| line.strip_prefix("**Poll ID:** "))
            .map(str::to_owned)
            .expect("poll id line")
    }

    #[test]
    fn empty_text_and_help_show_help() {
        assert_eq!(parse_poll_command(""), Ok(PollCommand::Help));
        assert_eq!(parse_poll_command("   "), Ok(PollCommand::Help));
        assert_eq!(parse_poll_command("HELP"), Ok(PollCommand::Help));
    }

    #[test]
    fn create_groups_quoted_words_and_reads_duration() {
        let command =
            parse_poll_command(r#"create "Where to eat?" "Thai place" Pizza --duration=600"#).expect("parse");

        assert_eq!(
            command,
            PollCommand::Create {
                question: "Where to eat?".to_owned(),
                options: vec!["Thai place".to_owned(), "Pizza".to_owned()],
                duration_secs: 600,
            }
        );
    }

    #[test]
    fn create_rejects_bad_input() {
        assert_eq!(parse_poll_command(r#"create "Q" "A""#), Err(PollError::TooFewOptions.into()));
        assert_eq!(parse_poll_command("create"), Err(PollError::TooFewOptions.into()));
        assert_eq!(parse_poll_command(r#"create "" A B"#), Err(PollError::EmptyQuestion.into()));
        assert_eq!(parse_poll_command(r#"create Q A A"#), Err(PollError::DuplicateOption.into()));
        assert_eq!(
            parse_poll_command(r#"create Q A B --duration=soon"#),
            Err(CommandParseError::InvalidDuration)
        );
        assert_eq!(
            parse_poll_command(r#"create Q A --duration=60"#),
            Err(PollError::TooFewOptions.into())
        );
        assert_eq!(parse_poll_command(r#"create "Q A B"#), Err(CommandParseError::Tokenize));
    }

    #[test]
    fn vote_number_is_one_based() {
        assert_eq!(
            parse_poll_command("vote P-1 2"),
            Ok(PollCommand::Vote { poll_id: PollId::from("P-1"), option_idx: 1 })
        );
        assert_eq!(parse_poll_command("vote"), Err(CommandParseError::MissingPollId));
        assert_eq!(parse_poll_command("vote P-1"), Err(CommandParseError::MissingOptionIndex));
        assert_eq!(parse_poll_command("vote P-1 0"), Err(PollError::InvalidOption.into()));
        assert_eq!(parse_poll_command("vote P-1 two"), Err(PollError::InvalidOption.into()));
    }

    #[test]
    fn id_commands_require_an_id() {
        for verb in ["results", "end", "delete", "info"] {
            assert_eq!(parse_poll_command(verb), Err(CommandParseError::MissingPollId));
        }
        assert_eq!(parse_poll_command("info P-7"), Ok(PollCommand::Info { poll_id: PollId::from("P-7") }));
        assert_eq!(parse_poll_command("list"), Ok(PollCommand::List));
        assert_eq!(parse_poll_command("mine"), Ok(PollCommand::Mine));
        assert_eq!(
            parse_poll_command("close P-1"),
            Err(CommandParseError::InvalidSubcommand("close".to_owned()))
        );
    }

    #[test]
    fn parse_errors_have_user_messages() {
        assert_eq!(CommandParseError::InvalidSubcommand("x".to_owned()).user_message(), "invalid subcommand");
        assert_eq!(
            CommandParseError::from(PollError::DuplicateOption).user_message(),
            "duplicate options detected"
        );
    }

    #[test]
    fn payload_reports_missing_required_fields() {
        let payload = SlashCommandPayload {
            token: "t".to_owned(),
            channel_id: "c1".to_owned(),
            command: "/poll".to_owned(),
            ..SlashCommandPayload::default()
        };

        assert_eq!(payload.missing_fields(), vec!["team_id", "user_id"]);
    }

    #[tokio::test]
    async fn full_poll_conversation() {
        let router = router();

        let created = router.route(r#"create "Pick one" X Y"#, &context("u1")).await;
        assert_eq!(created.response_type, ResponseType::InChannel);
        let poll_id = poll_id_from(&created.text);

        let voted = router.route(&format!("vote {poll_id} 1"), &context("u2")).await;
        assert_eq!(voted.text, "Your vote for option 1: \"X\" has been recorded.");

        let again = router.route(&format!("vote {poll_id} 2"), &context("u2")).await;
        assert_eq!(again.text, "Error: you have already voted in this poll");
        assert_eq!(again.response_type, ResponseType::Ephemeral);

        let others_view = router.route(&format!("results {poll_id}"), &context("u2")).await;
        assert_eq!(others_view.response_type, ResponseType::Ephemeral);
        assert!(others_view.text.contains("**Total votes:** 1"));
        let creators_view = router.route(&format!("results {poll_id}"), &context("u1")).await;
        assert_eq!(creators_view.response_type, ResponseType::InChannel);

        let info = router.route(&format!("info {poll_id}"), &context("u2")).await;
        assert!(info.text.contains("**Your vote:** 1. X"));

        let denied = router.route(&format!("end {poll_id}"), &context("u2")).await;
        assert_eq!(denied.text, "Error: only the poll creator can perform this action");

        let ended = router.route(&format!("end {poll_id}"), &context("u1")).await;
        assert_eq!(ended.response_type, ResponseType::InChannel);
        assert!(ended.text.contains("**Winner:** X with 1 votes"));

        let listed = router.route("list", &context("u3")).await;
        assert!(listed.text.contains(&poll_id));

        let deleted = router.route(&format!("delete {poll_id}"), &context("u1")).await;
        assert_eq!(deleted.text, format!("Poll with ID `{poll_id}` has been deleted."));

        let mine = router.route("mine", &context("u1")).await;
        assert_eq!(mine.text, "Your polls: no polls found.");
    }

    #[tokio::test]
    async fn domain_errors_render_as_error_text() {
        let router = router();

        let missing = router.route("results nope", &context("u1")).await;
        assert_eq!(missing.text, "Error: poll not found");

        let too_many = router
            .route("create Q a b c d e f g h i j k", &context("u1"))
            .await;
        assert_eq!(too_many.text, "Error: too many options: maximum 10 options allowed");

        let unknown = router.route("close P-1", &context("u1")).await;
        assert_eq!(unknown.text, "Error: invalid subcommand");
    }

    #[tokio::test]
    async fn vote_confirmation_needs_no_read_after_the_vote() {
        let store = Arc::new(InMemoryPollStore::default());
        let service = ReadsFailAfterVote {
            inner: PollService::new(store, PollConfig::default()),
            voted: AtomicBool::new(false),
        };
        let router = CommandRouter::new(Arc::new(service));

        let created = router.route(r#"create "Pick one" X Y"#, &context("u1")).await;
        let poll_id = poll_id_from(&created.text);

        let voted = router.route(&format!("vote {poll_id} 2"), &context("u2")).await;
        assert_eq!(voted.text, "Your vote for option 2: \"Y\" has been recorded.");
    }
}
