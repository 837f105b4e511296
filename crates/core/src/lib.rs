pub mod config;
pub mod domain;
pub mod errors;
pub mod ports;
pub mod reconciler;
pub mod service;

pub use config::{AppConfig, ConfigError, LoadOptions, LogFormat, PollConfig};
pub use domain::poll::{Poll, PollId, PollStatus};
pub use domain::vote::{Vote, VoteId};
pub use errors::{ErrorKind, PollError};
pub use ports::{NoopPollNotifier, NotifyError, PollNotifier, PollStore};
pub use reconciler::{ReconcilerSchedule, Reconcilers};
pub use service::{OptionTally, PollService, VoteResults};
