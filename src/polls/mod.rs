//! Polling Module
//!
//! Single-active-question polls: the draft -> active -> ended state machine,
//! one vote per respondent session, and the tally projections every client
//! view is rendered from.

pub mod clock;
pub mod error;
pub mod lifecycle;
pub mod model;
pub mod results;
pub mod store;
pub mod votes;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ErrorKind, PollError, PollResult};
pub use lifecycle::{ActivePoll, PollLifecycle, MAX_HISTORY_PAGE_SIZE};
pub use model::{
    NewOption, NewPoll, Poll, PollOption, PollStatus, ValidPoll, Vote,
    DEFAULT_MAX_QUESTION_LENGTH, MIN_OPTIONS,
};
pub use results::{percentage, vote_counts, OptionResult, OptionTally, PollHistoryEntry, PollResults};
pub use store::{create_store, MemoryPollStore, PollStore, StoreError, StoreResult};
pub use votes::{SubmitVote, VoteAggregator, VoteReceipt};
