//! The polling and diagnostic engine: C9 Polling Engine, C10 Poll Series
//! List, C11 Poller Supervisor.

pub mod engine;
pub mod job;
pub mod series;
pub mod stats;
pub mod supervisor;

pub use engine::{DispatchRequest, Engine, TickEvent, INIT_TICKER, MAX_POLL_REPEAT, STATE_OFF};
pub use job::PollJob;
pub use series::{
    FinishOutcome, NextOutcome, OnceOffBlockingSeries, OnceOffSeries, PacketSeries, PollEntry,
    PollOutcome, PollSeries, Protocol, SeriesError, SeriesList, StandardSeries,
};
pub use stats::{EntryKind, StatsKey, StatsWindow};
pub use supervisor::{Command, PollError, PollSingleHandle, PollerSupervisor};
