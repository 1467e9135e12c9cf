pub mod budget;
pub mod builders;
pub mod capabilities;
pub mod evidence;
pub mod prompts;
pub mod runner;
pub mod scoring;
pub mod store;
pub mod summarizer;
pub mod topics;
pub mod validator;

#[cfg(feature = "test-support")]
pub mod testing;

#[cfg(feature = "test-utils")]
pub mod testutil;

pub use capabilities::StoreCapabilities;
pub use runner::{ProfileRunner, RunOptions, RunStats};
pub use store::{CallsignRegistry, LogReader, PgStore, ProfileSink};
pub use summarizer::{LlmSummarizer, OfflineSummarizer, Summarizer};
pub use validator::{validate_callsigns, CallsignLookup, ValidationStats};
