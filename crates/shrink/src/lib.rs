pub mod config;
pub mod error;
pub mod encoding;
pub mod ffprobe;
pub mod progress;
pub mod job;
pub mod replace;
pub mod recovery;
pub mod ledger;
pub mod scan;
pub mod supervisor;
pub mod runner;
pub mod tools;

pub use config::{ProbeFailurePolicy, ReplaceStrategy, ShrinkConfig};
pub use encoding::{Codec, EncodeSettings, QualityTier};
pub use error::TranscodeError;
pub use job::{EncodeJob, JobStatus, Outcome};
pub use progress::{NoProgress, ProgressEvent, ProgressParser, ProgressSink};
pub use runner::{run_library, RunOptions, RunSummary};
pub use supervisor::Supervisor;
pub use tools::Toolchain;
