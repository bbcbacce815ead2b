//! Data models for ccmeter

pub mod aggregate;
pub mod config;
pub mod plan;
pub mod record;
pub mod session;
pub mod window;

pub use aggregate::{AggregatedData, CachedLimitInfo, FileMeta, HourlyData, CACHE_SCHEMA_VERSION};
pub use config::{GroupBy, MonitorConfig, OutputFormat, TimelineMode};
pub use plan::Plan;
pub use record::{
    ContentItem, ConversationRecord, MessageContent, MessagePayload, RecordKind, TokenUsage,
};
pub use session::{
    ModelStats, Projection, ProjectStats, Session, SessionHour, SessionMetrics, TimelineEntry,
    UsageTotals, WindowInfo,
};
pub use window::{WindowCandidate, WindowDetectionInfo, WindowRecord, WindowSource, WINDOW_SECS};
