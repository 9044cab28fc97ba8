pub mod aggregator;
pub mod collector;
pub mod export;
pub mod percentiles;
pub mod record;
pub mod session;
pub mod stream;
pub mod window;

pub use aggregator::Aggregator;
pub use collector::{CollectorView, ExportSnapshot, MetricsCollector};
pub use export::{ExportOutcome, ResultExporter};
pub use percentiles::{LatencyPercentiles, LatencyStats, PercentileSet};
pub use record::{
    ErrorKind, ErrorRecord, EventRecord, RequestOutcome, StreamCompletion, StreamRecord,
};
pub use session::{CategoryBreakdown, EndpointBreakdown, SessionResult};
pub use window::RecentWindow;
