pub mod export;
pub mod fallback;
pub mod filter;
pub mod pipeline;

pub use export::{export_results, ExportFormat};
pub use fallback::{DemoDataProvider, OfflineDataset, OfflineProvider};
pub use filter::{apply_filters, filter_by_search, sort_results, ScreeningFilter};
pub use pipeline::{PipelineState, RunStatus, Screener, ScreeningReport};
