pub mod crawler;
pub mod error;
pub mod extract;
pub mod links;
pub mod page;
pub mod probe;

pub use crawler::{CrawlSummary, Crawler, ProgressCallback};
pub use error::ScanError;
pub use extract::{ExtractError, HeadingLevel, Headings, PageSignalExtractor, PageSignals};
pub use links::{LinkClassifier, LinkKind, base_domain};
pub use page::RawPage;
pub use probe::StatusProbe;
