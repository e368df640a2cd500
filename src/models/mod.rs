pub mod filed;
pub mod group;
pub mod page;
pub mod summary;

pub use filed::FiledDocument;
pub use group::{Group, OrderSource, OrderedGroup};
pub use page::{Batch, Page, PageOcr};
pub use summary::{GroupFailure, OrderFallback, RetainedFile, RunState, RunSummary};
