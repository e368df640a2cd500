pub mod archive_service;
pub mod filing_service;
pub mod grouping_service;
pub mod merger;
pub mod model_output;
pub mod ocr_service;
pub mod ordering_service;

pub use archive_service::{cleanup, ArchiveOutcome, Archiver};
pub use filing_service::{sanitize_component, Filer};
pub use grouping_service::{
    parse_grouping_response, validate_partition, GroupingOutcome, GroupingService,
    GROUPING_SYSTEM_PROMPT,
};
pub use merger::{collect_intake, Merger, WORKING_PDF_NAME};
pub use ocr_service::OcrService;
pub use ordering_service::{validate_permutation, OrderingService, ORDERING_SYSTEM_PROMPT};
