pub mod fs_ops;
pub mod pdf;

pub use fs_ops::{link_no_clobber, move_file};
pub use pdf::{extract_pages, load_pdf, merge_documents, page_ids, to_bytes};
