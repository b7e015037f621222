pub mod context;
pub mod link_extractor;
pub mod url_classifier;

pub use context::{context_error, link_context, truncate_middle};
pub use link_extractor::{ExtractedLink, LinkTag, ParsedDocument, Reference};
pub use url_classifier::{is_checkable, is_valid_absolute};
