mod bulk;
mod owner;
mod search;
mod url;

pub use bulk::{BatchMode, BulkOutcome};
pub use owner::{Owner, OwnerKey, OwnerType};
pub use search::{DuplicateGroup, Page, SearchFilter};
pub use url::{Blocked, ClickLimit, NewShortUrl, ShortUrl};
