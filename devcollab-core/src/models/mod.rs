pub mod contents;
pub mod identity;
pub mod message;
pub mod repo;
pub mod session;

pub use contents::{ContentEntry, ContentKind, Contents, FileContent, FileUpdate, WriteResult};
pub use identity::{GithubUser, Identity};
pub use message::Message;
pub use repo::Repository;
pub use session::Session;
