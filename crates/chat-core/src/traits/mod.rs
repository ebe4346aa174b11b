mod repositories;

pub use repositories::{MessageStore, RepoResult, RoomStore, UserDirectory};
