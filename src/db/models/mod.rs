pub mod session;
pub mod user;

pub use session::{DailyStats, SessionRecord};
pub use user::{User, UserProfile};
