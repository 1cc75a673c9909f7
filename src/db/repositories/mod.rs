mod sessions;
mod stats;
mod users;
