pub mod compact;
pub mod daemon;
pub mod record;
pub mod setup;
pub mod splits;
pub mod status;
pub mod sync;
pub mod ui;
