pub mod backend;
pub mod client;
pub mod realtime;
pub mod record;
