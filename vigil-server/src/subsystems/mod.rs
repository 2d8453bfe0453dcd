pub mod dispatcher;
pub mod pipeline;
pub mod push;
pub mod recorder;
pub mod reports;
