//! Entry point for the periodic trigger

pub mod fanout;

pub use fanout::{FanOut, FanOutOutcome, JobFactory, NodeInfo, NodeLister};
