//! The work queue: persistent items, exclusion filtering, priority scoring,
//! and the dispatcher that drives them.

pub mod company;
pub mod dispatcher;
pub mod handlers;
pub mod scoring;
pub mod stoplist;
pub mod store;
