pub mod company;
pub mod generation;
pub mod queue;
pub mod source;
