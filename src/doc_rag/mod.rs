pub mod chunker;
pub mod retriever;

pub use chunker::*;
pub use retriever::*;
