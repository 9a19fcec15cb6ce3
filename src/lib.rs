pub mod assembler;
pub mod cache;
pub mod ingest;
pub mod parser;
pub mod patterns;
pub mod pipeline;
pub mod stats;
