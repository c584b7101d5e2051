pub mod assistant;
pub mod batch;
pub mod clarify;
pub mod classifier;
pub mod column_resolver;
pub mod columnar;
pub mod dataset;
pub mod error;
pub mod expr;
pub mod ingest;
pub mod intent;
pub mod llm;
pub mod ops;
pub mod patterns;
pub mod session;
pub mod trainer;
pub mod versioning;
