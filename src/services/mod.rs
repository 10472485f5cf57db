pub mod analyzer_service;
pub mod image_repository;
pub mod literal;
pub mod response_parser;

pub use analyzer_service::{build_analyzer, Analyzer, ResilientAnalyzer, RetryPolicy, VisionLlmAnalyzer};
pub use image_repository::{ImageRepository, StoredImage};
pub use response_parser::{parse_response, ParseOutcome};
