pub mod api_types;
pub mod architect;
pub mod extraction;
pub mod intent;
pub mod llm;
pub mod profiler;
pub mod prompts;
pub mod providers;
pub mod retry;

pub use architect::{ArchitectService, FieldAnalysis, MissingField, ProfileAnalysis};
pub use extraction::{extract_json_as, extract_json_object, ExtractionError, JsonObject};
pub use intent::{Intent, IntentContext};
pub use llm::{CompletionParams, LlmClient};
pub use profiler::{BufferStatus, ProfileService};
pub use prompts::Intensity;
