//! Provider client for the digest analyzer's single model call.
//!
//! `CompletionModel` is the seam the pipeline depends on; `Claude` is the
//! production implementation against the Anthropic Messages API.

pub mod claude;
pub mod traits;
pub mod util;

pub use claude::Claude;
pub use traits::{Completion, CompletionModel, CompletionRequest, TokenUsage};
