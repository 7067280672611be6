//! # Patchwise Pipeline
//!
//! Retrieval-augmented code repair in four stages over one source file.
//!
//! ```text
//! SourceFile
//!     │
//!     ├──> TextIndex.embed (context for later retrieval)
//!     │
//!     ├──> FaultLocalizer      token-budgeted chunks → fault report
//!     │
//!     ├──> PatternSynthesizer  #### Fault N → retrieved context → fix fragment
//!     │
//!     ├──> PatchIntegrator     fragment k applied on top of snapshot k-1
//!     │
//!     └──> PatchValidator      final snapshot → GOOD | BAD | UNKNOWN
//! ```
//!
//! Every stage talks to the model through a [`ModelSession`], which wraps a
//! [`TextGenerator`]. [`ScriptedGenerator`] replays canned responses for tests
//! and offline runs.

mod backend;
mod catalog;
mod config;
mod error;
mod extract;
mod integrate;
mod localize;
mod orchestrator;
pub mod prompts;
mod session;
mod source;
mod synthesize;
mod validate;

pub use backend::{HttpGenerator, Provider, ScriptedGenerator, TextGenerator};
pub use catalog::{ModelCatalog, ModelLimits};
pub use config::{BackendConfig, FailurePolicy, PipelineConfig};
pub use error::{PipelineError, Result};
pub use extract::{
    extract_faults, parse_validation, return_code_block, FaultEntry, ValidationResult,
    ValidationStatus, NONE_PROVIDED,
};
pub use integrate::{PatchIntegrator, PatchSnapshot};
pub use localize::{FaultLocalizer, LocalizationResult};
pub use orchestrator::{PipelineOrchestrator, PipelineRun, PipelineState};
pub use session::ModelSession;
pub use source::SourceFile;
pub use synthesize::{ContextRetriever, PatchFragment, PatternSynthesizer, SynthesisResult};
pub use validate::PatchValidator;
