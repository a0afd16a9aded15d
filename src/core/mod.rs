//! 核心层：运行状态、引用格式、错误分类与恢复、状态机编排

pub mod builder;
pub mod citation;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod state;

pub use citation::{contains_marker, dedup_citations, retain_markers, strip_markers, Citation};
pub use error::{PipelineError, RecoveryAction};
pub use builder::{create_orchestrator, OrchestratorBuilder};
pub use orchestrator::{create_llm_from_config, next_state, Orchestrator, PipelineState};
pub use recovery::{RecoveryEngine, MAX_REPAIR_ATTEMPTS};
pub use state::{
    all_gaps, prose_word_count, word_count, ActionItem, ClaimSection, Confidence, DeliverableSections, EvidenceItem,
    IssueReason, Mode, ResearchNote, ResearchNotes, Resolution, RunState, RunStatus, SubQuestion,
    VerificationIssue, VerificationReport, PLAN_MAX_QUESTIONS, PLAN_MIN_QUESTIONS,
    SUMMARY_MAX_WORDS, SUMMARY_MIN_WORDS,
};
