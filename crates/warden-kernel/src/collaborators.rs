//! External collaborator interfaces
//!
//! The kernel never runs tests, analyzes evidence, or writes fixes itself;
//! those live behind these traits and are dependency-injected into the
//! stage executor. Learning ships with a built-in extractor so the kernel
//! is runnable without an external collaborator for that stage.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use warden_core::result::{
    DetectionResult, Evidence, FixResult, LearningResult, Pattern, PreviousResults,
    TestExecutionResult, VerificationReport,
};
use warden_core::workflow::{TestDefinition, Workflow};

/// Structured failure from a collaborator
///
/// Whatever a collaborator raises is flattened to its message; the error
/// handler classifies retryability from that text.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct CollaboratorError(pub String);

impl From<String> for CollaboratorError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for CollaboratorError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// Context handed to every stage invocation
#[derive(Debug, Clone)]
pub struct StageContext {
    pub workflow: Workflow,
    pub test_definition: TestDefinition,
    pub previous_results: PreviousResults,
}

/// Runs the test for its `test_type`
#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run(
        &self,
        definition: &TestDefinition,
    ) -> Result<TestExecutionResult, CollaboratorError>;
}

/// Scans execution evidence for anomalies
#[async_trait]
pub trait RedFlagDetector: Send + Sync {
    async fn analyze(
        &self,
        evidence: &Evidence,
        definition: &TestDefinition,
    ) -> Result<DetectionResult, CollaboratorError>;
}

/// Verifies the result independently of the runner
#[async_trait]
pub trait IndependentVerifier: Send + Sync {
    async fn verify(
        &self,
        evidence: &Evidence,
        detection: &DetectionResult,
    ) -> Result<VerificationReport, CollaboratorError>;
}

/// Attempts an automated fix after failed verification
#[async_trait]
pub trait FixAgent: Send + Sync {
    async fn attempt(
        &self,
        verification: &VerificationReport,
        evidence: &Evidence,
    ) -> Result<FixResult, CollaboratorError>;
}

/// Extracts reusable patterns from a finished run
#[async_trait]
pub trait LearningExtractor: Send + Sync {
    async fn extract(&self, context: &StageContext) -> Result<LearningResult, CollaboratorError>;
}

/// Built-in learning extractor
///
/// Seed rules: a verified run contributes a `success` pattern carrying the
/// verification confidence; red flags and applied fix strategies each
/// contribute a pattern of their own.
#[derive(Debug, Default)]
pub struct PatternLearningExtractor;

#[async_trait]
impl LearningExtractor for PatternLearningExtractor {
    async fn extract(&self, context: &StageContext) -> Result<LearningResult, CollaboratorError> {
        let previous = &context.previous_results;
        let mut patterns = Vec::new();

        if let Some(verification) = &previous.verification {
            if verification.verified {
                patterns.push(Pattern {
                    pattern_type: "success".into(),
                    confidence: verification.confidence,
                    detail: None,
                });
            } else {
                patterns.push(Pattern {
                    pattern_type: "verification_failure".into(),
                    confidence: 100.0 - verification.confidence,
                    detail: verification.concerns.first().cloned(),
                });
            }
        }

        if let Some(detection) = &previous.detection {
            for flag in &detection.red_flags {
                patterns.push(Pattern {
                    pattern_type: "red_flag".into(),
                    confidence: flag.severity as f64,
                    detail: Some(format!("{}: {}", flag.flag_type, flag.description)),
                });
            }
        }

        if let Some(fix) = &previous.fixing {
            if fix.success {
                patterns.push(Pattern {
                    pattern_type: "fix_strategy".into(),
                    confidence: 75.0,
                    detail: Some(fix.fix_strategy.clone()),
                });
            }
        }

        Ok(LearningResult {
            test_id: context.test_definition.test_id.clone(),
            patterns,
            extracted_at: Utc::now(),
        })
    }
}

/// The collaborator set injected into the stage executor
#[derive(Clone)]
pub struct Collaborators {
    pub runner: Arc<dyn TestRunner>,
    pub detector: Arc<dyn RedFlagDetector>,
    pub verifier: Arc<dyn IndependentVerifier>,
    pub fixer: Arc<dyn FixAgent>,
    pub learner: Arc<dyn LearningExtractor>,
}

impl Collaborators {
    pub fn new(
        runner: Arc<dyn TestRunner>,
        detector: Arc<dyn RedFlagDetector>,
        verifier: Arc<dyn IndependentVerifier>,
        fixer: Arc<dyn FixAgent>,
    ) -> Self {
        Self {
            runner,
            detector,
            verifier,
            fixer,
            learner: Arc::new(PatternLearningExtractor),
        }
    }

    /// Replace the built-in learning extractor
    pub fn with_learner(mut self, learner: Arc<dyn LearningExtractor>) -> Self {
        self.learner = learner;
        self
    }
}
