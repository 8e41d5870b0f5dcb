//! Shared fixtures for kernel integration tests: scripted collaborators
//! and a fully wired kernel over the in-memory store.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use warden_core::config::KernelConfig;
use warden_core::instance::InstanceType;
use warden_core::result::{
    DetectionResult, Evidence, FixResult, RedFlag, TestExecutionResult, VerificationReport,
};
use warden_core::workflow::TestDefinition;
use warden_kernel::prelude::*;
use warden_storage::InMemoryKernelStore;

/// One scripted runner response: pass/fail, or a collaborator error
pub type RunnerStep = Result<bool, String>;

/// Test runner that replays a script, repeating the last step when drained
pub struct ScriptedRunner {
    script: Mutex<VecDeque<RunnerStep>>,
    last: Mutex<RunnerStep>,
    delay: Option<Duration>,
}

impl ScriptedRunner {
    pub fn passing() -> Self {
        Self::with_script(vec![Ok(true)])
    }

    pub fn with_script(steps: Vec<RunnerStep>) -> Self {
        let last = steps.last().cloned().unwrap_or(Ok(true));
        Self {
            script: Mutex::new(steps.into()),
            last: Mutex::new(last),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn next_step(&self) -> RunnerStep {
        let mut script = self.script.lock();
        match script.pop_front() {
            Some(step) => {
                *self.last.lock() = step.clone();
                step
            }
            None => self.last.lock().clone(),
        }
    }
}

#[async_trait]
impl TestRunner for ScriptedRunner {
    async fn run(
        &self,
        definition: &TestDefinition,
    ) -> Result<TestExecutionResult, CollaboratorError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.next_step() {
            Ok(passed) => Ok(TestExecutionResult {
                test_id: definition.test_id.clone(),
                passed,
                duration_ms: 850,
                evidence: Evidence {
                    screenshots: vec!["final-state.png".into()],
                    logs: vec!["runner.log".into()],
                    traces: vec![],
                },
            }),
            Err(message) => Err(CollaboratorError(message)),
        }
    }
}

/// Detector returning a fixed flag set
pub struct FixedDetector {
    pub flags: Vec<RedFlag>,
}

impl FixedDetector {
    pub fn clean() -> Self {
        Self { flags: vec![] }
    }
}

#[async_trait]
impl RedFlagDetector for FixedDetector {
    async fn analyze(
        &self,
        _evidence: &Evidence,
        definition: &TestDefinition,
    ) -> Result<DetectionResult, CollaboratorError> {
        Ok(DetectionResult {
            test_id: definition.test_id.clone(),
            red_flags: self.flags.clone(),
            detected_at: Utc::now(),
            total_checks: 12,
            flagged_checks: self.flags.len() as u32,
        })
    }
}

/// Verifier that replays scripted (verified, confidence) pairs
pub struct ScriptedVerifier {
    script: Mutex<VecDeque<(bool, f64)>>,
    last: Mutex<(bool, f64)>,
}

impl ScriptedVerifier {
    pub fn with_script(steps: Vec<(bool, f64)>) -> Self {
        let last = steps.last().copied().unwrap_or((true, 95.0));
        Self {
            script: Mutex::new(steps.into()),
            last: Mutex::new(last),
        }
    }

    pub fn verified(confidence: f64) -> Self {
        Self::with_script(vec![(true, confidence)])
    }
}

#[async_trait]
impl IndependentVerifier for ScriptedVerifier {
    async fn verify(
        &self,
        _evidence: &Evidence,
        _detection: &DetectionResult,
    ) -> Result<VerificationReport, CollaboratorError> {
        let (verified, confidence) = {
            let mut script = self.script.lock();
            match script.pop_front() {
                Some(step) => {
                    *self.last.lock() = step;
                    step
                }
                None => *self.last.lock(),
            }
        };
        Ok(VerificationReport {
            verified,
            confidence,
            concerns: if verified {
                vec![]
            } else {
                vec!["evidence does not support success".into()]
            },
            cross_validation_results: vec![],
            verifier_id: "stub-verifier".into(),
        })
    }
}

/// Fixer with a fixed outcome
pub struct FixedFixer {
    pub success: bool,
}

#[async_trait]
impl FixAgent for FixedFixer {
    async fn attempt(
        &self,
        _verification: &VerificationReport,
        _evidence: &Evidence,
    ) -> Result<FixResult, CollaboratorError> {
        Ok(FixResult {
            success: self.success,
            fix_strategy: "selector_update".into(),
            retries_used: 0,
            cost: Some(0.02),
        })
    }
}

/// A wired kernel plus the supervising instance's id and handoff dir
pub struct TestKernel {
    pub kernel: Kernel<InMemoryKernelStore>,
    pub instance_id: String,
    pub handoff_dir: std::path::PathBuf,
}

/// Build a kernel over the in-memory store with the given collaborators
pub async fn test_kernel(
    runner: ScriptedRunner,
    detector: FixedDetector,
    verifier: ScriptedVerifier,
    fixer: FixedFixer,
) -> TestKernel {
    test_kernel_with_config(runner, detector, verifier, fixer, KernelConfig::default()).await
}

pub async fn test_kernel_with_config(
    runner: ScriptedRunner,
    detector: FixedDetector,
    verifier: ScriptedVerifier,
    fixer: FixedFixer,
    mut config: KernelConfig,
) -> TestKernel {
    let handoff_dir = std::env::temp_dir().join(format!(
        "warden-scenario-{}",
        uuid::Uuid::now_v7().simple()
    ));
    config.handoff_dir = handoff_dir.to_string_lossy().into_owned();

    let collaborators = Collaborators::new(
        Arc::new(runner),
        Arc::new(detector),
        Arc::new(verifier),
        Arc::new(fixer),
    );
    let kernel = Kernel::new(Arc::new(InMemoryKernelStore::new()), collaborators, config);

    let instance = kernel
        .registry
        .register("checkout", InstanceType::Ps, None)
        .await
        .expect("register test instance");

    TestKernel {
        kernel,
        instance_id: instance.instance_id,
        handoff_dir,
    }
}

impl Drop for TestKernel {
    fn drop(&mut self) {
        std::fs::remove_dir_all(&self.handoff_dir).ok();
    }
}
