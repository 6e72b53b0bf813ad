//! Simulated checks: random pass/fail with a made-up duration.
//!
//! Seeded instances are reproducible step by step, which is what tests and
//! demos rely on. Nothing here touches the network.

use super::{CheckError, CheckStrategy, Verdict};
use crate::category::Category;
use crate::config::ExecutionConfig;
use crate::model::CaseStatus;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reqwest::Url;
use std::ops::Range;
use tokio::sync::Mutex;

const DEFAULT_SUCCESS_RATE: f64 = 0.7;

pub struct SimulatedStrategy {
    success_rate: f64,
    duration_ms: Range<u64>,
    rng: Mutex<StdRng>,
}

impl SimulatedStrategy {
    /// Demo defaults: 70% pass rate, 500..3500 ms.
    pub fn new(seed: Option<u64>) -> Self {
        Self::with_params(DEFAULT_SUCCESS_RATE, 500..3500, seed)
    }

    pub fn from_config(cfg: &ExecutionConfig) -> Self {
        Self::with_params(
            cfg.success_rate,
            cfg.min_duration_ms..cfg.max_duration_ms,
            cfg.seed,
        )
    }

    /// Rates outside [0, 1] are clamped; NaN falls back to 0.7.
    pub fn with_params(success_rate: f64, duration_ms: Range<u64>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let duration_ms = if duration_ms.is_empty() || duration_ms.start == 0 {
            1..2
        } else {
            duration_ms
        };
        Self {
            success_rate: if success_rate.is_nan() {
                DEFAULT_SUCCESS_RATE
            } else {
                success_rate.clamp(0.0, 1.0)
            },
            duration_ms,
            rng: Mutex::new(rng),
        }
    }

    pub fn screenshot_for(category: Category) -> String {
        format!(
            "https://images.unsplash.com/800x600/?testing,{}",
            category.key()
        )
    }
}

#[async_trait::async_trait]
impl CheckStrategy for SimulatedStrategy {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn check(&self, category: Category, target: &Url) -> Result<Verdict, CheckError> {
        let (passed, duration_ms) = {
            let mut rng = self.rng.lock().await;
            let passed = rng.gen_bool(self.success_rate);
            (passed, rng.gen_range(self.duration_ms.clone()))
        };

        let outcome = if passed {
            "PASS: test completed successfully".to_string()
        } else {
            "FAIL: test failed - element not found".to_string()
        };
        let mut logs = Verdict::trail(category, target, outcome);
        logs.push(format!("Execution time: {}ms", duration_ms));

        Ok(Verdict {
            status: if passed { CaseStatus::Pass } else { CaseStatus::Fail },
            duration_ms,
            logs,
            screenshot: Some(Self::screenshot_for(category)),
        })
    }
}
