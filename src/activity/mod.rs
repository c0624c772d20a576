//! Activity summaries
//!
//! Turns a finished tracking session into a calorie estimate and pushes it
//! to the reporting backend.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

use crate::config::ActivitySettings;

/// Oxygen cost of one MET in ml/kg/min
const ML_O2_PER_MET: f64 = 3.5;

/// Payload posted to the summary endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivitySummary {
    pub user_id: i64,
    pub exercise_type: String,
    pub rep_count: u32,
    pub duration_seconds: u64,
    pub calories_burned: f64,
    pub verified: bool,
}

/// What happened to a session summary
#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    /// Zero reps, nothing sent
    Skipped,
    /// No sink configured
    Disabled,
    Sent(ActivitySummary),
    Failed(String),
}

/// `(MET * 3.5 * kg / 200) * minutes` over whole seconds, rounded to 2 decimals
pub fn calories_burned(met: f64, body_weight_kg: f64, duration: Duration) -> f64 {
    let per_minute = met * ML_O2_PER_MET * body_weight_kg / 200.0;
    let kcal = per_minute * (duration.as_secs() as f64 / 60.0);
    (kcal * 100.0).round() / 100.0
}

/// Destination for session summaries
pub trait SummarySink {
    fn send(&self, summary: &ActivitySummary) -> Result<()>;
}

/// POSTs summaries as JSON
pub struct HttpSummarySink {
    client: reqwest::blocking::Client,
    endpoint: String,
}

impl HttpSummarySink {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

impl SummarySink for HttpSummarySink {
    fn send(&self, summary: &ActivitySummary) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(summary)
            .send()
            .with_context(|| format!("Failed to reach {}", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            anyhow::bail!("Summary endpoint returned {}: {}", status, body.trim());
        }
        Ok(())
    }
}

/// Builds and delivers summaries at the end of a session
pub struct ActivityReporter {
    sink: Option<Box<dyn SummarySink + Send>>,
    user_id: i64,
    exercise_type: String,
    met: f64,
    body_weight_kg: f64,
}

impl ActivityReporter {
    pub fn new(sink: Option<Box<dyn SummarySink + Send>>, settings: &ActivitySettings, exercise_type: &str) -> Self {
        Self {
            sink,
            user_id: settings.user_id,
            exercise_type: exercise_type.to_string(),
            met: settings.met,
            body_weight_kg: settings.body_weight_kg,
        }
    }

    /// Reporter posting to the configured endpoint, if any
    pub fn from_settings(settings: &ActivitySettings, exercise_type: &str) -> Result<Self> {
        let sink: Option<Box<dyn SummarySink + Send>> = match &settings.endpoint {
            Some(endpoint) => Some(Box::new(HttpSummarySink::new(
                endpoint.clone(),
                Duration::from_secs(settings.timeout_secs),
            )?)),
            None => None,
        };
        Ok(Self::new(sink, settings, exercise_type))
    }

    pub fn summarize(&self, reps: u32, duration: Duration) -> ActivitySummary {
        ActivitySummary {
            user_id: self.user_id,
            exercise_type: self.exercise_type.clone(),
            rep_count: reps,
            duration_seconds: duration.as_secs(),
            calories_burned: calories_burned(self.met, self.body_weight_kg, duration),
            verified: true,
        }
    }

    /// Send the session summary. Never fails; problems are logged.
    pub fn report(&self, reps: u32, duration: Duration) -> ReportOutcome {
        if reps == 0 {
            info!("No reps recorded, skipping summary");
            return ReportOutcome::Skipped;
        }

        let summary = self.summarize(reps, duration);
        info!(
            "Session: {} reps in {}s, {:.2} kcal",
            summary.rep_count, summary.duration_seconds, summary.calories_burned
        );

        let Some(sink) = &self.sink else {
            return ReportOutcome::Disabled;
        };

        match sink.send(&summary) {
            Ok(()) => {
                info!("Activity summary saved");
                ReportOutcome::Sent(summary)
            }
            Err(e) => {
                error!("Failed to save activity summary: {:#}", e);
                ReportOutcome::Failed(format!("{:#}", e))
            }
        }
    }
}
