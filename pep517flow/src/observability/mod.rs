//! Tracing setup and span helpers.
//!
//! Call [`init_tracing`] once at host start-up. Pipelines open one span per
//! run and one per stage so backend output logged by the runner is
//! attributable to its stage.

use tracing::{Level, Span};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

/// Initialises the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `level`. With `json`, log lines are
/// emitted as newline-delimited JSON. Only the first call takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false))
            .try_init()
            .ok();
    }
}

/// Span covering one pipeline run.
#[must_use]
pub fn pipeline_span(pipeline: &str, run_id: Uuid) -> Span {
    tracing::info_span!("pipeline", pipeline = %pipeline, run_id = %run_id)
}

/// Span covering one stage within a run.
#[must_use]
pub fn stage_span(stage: &str, run_id: Uuid) -> Span {
    tracing::info_span!("stage", stage = %stage, run_id = %run_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing(false, Level::DEBUG);
        init_tracing(true, Level::INFO);
    }

    #[test]
    fn test_spans_can_be_entered() {
        init_tracing(false, Level::DEBUG);
        let run_id = Uuid::now_v7();
        let pipeline = pipeline_span("python-517", run_id);
        let _outer = pipeline.enter();
        let _inner = stage_span("build", run_id).entered();
        tracing::info!("inside stage span");
    }
}
