//! Writes the aggregated result of each run to a JSON file

use anyhow::Context;
use futures::FutureExt;
use std::path::PathBuf;
use std::sync::Mutex;

use super::{HookFuture, Reporter};
use crate::coordinator::RunContext;
use crate::results::AggregatedResult;

pub struct JsonReporter {
    output_path: PathBuf,
    last_error: Mutex<Option<String>>,
}

impl JsonReporter {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
            last_error: Mutex::new(None),
        }
    }
}

impl Reporter for JsonReporter {
    fn on_run_complete<'a>(
        &'a self,
        _contexts: &'a [RunContext],
        results: &'a AggregatedResult,
    ) -> Option<HookFuture<'a>> {
        Some(
            async move {
                let written = async {
                    let json = serde_json::to_vec_pretty(results)
                        .context("Failed to serialize run results")?;
                    tokio::fs::write(&self.output_path, json)
                        .await
                        .with_context(|| {
                            format!("Failed to write {}", self.output_path.display())
                        })
                }
                .await;

                let mut last_error = self.last_error.lock().unwrap_or_else(|e| e.into_inner());
                match written {
                    Ok(()) => {
                        *last_error = None;
                        Ok(())
                    }
                    Err(e) => {
                        *last_error = Some(format!("{:#}", e));
                        Err(e)
                    }
                }
            }
            .boxed(),
        )
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
