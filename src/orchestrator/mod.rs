use futures::future::join_all;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use crate::cache::{command_key, CacheGate};
use crate::commands::build_cli_cmd;
use crate::config::LgConfig;
use crate::device::{DeviceTarget, SessionExecutor};
use crate::error::LgError;
use crate::models::{AggregatedResult, CommandKind, ExecutionUnit};

/// Orchestrator turns requests into execution units and runs them on devices.
///
/// Destinations for one location run one after another; locations run
/// concurrently. At most one session per location is open at any time.
pub struct Orchestrator {
    cfg: Arc<LgConfig>,
    executor: Arc<dyn SessionExecutor>,
    command_cache: CacheGate,
}

impl Orchestrator {
    pub fn new(cfg: Arc<LgConfig>, executor: Arc<dyn SessionExecutor>, command_cache: CacheGate) -> Self {
        Self {
            cfg,
            executor,
            command_cache,
        }
    }

    /// Run a single command. Transport failures are returned to the caller.
    pub async fn execute_single(
        &self,
        location: &str,
        command: CommandKind,
        destination: &str,
    ) -> Result<String, LgError> {
        self.run_unit(&ExecutionUnit::new(location, command, destination)).await
    }

    /// Run `command` from every location to every destination.
    ///
    /// One bucket per distinct location, ordered by location code. A failing
    /// destination is recorded in its location's errors and never stops the
    /// others; a location where everything failed still gets a bucket.
    pub async fn execute(
        self: &Arc<Self>,
        locations: &[String],
        destinations: &[String],
        command: CommandKind,
    ) -> Result<Vec<AggregatedResult>, LgError> {
        let locations: BTreeSet<&String> = locations.iter().collect();
        let mut seen = HashSet::new();
        let destinations: Vec<String> = destinations
            .iter()
            .filter(|d| seen.insert(d.as_str()))
            .cloned()
            .collect();

        // Reject bad requests before any session is opened
        for location in &locations {
            let loc_cfg = self.cfg.location(location)?;
            self.cfg.command_variants(command, loc_cfg.device_type)?;
        }

        let handles: Vec<_> = locations
            .into_iter()
            .map(|location| {
                let orchestrator = self.clone();
                let location = location.clone();
                let destinations = destinations.clone();
                tokio::spawn(async move { orchestrator.execute_location(&location, &destinations, command).await })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for outcome in join_all(handles).await {
            match outcome {
                Ok(result) => results.push(result),
                Err(e) => {
                    tracing::error!("Error executing multi-{}: {}", command, e);
                    return Err(LgError::Orchestration(format!(
                        "Error executing multi-{} command: {}",
                        command, e
                    )));
                }
            }
        }

        Ok(results)
    }

    async fn execute_location(
        &self,
        location: &str,
        destinations: &[String],
        command: CommandKind,
    ) -> AggregatedResult {
        let mut result = AggregatedResult::new(location);

        for destination in destinations {
            let unit = ExecutionUnit::new(location, command, destination);
            match self.run_unit(&unit).await {
                Ok(output) => result.outputs.push((destination.clone(), output)),
                Err(e) => result.errors.push(format!("{}:{}: {}", location, destination, e)),
            }
        }

        result
    }

    async fn run_unit(&self, unit: &ExecutionUnit) -> Result<String, LgError> {
        let loc_cfg = self.cfg.location(&unit.location)?;
        let cli_cmd = build_cli_cmd(&self.cfg, &unit.location, unit.command, &unit.destination)?;
        let target = DeviceTarget::for_location(&self.cfg, loc_cfg)?;
        let timeout = self.cfg.timeouts.for_command(unit.command);
        let key = command_key(&unit.location, unit.command, &unit.destination);

        let executor = &self.executor;
        let target = &target;
        let cli_cmd = &cli_cmd;

        let output = self
            .command_cache
            .try_guard(&key, move || async move {
                tracing::debug!(
                    "Execute {} command at {} to {}",
                    unit.command,
                    unit.location,
                    unit.destination
                );
                executor
                    .run(target, std::slice::from_ref(cli_cmd), timeout)
                    .await
                    .map_err(|e| {
                        tracing::warn!(
                            "Error getting device output from '{}' ({}) for command '{}': {}",
                            target.hostname,
                            unit.location,
                            unit.command,
                            e
                        );
                        e
                    })
            })
            .await?;

        Ok(output)
    }
}
