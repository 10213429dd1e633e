pub mod templates;

pub use templates::{FlatRecord, Template, TemplateMatcher, TemplateRegistry};

use std::sync::Arc;

use crate::config::LgConfig;
use crate::enrichment::Enricher;
use crate::error::ConfigError;
use crate::models::{
    AggregatedResult, CommandKind, CommandResult, DeviceType, LocationResult, MultiResult, ParsedOutput,
};

#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Records(Vec<FlatRecord>),
    RawOnly,
}

pub fn template_id(device_type: DeviceType, command: CommandKind) -> String {
    format!("{}_{}", device_type, command)
}

/// Match device output against the template for its vendor and command.
/// No template, no match or an empty result all degrade to raw only.
pub fn parse(
    matcher: &dyn TemplateMatcher,
    raw_text: &str,
    command: CommandKind,
    device_type: DeviceType,
) -> ParseOutcome {
    let id = template_id(device_type, command);
    if !matcher.has_template(&id) {
        tracing::debug!("No template {}, returning raw output", id);
        return ParseOutcome::RawOnly;
    }

    let records = matcher.match_text(raw_text, &id);
    if records.is_empty() {
        ParseOutcome::RawOnly
    } else {
        ParseOutcome::Records(records)
    }
}

/// Builds API results from device output: parse, fill in the destination, enrich
pub struct OutputProcessor {
    cfg: Arc<LgConfig>,
    matcher: Arc<dyn TemplateMatcher>,
    enricher: Arc<Enricher>,
}

impl OutputProcessor {
    pub fn new(cfg: Arc<LgConfig>, matcher: Arc<dyn TemplateMatcher>, enricher: Arc<Enricher>) -> Self {
        Self { cfg, matcher, enricher }
    }

    /// Result for one location. `outputs` holds the raw text per destination, in run order.
    ///
    /// With `raw` set nothing is parsed. Otherwise the result is raw only when
    /// any destination's output could not be parsed or nothing came out of enrichment.
    pub async fn command_result(
        &self,
        location: &str,
        command: CommandKind,
        outputs: &[(String, String)],
        raw: bool,
    ) -> Result<CommandResult, ConfigError> {
        let (mut result, pending) = self.prepare(location, command, outputs, raw)?;
        if let Some((device_type, records)) = pending {
            let parsed = self.enricher.enrich(command, device_type, records).await;
            set_parsed(&mut result, parsed);
        }
        Ok(result)
    }

    /// Result for a multi-location request. Errors from every location are
    /// flattened into one list; a location without any output has no results.
    ///
    /// Every location is parsed first and enriched as one batch, so a lookup
    /// key seen at several locations is resolved once.
    pub async fn multi_result(
        &self,
        results: Vec<AggregatedResult>,
        command: CommandKind,
        raw: bool,
    ) -> Result<MultiResult, ConfigError> {
        let mut multi = MultiResult {
            errors: Vec::new(),
            locations: Vec::with_capacity(results.len()),
            raw_only: raw,
        };

        let mut staged: Vec<(String, Option<(CommandResult, bool)>)> = Vec::with_capacity(results.len());
        let mut batch = Vec::new();
        for bucket in results {
            let loc_cfg = self.cfg.location(&bucket.location)?;
            multi.errors.extend(bucket.errors.iter().cloned());

            let result = if bucket.has_output() {
                let (result, pending) = self.prepare(&bucket.location, command, &bucket.outputs, raw)?;
                let needs_enrichment = pending.is_some();
                batch.extend(pending);
                Some((result, needs_enrichment))
            } else {
                None
            };
            staged.push((loc_cfg.name.clone(), result));
        }

        let mut parsed = self.enricher.enrich_batch(command, batch).await.into_iter();
        for (name, result) in staged {
            let results = result.map(|(mut result, needs_enrichment)| {
                if needs_enrichment {
                    if let Some(output) = parsed.next() {
                        set_parsed(&mut result, output);
                    }
                }
                result
            });
            multi.locations.push(LocationResult { name, results });
        }

        Ok(multi)
    }

    /// Parse one location's outputs. Returns the result shell and, when every
    /// output parsed, the records still to be enriched.
    fn prepare(
        &self,
        location: &str,
        command: CommandKind,
        outputs: &[(String, String)],
        raw: bool,
    ) -> Result<(CommandResult, Option<(DeviceType, Vec<FlatRecord>)>), ConfigError> {
        let loc_cfg = self.cfg.location(location)?;

        let mut result = CommandResult {
            parsed_output: ParsedOutput::empty(command),
            raw_output: outputs
                .iter()
                .map(|(_, text)| text.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
            command: command.to_string(),
            location: location.to_string(),
            location_name: loc_cfg.name.clone(),
            raw_only: raw,
        };

        if raw {
            return Ok((result, None));
        }

        let key = match command {
            CommandKind::Bgp => "prefix",
            _ => "destination",
        };

        let mut records = Vec::new();
        for (destination, text) in outputs {
            match parse(self.matcher.as_ref(), text, command, loc_cfg.device_type) {
                ParseOutcome::Records(parsed) => {
                    records.extend(parsed.into_iter().map(|mut record| {
                        record
                            .entry(key.to_string())
                            .or_insert_with(|| destination.clone());
                        record
                    }));
                }
                ParseOutcome::RawOnly => {
                    result.raw_only = true;
                    return Ok((result, None));
                }
            }
        }

        Ok((result, Some((loc_cfg.device_type, records))))
    }
}

fn set_parsed(result: &mut CommandResult, parsed: ParsedOutput) {
    result.raw_only = parsed.is_empty();
    result.parsed_output = parsed;
}
