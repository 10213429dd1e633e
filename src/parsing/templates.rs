use anyhow::{Context, Result};
use regex_lite::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// One record pulled out of device text: field name to captured value
pub type FlatRecord = BTreeMap<String, String>;

/// Turns device output into flat records using a named template
pub trait TemplateMatcher: Send + Sync {
    fn has_template(&self, template_id: &str) -> bool;

    /// Records matched by `template_id`. Unknown templates match nothing.
    fn match_text(&self, text: &str, template_id: &str) -> Vec<FlatRecord>;
}

/// What a matching line does to the records being built
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    /// Close the current record and open a new one from the context and captures
    #[default]
    Record,
    /// Set captures on the current record
    Update,
    /// Add captures to the current record, space separated after any existing value
    Append,
    /// Set fields carried into every record opened afterwards
    Context,
}

#[derive(Debug, Deserialize)]
struct RuleSpec {
    #[serde(rename = "match")]
    pattern: String,
    #[serde(default)]
    action: RuleAction,
}

#[derive(Debug)]
struct Rule {
    regex: Regex,
    names: Vec<String>,
    action: RuleAction,
}

impl Rule {
    fn captures(&self, line: &str) -> Option<Vec<(String, String)>> {
        let caps = self.regex.captures(line)?;
        Some(
            self.names
                .iter()
                .filter_map(|name| {
                    caps.name(name)
                        .map(|m| (name.clone(), m.as_str().trim().to_string()))
                })
                .filter(|(_, value)| !value.is_empty())
                .collect(),
        )
    }
}

/// Line rules for one (device type, command) pair. The first rule matching a line wins.
#[derive(Debug)]
pub struct Template {
    rules: Vec<Rule>,
}

impl Template {
    pub fn from_yaml(content: &str) -> Result<Self> {
        let specs: Vec<RuleSpec> = serde_yaml::from_str(content)?;

        let rules = specs
            .into_iter()
            .map(|spec| {
                let regex = Regex::new(&spec.pattern)
                    .map_err(|e| anyhow::anyhow!("Invalid pattern '{}': {}", spec.pattern, e))?;
                let names = regex.capture_names().flatten().map(str::to_string).collect();
                Ok(Rule {
                    regex,
                    names,
                    action: spec.action,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { rules })
    }

    pub fn parse(&self, text: &str) -> Vec<FlatRecord> {
        let mut records = Vec::new();
        let mut context = FlatRecord::new();
        let mut current: Option<FlatRecord> = None;

        for line in text.lines() {
            let line = line.trim_end();
            let Some((rule, captures)) = self
                .rules
                .iter()
                .find_map(|rule| rule.captures(line).map(|caps| (rule, caps)))
            else {
                continue;
            };

            match rule.action {
                RuleAction::Context => {
                    context.extend(captures);
                }
                RuleAction::Record => {
                    if let Some(done) = current.take() {
                        records.push(done);
                    }
                    let mut record = context.clone();
                    record.extend(captures);
                    current = Some(record);
                }
                RuleAction::Update => {
                    current.get_or_insert_with(|| context.clone()).extend(captures);
                }
                RuleAction::Append => {
                    let record = current.get_or_insert_with(|| context.clone());
                    for (name, value) in captures {
                        record
                            .entry(name)
                            .and_modify(|existing| {
                                existing.push(' ');
                                existing.push_str(&value);
                            })
                            .or_insert(value);
                    }
                }
            }
        }

        if let Some(done) = current {
            records.push(done);
        }
        records
    }
}

/// Templates loaded from `{device_type}_{command}.yml` files
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: HashMap<String, Template>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `.yml`/`.yaml` file in `dir`, keyed by file stem.
    /// A missing directory yields an empty registry (all results raw-only).
    pub fn load(dir: &str) -> Result<Self> {
        let mut registry = Self::new();
        let path = Path::new(dir);
        if !path.is_dir() {
            tracing::warn!("Templates directory {} not found, output will be raw only", dir);
            return Ok(registry);
        }

        for entry in std::fs::read_dir(path).with_context(|| format!("Failed to read {}", dir))? {
            let file = entry?.path();
            let is_yaml = file
                .extension()
                .is_some_and(|ext| ext == "yml" || ext == "yaml");
            let Some(id) = file.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !is_yaml {
                continue;
            }

            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read template {}", file.display()))?;
            let template = Template::from_yaml(&content)
                .with_context(|| format!("Invalid template {}", file.display()))?;
            registry.insert(id, template);
        }

        tracing::info!("Loaded {} output templates from {}", registry.len(), dir);
        Ok(registry)
    }

    pub fn insert(&mut self, id: &str, template: Template) {
        self.templates.insert(id.to_string(), template);
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl TemplateMatcher for TemplateRegistry {
    fn has_template(&self, template_id: &str) -> bool {
        self.templates.contains_key(template_id)
    }

    fn match_text(&self, text: &str, template_id: &str) -> Vec<FlatRecord> {
        self.templates
            .get(template_id)
            .map(|template| template.parse(text))
            .unwrap_or_default()
    }
}
