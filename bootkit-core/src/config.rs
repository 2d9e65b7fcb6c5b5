//! Manifest schema (TOML) and platform-driven step resolution.
//!
//! A manifest declares the steps of a host build. Before planning, every step
//! is resolved for the probed platform: the effective codename is chosen
//! (falling back to a known-good codename when the host's is unsupported),
//! per-codename overrides are applied and `${var}` placeholders in params are
//! rendered.

use crate::step::StepSpec;
use anyhow::{anyhow, bail, Context, Result};
use bootkit_hal::PlatformFacts;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use toml::value::Table;
use toml::Value as TomlValue;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlatformConfig {
    /// Codenames the manifest knows how to provision. Empty means "any".
    #[serde(default)]
    pub supported_codenames: Vec<String>,

    /// Codename used when the host's codename is not supported.
    #[serde(default)]
    pub fallback_codename: Option<String>,

    /// Extra template variables per effective codename.
    #[serde(default)]
    pub vars: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub initial_backoff_ms: Option<u64>,
    #[serde(default)]
    pub max_backoff_ms: Option<u64>,
    #[serde(default)]
    pub state_path: Option<PathBuf>,
    #[serde(default)]
    pub report_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CodenameOverride {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub params: Table,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct StepDecl {
    pub name: String,
    pub provider: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Failure aborts the rest of the run.
    #[serde(default = "default_true")]
    pub critical: bool,

    #[serde(default)]
    pub retryable: bool,

    #[serde(default)]
    pub params: Table,

    #[serde(default)]
    pub by_codename: BTreeMap<String, CodenameOverride>,
}

impl StepDecl {
    /// Provider kind and raw params after applying the codename override.
    ///
    /// An override that switches provider kind replaces the params outright;
    /// otherwise its params are merged over the base ones.
    pub fn for_codename(&self, codename: &str) -> (String, Table) {
        let Some(overlay) = self.by_codename.get(codename) else {
            return (self.provider.clone(), self.params.clone());
        };
        match &overlay.provider {
            Some(provider) if provider != &self.provider => {
                (provider.clone(), overlay.params.clone())
            }
            _ => {
                let mut params = self.params.clone();
                for (key, value) in &overlay.params {
                    params.insert(key.clone(), value.clone());
                }
                (self.provider.clone(), params)
            }
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub platform: PlatformConfig,

    #[serde(default)]
    pub settings: Settings,

    #[serde(default)]
    pub steps: Vec<StepDecl>,
}

/// A step resolved for one platform: the declaration plus its provider kind.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedStep {
    pub spec: StepSpec,
    pub provider: String,
}

impl Manifest {
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            bail!("manifest declares no steps");
        }
        let mut names = HashSet::new();
        for step in &self.steps {
            if step.name.trim().is_empty() {
                bail!("step with empty name");
            }
            if !names.insert(step.name.as_str()) {
                bail!("duplicate step name: {}", step.name);
            }
            if step.provider.trim().is_empty() {
                bail!("step {} has no provider", step.name);
            }
        }
        if let Some(fallback) = &self.platform.fallback_codename {
            let supported = &self.platform.supported_codenames;
            if !supported.is_empty() && !supported.contains(fallback) {
                bail!(
                    "fallback_codename {} is not one of supported_codenames",
                    fallback
                );
            }
        }
        Ok(())
    }

    /// The codename providers are rendered for on a host reporting `host_codename`.
    pub fn effective_codename(&self, host_codename: &str) -> Result<String> {
        let supported = &self.platform.supported_codenames;
        if supported.is_empty() || supported.iter().any(|c| c == host_codename) {
            return Ok(host_codename.to_string());
        }
        match &self.platform.fallback_codename {
            Some(fallback) => {
                log::warn!(
                    "Codename {} is not supported; using {} repositories instead",
                    host_codename,
                    fallback
                );
                Ok(fallback.clone())
            }
            None => bail!(
                "unsupported codename {} (supported: {})",
                host_codename,
                supported.join(", ")
            ),
        }
    }

    pub fn template_vars(&self, facts: &PlatformFacts, effective: &str) -> BTreeMap<String, String> {
        let mut vars = BTreeMap::new();
        vars.insert("codename".to_string(), effective.to_string());
        vars.insert("host_codename".to_string(), facts.os_codename.clone());
        vars.insert("arch".to_string(), facts.architecture.clone());
        if let Some(extra) = self.platform.vars.get(effective) {
            for (key, value) in extra {
                vars.insert(key.clone(), value.clone());
            }
        }
        vars
    }

    /// Resolves every step for `facts`, in declaration order.
    pub fn resolve(&self, facts: &PlatformFacts) -> Result<(String, Vec<ResolvedStep>)> {
        let effective = self.effective_codename(&facts.os_codename)?;
        let vars = self.template_vars(facts, &effective);

        let steps = self
            .steps
            .iter()
            .map(|decl| {
                let (provider, params) = decl.for_codename(&effective);
                let params = render_value(&TomlValue::Table(params), &vars)
                    .with_context(|| format!("step {}", decl.name))?;
                let mut spec = StepSpec::new(&decl.name)
                    .depends_on(decl.depends_on.iter().cloned())
                    .params(params)
                    .critical(decl.critical)
                    .retryable(decl.retryable);
                spec.description = decl
                    .description
                    .as_deref()
                    .map(|d| render_template(d, &vars))
                    .transpose()
                    .with_context(|| format!("step {}", decl.name))?;
                Ok(ResolvedStep { spec, provider })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok((effective, steps))
    }
}

pub fn parse_manifest(text: &str) -> Result<Manifest> {
    let manifest: Manifest = toml::from_str(text).context("failed to parse manifest")?;
    manifest.validate()?;
    Ok(manifest)
}

pub fn load_manifest(path: &Path) -> Result<Manifest> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
    parse_manifest(&text).with_context(|| format!("Invalid manifest: {}", path.display()))
}

/// Substitutes `${name}` placeholders; unknown names are errors.
pub fn render_template(input: &str, vars: &BTreeMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| anyhow!("unterminated placeholder in {:?}", input))?;
        let key = &after[..end];
        let value = vars
            .get(key)
            .ok_or_else(|| anyhow!("unknown placeholder ${{{}}} in {:?}", key, input))?;
        out.push_str(value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Converts TOML params to JSON, rendering placeholders in every string.
pub fn render_value(value: &TomlValue, vars: &BTreeMap<String, String>) -> Result<JsonValue> {
    Ok(match value {
        TomlValue::String(s) => JsonValue::String(render_template(s, vars)?),
        TomlValue::Integer(i) => JsonValue::from(*i),
        TomlValue::Float(f) => JsonValue::from(*f),
        TomlValue::Boolean(b) => JsonValue::Bool(*b),
        TomlValue::Datetime(dt) => JsonValue::String(dt.to_string()),
        TomlValue::Array(items) => JsonValue::Array(
            items
                .iter()
                .map(|item| render_value(item, vars))
                .collect::<Result<Vec<_>>>()?,
        ),
        TomlValue::Table(table) => {
            let mut map = serde_json::Map::new();
            for (key, item) in table {
                map.insert(key.clone(), render_value(item, vars)?);
            }
            JsonValue::Object(map)
        }
    })
}
