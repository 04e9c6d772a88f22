//! # Legacy Version Resolution
//!
//! Environments built by other tools have no `.pemversion` in their module
//! directories. Their versions are guessed by an ordered list of probes;
//! the first probe that answers wins:
//!
//! 1. [`GitHeadProbe`]: a `.git` checkout reports its HEAD commit, shortened
//!    to six characters.
//! 2. [`MetadataProbe`]: `metadata.json` reports its `version` field.
//! 3. [`PuppetfileProbe`]: the environment's `Puppetfile` reports the pin
//!    for the module name.
//!
//! Probes only read. Nothing here writes a sidecar.

use std::path::Path;

use pem_core::Result;

use crate::puppetfile;

/// Length of commit ids reported for git checkouts.
pub const SHORT_COMMIT_LEN: usize = 6;

/// What a probe sees.
#[derive(Debug, Clone, Copy)]
pub struct ProbeContext<'a> {
    /// Root of the environment.
    pub env_dir: &'a Path,
    /// Directory of the module inside the environment.
    pub module_dir: &'a Path,
    /// Directory name of the module.
    pub module: &'a str,
}

/// One step of the fallback chain.
pub trait VersionProbe: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// The version, or `Ok(None)` to defer to the next probe.
    fn probe(&self, ctx: &ProbeContext<'_>) -> Result<Option<String>>;
}

/// Reads the HEAD commit of a git checkout.
#[derive(Debug, Default)]
pub struct GitHeadProbe;

impl VersionProbe for GitHeadProbe {
    fn name(&self) -> &'static str {
        "git"
    }

    fn probe(&self, ctx: &ProbeContext<'_>) -> Result<Option<String>> {
        if !ctx.module_dir.join(".git").exists() {
            return Ok(None);
        }
        let Ok(repo) = git2::Repository::open(ctx.module_dir) else {
            return Ok(None);
        };
        let commit = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        Ok(commit.map(|c| {
            let id = c.id().to_string();
            id[..SHORT_COMMIT_LEN.min(id.len())].to_string()
        }))
    }
}

/// Reads `version` from `metadata.json`.
#[derive(Debug, Default)]
pub struct MetadataProbe;

impl VersionProbe for MetadataProbe {
    fn name(&self) -> &'static str {
        "metadata"
    }

    fn probe(&self, ctx: &ProbeContext<'_>) -> Result<Option<String>> {
        let path = ctx.module_dir.join("metadata.json");
        let Ok(raw) = std::fs::read_to_string(&path) else {
            return Ok(None);
        };
        let parsed: serde_json::Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "unparseable metadata.json");
                return Ok(None);
            }
        };
        Ok(parsed
            .get("version")
            .and_then(|v| v.as_str())
            .filter(|v| !v.is_empty())
            .map(str::to_string))
    }
}

/// Reads the module's pin from the environment's `Puppetfile`.
#[derive(Debug, Default)]
pub struct PuppetfileProbe;

impl VersionProbe for PuppetfileProbe {
    fn name(&self) -> &'static str {
        "puppetfile"
    }

    fn probe(&self, ctx: &ProbeContext<'_>) -> Result<Option<String>> {
        let path = ctx.env_dir.join("Puppetfile");
        if !path.is_file() {
            return Ok(None);
        }
        let modules = puppetfile::load(&path)?;
        Ok(modules
            .iter()
            .find(|m| m.name == ctx.module)
            .and_then(|m| m.pinned_version().map(str::to_string)))
    }
}

/// The ordered probe chain.
pub struct LegacyVersionResolver {
    probes: Vec<Box<dyn VersionProbe>>,
}

impl std::fmt::Debug for LegacyVersionResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.probes.iter().map(|p| p.name())).finish()
    }
}

impl Default for LegacyVersionResolver {
    fn default() -> Self {
        Self::new(vec![
            Box::new(GitHeadProbe),
            Box::new(MetadataProbe),
            Box::new(PuppetfileProbe),
        ])
    }
}

impl LegacyVersionResolver {
    /// A resolver running `probes` in order.
    pub fn new(probes: Vec<Box<dyn VersionProbe>>) -> Self {
        Self { probes }
    }

    /// The first answer from the chain. Probe errors are logged and treated
    /// as "try next".
    pub fn resolve(&self, env_dir: &Path, module: &str) -> Option<String> {
        let module_dir = env_dir.join("modules").join(module);
        let ctx = ProbeContext {
            env_dir,
            module_dir: &module_dir,
            module,
        };
        for probe in &self.probes {
            match probe.probe(&ctx) {
                Ok(Some(version)) => {
                    tracing::debug!(module, probe = probe.name(), %version, "legacy version resolved");
                    return Some(version);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(module, probe = probe.name(), error = %e, "legacy probe failed");
                }
            }
        }
        None
    }
}
