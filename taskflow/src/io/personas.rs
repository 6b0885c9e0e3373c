//! Persona catalog backed by `.taskflow/personas/*.json`.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::invariants::validate_persona;
use crate::io::schema;
use crate::persona::{Persona, sanitize_persona_name};

/// Immutable snapshot of every loadable persona.
#[derive(Debug, Default)]
pub struct PersonaSet {
    personas: BTreeMap<String, Persona>,
    /// Files that could not be loaded, with the reason.
    pub problems: Vec<String>,
    /// `(persona, tool)` pairs naming capabilities that do not exist.
    pub unknown_tools: Vec<(String, String)>,
}

impl PersonaSet {
    /// Look up by reference; `"writer"` and `"writer.json"` are the same.
    pub fn get(&self, reference: &str) -> Option<&Persona> {
        sanitize_persona_name(reference).and_then(|name| self.personas.get(name))
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.get(reference).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Persona> {
        self.personas.values()
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }
}

type Fingerprint = Vec<(PathBuf, Option<SystemTime>, u64)>;

struct Cached {
    fingerprint: Fingerprint,
    set: Arc<PersonaSet>,
}

/// Loads personas once and reloads only when the directory changes or
/// [`invalidate`](Self::invalidate) is called.
pub struct PersonaCatalog {
    dir: PathBuf,
    known_tools: Option<BTreeSet<String>>,
    cache: Mutex<Option<Cached>>,
}

impl PersonaCatalog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            known_tools: None,
            cache: Mutex::new(None),
        }
    }

    /// Report persona tools outside `tools` as unknown.
    pub fn with_known_tools(mut self, tools: impl IntoIterator<Item = String>) -> Self {
        self.known_tools = Some(tools.into_iter().collect());
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn invalidate(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            *cache = None;
        }
    }

    /// Current snapshot, reloading if any persona file was added, removed or
    /// modified since the last call.
    pub fn load(&self) -> Result<Arc<PersonaSet>> {
        let fingerprint = fingerprint(&self.dir)?;
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| anyhow!("persona cache lock poisoned"))?;
        if let Some(cached) = cache.as_ref()
            && cached.fingerprint == fingerprint
        {
            return Ok(Arc::clone(&cached.set));
        }
        debug!(dir = %self.dir.display(), "loading personas");
        let set = Arc::new(self.read_all(&fingerprint));
        *cache = Some(Cached {
            fingerprint,
            set: Arc::clone(&set),
        });
        Ok(set)
    }

    fn read_all(&self, fingerprint: &Fingerprint) -> PersonaSet {
        let mut set = PersonaSet::default();
        for (path, _, _) in fingerprint {
            match read_persona(path) {
                Ok(persona) => {
                    if let Some(known) = &self.known_tools {
                        for tool in persona.tools.iter().filter(|t| !known.contains(*t)) {
                            warn!(
                                persona = %persona.persona_name,
                                tool = %tool,
                                "persona lists an unknown capability"
                            );
                            set.unknown_tools
                                .push((persona.persona_name.clone(), tool.clone()));
                        }
                    }
                    set.personas.insert(persona.persona_name.clone(), persona);
                }
                Err(err) => {
                    warn!(path = %path.display(), err = %format!("{err:#}"), "skipping persona");
                    set.problems.push(format!("{}: {err:#}", path.display()));
                }
            }
        }
        set
    }
}

fn fingerprint(dir: &Path) -> Result<Fingerprint> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err).with_context(|| format!("read {}", dir.display())),
    };
    let mut fingerprint = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("read {}", dir.display()))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let meta = entry
            .metadata()
            .with_context(|| format!("stat {}", path.display()))?;
        fingerprint.push((path, meta.modified().ok(), meta.len()));
    }
    fingerprint.sort();
    Ok(fingerprint)
}

fn read_persona(path: &Path) -> Result<Persona> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let value: Value =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    let errors = schema::check_persona(&value)?;
    if !errors.is_empty() {
        return Err(anyhow!("schema validation failed: {}", errors.join("; ")));
    }
    let persona: Persona = serde_json::from_value(value).context("deserialize persona")?;
    let mut errors = validate_persona(&persona);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    if persona.persona_name != stem {
        errors.push(format!(
            "persona_name '{}' does not match file name '{stem}'",
            persona.persona_name
        ));
    }
    if !errors.is_empty() {
        return Err(anyhow!("invalid persona: {}", errors.join("; ")));
    }
    Ok(persona)
}
