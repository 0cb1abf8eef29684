//! Recipe loading with schema + invariant validation.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use jsonschema::Draft;
use serde_json::Value;
use tracing::debug;

use crate::core::plan::DEFAULT_MAX_ITERATIONS;
use crate::core::recipe::{Recipe, validate_recipe};
use crate::error::DefinitionError;

const RECIPE_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/recipe/v1.schema.json"
));

const EXTENSIONS: [&str; 2] = ["yaml", "yml"];

/// Recipes stored as `<dir>/<id>.yaml` (or `.yml`).
#[derive(Debug, Clone)]
pub struct RecipeStore {
    dir: PathBuf,
}

/// One line of `list` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeSummary {
    pub id: String,
    pub description: String,
    pub steps: usize,
    /// `(loop steps, iteration bound)` when the recipe has a loop.
    pub looping: Option<(Vec<String>, u32)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipeListing {
    Valid(RecipeSummary),
    Invalid { id: String, error: String },
}

impl RecipeStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the recipe file for `id`, if one exists.
    pub fn find(&self, id: &str) -> Option<PathBuf> {
        EXTENSIONS
            .iter()
            .map(|ext| self.dir.join(format!("{id}.{ext}")))
            .find(|path| path.is_file())
    }

    /// Load and validate recipe `id`. Definition problems surface as [`DefinitionError`].
    pub fn load(&self, id: &str) -> Result<Recipe> {
        let path = self.find(id).ok_or_else(|| {
            DefinitionError::single(
                id,
                format!("no recipe file {id}.yaml in {}", self.dir.display()),
            )
        })?;
        let source =
            fs::read_to_string(&path).with_context(|| format!("read recipe {}", path.display()))?;
        let recipe = parse_recipe(&source, id)?;
        if recipe.id != id {
            return Err(DefinitionError::single(
                id,
                format!(
                    "id '{}' does not match file name {}",
                    recipe.id,
                    path.display()
                ),
            )
            .into());
        }
        debug!(recipe = %recipe.id, steps = recipe.steps.len(), "recipe loaded");
        Ok(recipe)
    }

    /// Every recipe file in the directory, sorted by id. Broken files are listed, not skipped.
    pub fn list(&self) -> Result<Vec<RecipeListing>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("read recipes dir {}", self.dir.display()))?
        {
            let path = entry
                .with_context(|| format!("read entry in {}", self.dir.display()))?
                .path();
            let is_recipe = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| EXTENSIONS.contains(&ext));
            if is_recipe && let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        ids.dedup();

        Ok(ids
            .into_iter()
            .map(|id| match self.load(&id) {
                Ok(recipe) => RecipeListing::Valid(summarize(&recipe)),
                Err(err) => RecipeListing::Invalid {
                    id,
                    error: format!("{err:#}"),
                },
            })
            .collect())
    }
}

fn summarize(recipe: &Recipe) -> RecipeSummary {
    RecipeSummary {
        id: recipe.id.clone(),
        description: recipe.description.clone(),
        steps: recipe.steps.len(),
        looping: recipe.loop_spec.as_ref().map(|spec| {
            (
                spec.steps.clone(),
                spec.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS),
            )
        }),
    }
}

/// Parse YAML `source`, check it against the recipe schema and the semantic invariants.
///
/// `origin` names the recipe in diagnostics.
pub fn parse_recipe(source: &str, origin: &str) -> Result<Recipe> {
    let mut value: Value = serde_yaml::from_str(source)
        .map_err(|err| DefinitionError::single(origin, format!("malformed YAML: {err}")))?;

    let problems = schema_problems(&value)?;
    if !problems.is_empty() {
        return Err(DefinitionError::new(origin, problems).into());
    }

    // `version: 1.0` arrives as a YAML float.
    if let Some(Value::Number(number)) = value.get("version") {
        let version = number.to_string();
        value["version"] = Value::String(version);
    }

    let recipe: Recipe = serde_json::from_value(value)
        .map_err(|err| DefinitionError::single(origin, format!("invalid recipe: {err}")))?;
    let problems = validate_recipe(&recipe);
    if !problems.is_empty() {
        return Err(DefinitionError::new(origin, problems).into());
    }
    Ok(recipe)
}

/// Validate against the embedded JSON Schema (Draft 2020-12).
fn schema_problems(instance: &Value) -> Result<Vec<String>> {
    let schema: Value = serde_json::from_str(RECIPE_SCHEMA).context("parse recipe schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile recipe schema")?;
    Ok(compiled
        .iter_errors(instance)
        .map(|err| format!("schema: {err}"))
        .collect())
}
