//! Prompt templates rendered from an example's fields.
//!
//! Templates use `{{field}}` placeholders (Jinja-style `{{ field }}` works
//! too). Rendering is strict: a placeholder naming a field the example does
//! not have is an error rather than an empty string.

use crate::dataset::Example;
use crate::error::{EvalError, Result};
use handlebars::Handlebars;
use std::path::{Path, PathBuf};

/// Default directory holding the coach prompt templates.
pub const DEFAULT_TEMPLATE_DIR: &str = "prompts";

/// A compiled prompt template.
#[derive(Clone)]
pub struct PromptTemplate {
    name: String,
    registry: Handlebars<'static>,
}

impl std::fmt::Debug for PromptTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptTemplate")
            .field("name", &self.name)
            .finish()
    }
}

impl PromptTemplate {
    /// Compile a template from source text.
    pub fn from_source(name: impl Into<String>, source: &str) -> Result<Self> {
        let name = name.into();
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry.register_escape_fn(handlebars::no_escape);
        registry
            .register_template_string(&name, source)
            .map_err(|e| EvalError::Template(format!("Failed to compile '{}': {}", name, e)))?;

        Ok(Self { name, registry })
    }

    /// Load `name` from `dir` (e.g. `prompts/coach_v1.jinja`).
    pub fn load(dir: &Path, name: &str) -> Result<Self> {
        let path: PathBuf = dir.join(name);
        let source = std::fs::read_to_string(&path).map_err(|e| EvalError::io(&path, e))?;
        Self::from_source(name, &source)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Render the template with the example's fields (including `id`).
    pub fn render(&self, example: &Example) -> Result<String> {
        self.registry.render(&self.name, example).map_err(|e| {
            EvalError::Template(format!(
                "Failed to render '{}' for example '{}': {}",
                self.name, example.id, e
            ))
        })
    }
}
