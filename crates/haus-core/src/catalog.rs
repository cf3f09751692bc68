//! Read-only template catalog
//!
//! Templates are authored and stored elsewhere; the core only resolves them
//! by id at job intake.

use crate::{CoreError, Result};
use async_trait::async_trait;
use haus_config::Template;
use std::collections::HashMap;
use std::path::PathBuf;

/// Trait for resolving templates by id
#[async_trait]
pub trait TemplateCatalog: Send + Sync {
    async fn get(&self, template_id: &str) -> Result<Option<Template>>;
}

/// Catalog reading `<id>.json` files from a directory
pub struct JsonCatalog {
    dir: PathBuf,
}

impl JsonCatalog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl TemplateCatalog for JsonCatalog {
    async fn get(&self, template_id: &str) -> Result<Option<Template>> {
        // Template ids come from job payloads; refuse anything that could
        // escape the catalog directory
        if template_id.contains('/') || template_id.contains("..") {
            return Err(CoreError::Validation(format!(
                "invalid template id {:?}",
                template_id
            )));
        }
        let path = self.dir.join(format!("{}.json", template_id));
        if !path.exists() {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&path).await?;
        let template: Template = serde_json::from_str(&content)?;
        template.validate()?;
        Ok(Some(template))
    }
}

/// Fixed in-memory catalog
pub struct StaticCatalog {
    templates: HashMap<String, Template>,
}

impl StaticCatalog {
    pub fn new(templates: impl IntoIterator<Item = Template>) -> Self {
        Self {
            templates: templates
                .into_iter()
                .map(|t| (t.id.clone(), t))
                .collect(),
        }
    }
}

#[async_trait]
impl TemplateCatalog for StaticCatalog {
    async fn get(&self, template_id: &str) -> Result<Option<Template>> {
        Ok(self.templates.get(template_id).cloned())
    }
}
