//! Turns templated configuration into per-asset [`ResourceConfig`]s.

use anyhow::Context;
use anyhow::Result;
use handlebars::Handlebars;

use crate::asset::Asset;
use crate::resource::ResourceConfig;

/// Renders raw templated configuration against one asset.
///
/// Returning `Ok(None)` means nothing in the document applies to this
/// asset, which callers treat as a per-asset skip rather than an
/// error.
pub trait Render: Send + Sync {
    /// # Errors
    ///
    /// If the template does not render or the rendered document does
    /// not decode.
    fn render(&self, raw: &[u8], asset: &Asset) -> Result<Option<ResourceConfig>>;
}

/// [`Render`] implementation backed by Handlebars templates with the
/// asset serialized as the template context.
///
/// Templates refer to asset fields directly, so `{{serial}}`,
/// `{{vendor}}`, `{{location}}` and friends all work, as does
/// `{{extra.some_key}}` for inventory-specific attributes.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateRenderer;

impl TemplateRenderer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Render for TemplateRenderer {
    fn render(&self, raw: &[u8], asset: &Asset) -> Result<Option<ResourceConfig>> {
        let template =
            std::str::from_utf8(raw).context("configuration template is not valid UTF-8")?;
        if template.trim().is_empty() {
            return Ok(None);
        }

        let registry = Handlebars::new();
        let context =
            serde_json::to_value(asset).context("failed to serialize asset for rendering")?;
        let rendered = registry
            .render_template(template, &context)
            .context("failed to render configuration template")?;

        // A document that renders to nothing but comments parses as
        // null rather than an empty mapping.
        let value: serde_yaml::Value =
            serde_yaml::from_str(&rendered).context("rendered configuration is not valid YAML")?;
        if value.is_null() {
            return Ok(None);
        }

        let config: ResourceConfig = serde_yaml::from_value(value)
            .context("rendered configuration does not match any known section")?;
        if config.is_empty() {
            return Ok(None);
        }
        Ok(Some(config))
    }
}
