//! Variable substitution for engine argument templates.

use std::collections::HashMap;
use std::path::Path;

use super::StageRequest;

/// Variable substitution context for engine arguments.
///
/// Supports variable substitution in strings using the `{varname}` syntax.
///
/// # Example
///
/// ```
/// use meshledger::engine::TemplateContext;
///
/// let ctx = TemplateContext::new()
///     .with_var("item", "REEF_3D_BWR_T1")
///     .with_var("stage", "1");
///
/// assert_eq!(ctx.substitute("--item={item}"), "--item=REEF_3D_BWR_T1");
/// assert_eq!(ctx.substitute("step{stage}.log"), "step1.log");
/// ```
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    vars: HashMap<String, String>,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Variables describing one stage request.
    ///
    /// - `{stage}` - stage number
    /// - `{stage_name}` - stage name, e.g. `reconstruction`
    /// - `{item}` - work item identifier
    /// - `{container}` - container path, empty when the stage has none
    /// - `{input}` - input path
    /// - `{output}` - stage output directory
    /// - `{project}` - project directory
    pub fn for_request(request: &StageRequest) -> Self {
        let container = request
            .container
            .as_deref()
            .map(|c| c.display().to_string())
            .unwrap_or_default();
        Self::new()
            .with_var("stage", &request.stage.number().to_string())
            .with_var("stage_name", request.stage.name())
            .with_var("item", request.item.as_str())
            .with_var("container", &container)
            .with_path("input", &request.input)
            .with_path("output", &request.output_dir)
            .with_path("project", &request.project_dir)
    }

    /// Add a custom variable.
    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_string(), value.to_string());
        self
    }

    fn with_path(self, key: &str, path: &Path) -> Self {
        let value = path.display().to_string();
        self.with_var(key, &value)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(|s| s.as_str())
    }

    /// Substitute variables in a string.
    ///
    /// Unknown `{names}` are left as written.
    pub fn substitute(&self, template: &str) -> String {
        let mut result = template.to_string();
        for (key, value) in &self.vars {
            result = result.replace(&format!("{{{}}}", key), value);
        }
        result
    }

    pub fn substitute_all(&self, templates: &[String]) -> Vec<String> {
        templates.iter().map(|t| self.substitute(t)).collect()
    }
}
