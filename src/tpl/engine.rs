use std::collections::HashMap;
use std::time::Instant;

use serde::Serialize;
use tracing::debug;

use crate::error::HamlError;
use crate::options::OptimizerOptions;
use crate::tpl::ir::{self, Instr};
use crate::tpl::render_context::Context;
use crate::tpl::{compiler, names, optimizer, parser, render};
use crate::value::{Value, to_value};

/// The immutable result of compiling one template.
#[derive(Debug, Clone)]
pub struct CompiledTemplate {
    name: String,
    required: Vec<String>,
    body: Vec<Instr>,
    source: String,
    size_hint: usize,
}

impl CompiledTemplate {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names a render context must provide.
    pub fn required(&self) -> &[String] {
        &self.required
    }

    pub fn body(&self) -> &[Instr] {
        &self.body
    }

    /// Readable reconstruction of the final IR.
    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Runs the whole pipeline: parse, lower, optimize, analyze.
pub fn compile(
    name: &str,
    source: &str,
    options: &OptimizerOptions,
) -> Result<CompiledTemplate, HamlError> {
    let start = Instant::now();
    let nodes = parser::parse(source)?;
    let body = compiler::compile(&nodes)?;
    let body = optimizer::optimize(body, options);
    let required = names::free_variables(&body);
    let debug_source = ir::to_source(&required, &body);
    debug!(
        template = name,
        required = ?required,
        elapsed = ?start.elapsed(),
        "compiled template"
    );
    Ok(CompiledTemplate {
        name: name.to_string(),
        required,
        body,
        source: debug_source,
        size_hint: source.len(),
    })
}

/// Renders one compiled template. Cheap to share; each call writes into its
/// own buffer.
#[derive(Debug)]
pub struct Renderer {
    template: CompiledTemplate,
}

impl Renderer {
    pub fn new(template: CompiledTemplate) -> Self {
        Self { template }
    }

    pub fn template(&self) -> &CompiledTemplate {
        &self.template
    }

    pub fn required(&self) -> &[String] {
        self.template.required()
    }

    pub fn template_source(&self) -> &str {
        self.template.source()
    }

    /// Renders with any serializable context; it must serialize to a map
    /// (or unit, for templates without inputs).
    pub fn render<T: Serialize + ?Sized>(&self, context: &T) -> Result<String, HamlError> {
        let value = to_value(context).map_err(|e| HamlError::Context(e.to_string()))?;
        match value {
            Value::Map(map) => self.render_with(|name| map.get(name)),
            Value::Null => self.render_with(|_| None),
            other => Err(HamlError::Context(format!(
                "expected a mapping, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn render_map(&self, context: &HashMap<String, Value>) -> Result<String, HamlError> {
        self.render_with(|name| context.get(name))
    }

    fn render_with<'a>(
        &self,
        get: impl Fn(&str) -> Option<&'a Value>,
    ) -> Result<String, HamlError> {
        let mut globals = HashMap::with_capacity(self.template.required.len());
        for name in &self.template.required {
            let value = get(name).ok_or_else(|| HamlError::MissingVariable(name.clone()))?;
            globals.insert(name.clone(), value.clone());
        }
        render::render(
            &self.template.body,
            Context::new(globals),
            self.template.size_hint,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Page {
        title: String,
        items: Vec<i64>,
    }

    fn build(src: &str) -> Renderer {
        Renderer::new(compile("test", src, &OptimizerOptions::new()).unwrap())
    }

    #[test]
    fn test_render_struct_context() {
        let r = build("%h1= title\n- for i in items\n  %li= i * 2");
        assert_eq!(r.required(), &["title".to_string(), "items".to_string()]);
        let page = Page {
            title: "A&B".to_string(),
            items: vec![1, 2],
        };
        assert_eq!(
            r.render(&page).unwrap(),
            "<h1>\nA&amp;B\n</h1>\n<li>\n2\n</li>\n<li>\n4\n</li>\n"
        );
    }

    #[test]
    fn test_missing_and_extra_variables() {
        let r = build("= a");
        let mut ctx = HashMap::new();
        ctx.insert("b".to_string(), Value::Int(1));
        assert!(matches!(r.render_map(&ctx), Err(HamlError::MissingVariable(n)) if n == "a"));
        ctx.insert("a".to_string(), Value::Int(2));
        assert_eq!(r.render_map(&ctx).unwrap(), "2\n");
    }

    #[test]
    fn test_unit_and_non_map_context() {
        let r = build("%br");
        assert_eq!(r.render(&()).unwrap(), "<br></br>\n");
        assert!(matches!(r.render(&3), Err(HamlError::Context(_))));
    }

    #[test]
    fn test_template_source() {
        let r = build("%p= name");
        let src = r.template_source();
        assert!(src.starts_with("def render(name):\n"));
        assert!(src.contains("__escape(name)"));
    }
}
