use thiserror::Error;

use crate::expr::EvalError;

/// Errors raised while loading, compiling or rendering a template.
#[derive(Error, Debug)]
pub enum HamlError {
    #[error("bad indent on line {line}")]
    Indentation { line: usize },
    #[error("bad nesting near line {line}")]
    Nesting { line: usize },
    #[error("compiler failed near '{text}' at line {line}")]
    Compile {
        text: String,
        line: usize,
        reason: String,
    },
    #[error("cannot convert statement '{text}' at line {line}")]
    UnsupportedStatement {
        text: String,
        line: usize,
        reason: String,
    },
    #[error("template not found: {0}")]
    TemplateNotFound(String),
    #[error("failed to read template '{id}': {source}")]
    Io {
        id: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid render context: {0}")]
    Context(String),
    #[error("missing required variable '{0}'")]
    MissingVariable(String),
    #[error("render error at line {line}: {source}")]
    Render {
        line: usize,
        #[source]
        source: EvalError,
    },
}

impl HamlError {
    /// Source line the error points at, when it has one.
    pub fn line(&self) -> Option<usize> {
        match self {
            HamlError::Indentation { line }
            | HamlError::Nesting { line }
            | HamlError::Compile { line, .. }
            | HamlError::UnsupportedStatement { line, .. }
            | HamlError::Render { line, .. } => Some(*line),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = HamlError::Compile {
            text: "= 1 +".to_string(),
            line: 4,
            reason: "unexpected end of input".to_string(),
        };
        assert_eq!(err.to_string(), "compiler failed near '= 1 +' at line 4");
        assert_eq!(err.line(), Some(4));
        assert_eq!(HamlError::Nesting { line: 2 }.to_string(), "bad nesting near line 2");
        assert_eq!(HamlError::MissingVariable("x".into()).line(), None);
    }
}
