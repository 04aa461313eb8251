use std::path::PathBuf;

/// Optimizer settings.
#[derive(Debug, Clone)]
pub struct OptimizerOptions {
    pub enabled: bool,
    pub max_iterations: usize, // rounds of the unroll/inline/prune stage
    pub max_unroll: usize,     // largest static iterable that gets unrolled
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimizerOptions {
    pub fn new() -> Self {
        OptimizerOptions {
            enabled: true,
            max_iterations: 16,
            max_unroll: 256,
        }
    }

    /// Options that leave the compiled IR untouched.
    pub fn disabled() -> Self {
        Self::new().enabled(false)
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn max_unroll(mut self, max_unroll: usize) -> Self {
        self.max_unroll = max_unroll;
        self
    }
}

/// Loader settings.
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    pub root: PathBuf,     // directory template identifiers are resolved against
    pub extension: String, // file extension picked up by `load_from_path`
    pub optimizer: OptimizerOptions,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self::new(".")
    }
}

impl LoaderOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LoaderOptions {
            root: root.into(),
            extension: "haml".to_string(),
            optimizer: OptimizerOptions::new(),
        }
    }

    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn optimizer(mut self, optimizer: OptimizerOptions) -> Self {
        self.optimizer = optimizer;
        self
    }
}
