//! Compiles an indentation-based markup language into reusable renderers.
//!
//! ```
//! use hamly::loader::Loader;
//! use hamly::options::LoaderOptions;
//!
//! let loader = Loader::new(LoaderOptions::default());
//! loader.register("hello", "%p.greeting= name");
//! let renderer = loader.get_renderer("hello").unwrap();
//! let mut ctx = std::collections::HashMap::new();
//! ctx.insert("name".to_string(), "<World>".into());
//! assert_eq!(
//!     renderer.render_map(&ctx).unwrap(),
//!     "<p class='greeting'>\n&lt;World&gt;\n</p>\n"
//! );
//! ```

pub mod error;
pub mod escape;
pub mod expr;
pub mod html;
pub mod loader;
pub mod options;
pub mod tpl;
pub mod value;

#[doc(hidden)]
pub use ctor;
pub use error::HamlError;
pub use hamly_macros::template_assets;
pub use loader::{LOADER, Loader, get_renderer, load_from_path, register_assets};
pub use options::{LoaderOptions, OptimizerOptions};
pub use tpl::{CompiledTemplate, Renderer, compile};
pub use value::Value;
