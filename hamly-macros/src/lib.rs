use proc_macro::TokenStream;

mod assets;

/// Embeds every file matching a glob pattern (relative to the calling crate's
/// `CARGO_MANIFEST_DIR`) and registers them with the global loader before
/// `main` runs. Each template is keyed by its path relative to the manifest
/// directory, e.g. `templates/page.haml`.
///
/// The generated constructor expands through `ctor`, so the calling crate
/// needs `ctor` among its dependencies as well as `hamly`.
///
/// ```ignore
/// hamly::template_assets!("templates/**/*.haml");
/// ```
#[proc_macro]
pub fn template_assets(input: TokenStream) -> TokenStream {
    assets::template_assets_impl(input.into()).into()
}
