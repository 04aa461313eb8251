use std::collections::hash_map::DefaultHasher;
use std::env;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use glob::glob;
use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use syn::LitStr;

pub fn template_assets_impl(input: TokenStream) -> TokenStream {
    let pattern = match syn::parse2::<LitStr>(input) {
        Ok(pattern) => pattern,
        Err(e) => return e.to_compile_error(),
    };
    let pattern_str = pattern.value();

    let root = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => {
            return syn::Error::new(pattern.span(), "CARGO_MANIFEST_DIR is not set")
                .to_compile_error();
        }
    };
    let full_pattern = root.join(&pattern_str);

    let mut files: Vec<PathBuf> = match glob(&full_pattern.to_string_lossy()) {
        Ok(paths) => paths
            .filter_map(|entry| entry.ok())
            .filter(|path| path.is_file())
            .collect(),
        Err(e) => {
            return syn::Error::new(pattern.span(), format!("invalid glob pattern: {}", e))
                .to_compile_error();
        }
    };
    files.sort();

    let assets: Vec<TokenStream> = files
        .iter()
        .map(|path| {
            let id = template_id(&root, path);
            let file = path.to_string_lossy().to_string();
            quote! { (#id, include_str!(#file)) }
        })
        .collect();

    // one registration function per pattern, so the macro can be invoked
    // several times in a crate
    let mut hasher = DefaultHasher::new();
    pattern_str.hash(&mut hasher);
    let fn_name = format_ident!("__hamly_register_templates_{}", hasher.finish());

    quote! {
        #[::hamly::ctor::ctor]
        fn #fn_name() {
            let assets: &[(&'static str, &'static str)] = &[
                #(#assets),*
            ];
            ::hamly::loader::register_assets(assets.iter().copied());
        }
    }
}

fn template_id(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_id_is_relative() {
        let root = Path::new("/work/app");
        assert_eq!(
            template_id(root, Path::new("/work/app/templates/page.haml")),
            "templates/page.haml"
        );
    }

    #[test]
    fn test_rejects_non_string_input() {
        let out = template_assets_impl(quote! { 42 }).to_string();
        assert!(out.contains("compile_error"));
    }
}
