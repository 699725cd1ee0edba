//! Deno runtime adapter

use super::RuntimeAdapter;
use crate::constants::images;

/// Get the adapter for Deno
pub fn adapter() -> RuntimeAdapter {
    RuntimeAdapter {
        name: "deno".to_string(),
        image: images::DENO.to_string(),
        extension: "mts".to_string(),
        // Container-level confinement is the sandbox; deno's own permission
        // prompts would hang a non-interactive run
        run_prefix: vec![
            "deno".to_string(),
            "run".to_string(),
            "--allow-all".to_string(),
        ],
        install_prefix: Some(vec!["deno".to_string(), "cache".to_string()]),
        registry_patterns: vec![
            r"^deno\.land$".to_string(),
            r"^jsr\.io$".to_string(),
            r"^registry\.npmjs\.org$".to_string(),
        ],
    }
}
