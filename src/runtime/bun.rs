//! Bun runtime adapter (TypeScript execution)

use super::RuntimeAdapter;
use crate::constants::images;

/// Get the adapter for Bun
pub fn adapter() -> RuntimeAdapter {
    RuntimeAdapter {
        name: "bun".to_string(),
        image: images::BUN.to_string(),
        extension: "ts".to_string(),
        run_prefix: vec!["bun".to_string(), "run".to_string()],
        install_prefix: Some(vec!["bun".to_string(), "add".to_string()]),
        registry_patterns: vec![r"^registry\.npmjs\.org$".to_string()],
    }
}
