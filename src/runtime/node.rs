//! Node.js runtime adapter

use super::RuntimeAdapter;
use crate::constants::images;

/// Get the adapter for Node.js
pub fn adapter() -> RuntimeAdapter {
    RuntimeAdapter {
        name: "node".to_string(),
        image: images::NODE.to_string(),
        extension: "js".to_string(),
        run_prefix: vec!["node".to_string()],
        // --no-save avoids touching a package.json that may not exist
        install_prefix: Some(vec![
            "npm".to_string(),
            "install".to_string(),
            "--no-save".to_string(),
        ]),
        registry_patterns: vec![r"^registry\.npmjs\.org$".to_string()],
    }
}
