//! Bash runtime adapter

use super::RuntimeAdapter;
use crate::constants::images;

/// Get the adapter for Bash
pub fn adapter() -> RuntimeAdapter {
    RuntimeAdapter {
        name: "bash".to_string(),
        image: images::BASH.to_string(),
        extension: "sh".to_string(),
        run_prefix: vec!["bash".to_string()],
        // No package manager inside the bash image
        install_prefix: None,
        registry_patterns: Vec::new(),
    }
}
