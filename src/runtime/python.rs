//! Python runtime adapter

use super::RuntimeAdapter;
use crate::constants::images;

/// Get the adapter for Python
pub fn adapter() -> RuntimeAdapter {
    RuntimeAdapter {
        name: "python".to_string(),
        image: images::PYTHON.to_string(),
        extension: "py".to_string(),
        run_prefix: vec!["python3".to_string()],
        // --user keeps installs inside the writable HOME tmpfs
        install_prefix: Some(vec![
            "pip3".to_string(),
            "install".to_string(),
            "--user".to_string(),
            "--no-warn-script-location".to_string(),
        ]),
        registry_patterns: vec![
            r"^pypi\.org$".to_string(),
            r"^files\.pythonhosted\.org$".to_string(),
        ],
    }
}
