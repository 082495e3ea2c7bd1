use serde::{Deserialize, Serialize};

/// Content types release hosts use for zip archives.
const ZIP_CONTENT_TYPES: [&str; 2] = ["application/zip", "application/x-zip-compressed"];

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CurrentSystem {
    pub os: String,
    pub arch: String,
    /// Width marker expected in asset names, `64` or `32`.
    pub pointer_width: String,
}

impl Default for CurrentSystem {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            pointer_width: if cfg!(target_pointer_width = "64") {
                "64".to_string()
            } else {
                "32".to_string()
            },
        }
    }
}

impl std::fmt::Display for CurrentSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)?;
        Ok(())
    }
}

impl CurrentSystem {
    /// Lowercase substrings that identify a release asset built for this OS.
    pub fn platform_markers(&self) -> Vec<String> {
        match self.os.as_str() {
            // plain "win" would also match "darwin"
            "windows" => vec!["windows".into(), "win32".into(), "win64".into()],
            "macos" => vec!["macos".into(), "darwin".into(), "osx".into()],
            os => vec![os.to_lowercase()],
        }
    }

    /// Whether an asset with this name and content type can be installed here.
    pub fn matches_asset(&self, name: &str, content_type: &str) -> bool {
        let name = name.to_lowercase();
        self.platform_markers()
            .iter()
            .any(|marker| name.contains(marker.as_str()))
            && name.contains(self.pointer_width.as_str())
            && ZIP_CONTENT_TYPES.contains(&content_type)
    }
}
