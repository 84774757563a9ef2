//! Maps artifact filenames to the platform directory they are stored under.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Target platform of a release artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Platform {
    Windows,
    #[serde(rename = "macOS")]
    MacOs,
    Linux,
    Android,
    Other,
}

impl Platform {
    pub const ALL: [Platform; 5] = [
        Platform::Windows,
        Platform::MacOs,
        Platform::Linux,
        Platform::Android,
        Platform::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Windows => "Windows",
            Platform::MacOs => "macOS",
            Platform::Linux => "Linux",
            Platform::Android => "Android",
            Platform::Other => "Other",
        }
    }

    /// Directory segment used in bucket keys, `None` for [`Platform::Other`]
    /// which is stored directly under the repository's storage path.
    pub fn directory(self) -> Option<&'static str> {
        match self {
            Platform::Other => None,
            other => Some(other.as_str()),
        }
    }

    /// Classify a filename. Matching is case-insensitive and the checks run
    /// in a fixed priority order: Android, Windows, macOS, Linux.
    pub fn classify(filename: &str) -> Platform {
        let name = filename.to_lowercase();

        if name.ends_with(".apk") || name.contains("android") || name.contains("mobile") {
            return Platform::Android;
        }

        // Windows is checked before macOS, so "darwin" (which contains "win")
        // lands in Windows.
        if name.ends_with(".exe")
            || name.ends_with(".msi")
            || name.contains("win")
            || name.contains("desktop")
        {
            return Platform::Windows;
        }

        if name.ends_with(".dmg")
            || name.ends_with(".pkg")
            || name.contains("mac")
            || name.contains("darwin")
        {
            return Platform::MacOs;
        }

        if name.ends_with(".deb")
            || name.ends_with(".rpm")
            || name.ends_with(".appimage")
            || name.contains("linux")
        {
            return Platform::Linux;
        }

        Platform::Other
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
