use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use wl_core::{MasteryConfig, SessionConfig};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConfigFile {
    pub mastery: MasteryConfig,
    pub session: SessionConfig,
}

pub fn data_dir() -> PathBuf {
    ProjectDirs::from("com", "wordloop", "Wordloop")
        .map(|dirs| dirs.data_local_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./data"))
}

/// Reads `config.toml`, writing the defaults there first if the file does
/// not exist yet.
pub fn load_config(path: &Path) -> anyhow::Result<ConfigFile> {
    let cfg = if path.exists() {
        let content = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?
    } else {
        let cfg = ConfigFile::default();
        let content = toml::to_string_pretty(&cfg)?;
        fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
        cfg
    };
    cfg.mastery
        .validate()
        .with_context(|| format!("invalid [mastery] section in {}", path.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let cfg: ConfigFile = toml::from_str("[session]\nsession_size = 6\n").unwrap();
        assert_eq!(cfg.session.session_size, 6);
        assert_eq!(cfg.session.choice_count, 4);
        assert_eq!(cfg.mastery, MasteryConfig::default());
    }

    #[test]
    fn defaults_are_written_and_reloaded() {
        let dir = std::env::temp_dir().join(format!("wordloop-config-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");

        let written = load_config(&path).unwrap();
        assert!(path.exists());
        assert_eq!(load_config(&path).unwrap(), written);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn empty_ladder_is_rejected() {
        let dir = std::env::temp_dir().join(format!("wordloop-config-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        fs::write(&path, "[mastery]\ninterval_ladder_hours = []\n").unwrap();

        assert!(load_config(&path).is_err());
        fs::remove_dir_all(&dir).unwrap();
    }
}
