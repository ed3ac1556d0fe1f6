use std::path::PathBuf;

use anyhow::anyhow;
use serde_derive::{Deserialize, Serialize};

const DEFAULT_STORAGE_PATH: &str = "storage/kvdb";
pub const DEFAULT_PROMPT: &str = "kvcli";
pub const DEFAULT_DB_NAME: &str = "kvdb";

/// CLI-local configuration, loaded from a config file (toml/yaml/json, via
/// the `config` crate) and refined at runtime by `.cmd value` control
/// commands typed at the prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigLoad {
    #[serde(default)]
    version: u8,

    /// load config path, default '${pwd}/storage/kvdb'
    #[serde(default)]
    storage_path: Option<PathBuf>,

    /// prompt
    pub prompt: Option<String>,

    /// Show stats after executing queries. Only works in non-interactive mode.
    pub show_stats: Option<bool>,

    /// fix part cmd options. default false
    auto_append_part_cmd: Option<bool>,
    /// Division symbol
    auto_append_part_cmd_symbol: Option<char>,

    /// Multi line mode, default is true.
    pub multi_line: Option<bool>,

    /// whether replace '\n' with '\\n', default true.
    pub replace_newline: Option<bool>,

    /// Eviction byte budget passed to `Database::set_max_memory`. 0 or
    /// unset means unlimited.
    maxmemory: Option<u64>,

    cli: Option<CliConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CliConfig {
    /// Show rows affected
    show_affected: Option<bool>,

    /// Show progress [bar] when executing queries.
    pub show_progress: Option<bool>,
}

impl Default for ConfigLoad {
    fn default() -> Self {
        ConfigLoad {
            version: 0,
            storage_path: None,
            prompt: Some(DEFAULT_PROMPT.to_string()),
            show_stats: Some(false),
            auto_append_part_cmd: Some(false),
            auto_append_part_cmd_symbol: Some(';'),
            multi_line: Some(true),
            replace_newline: Some(true),
            maxmemory: Some(0),
            cli: Some(CliConfig::default()),
        }
    }
}

impl ConfigLoad {
    /// Loads config from `path`, falling back to defaults for any field the
    /// file omits and for the file itself if it does not exist.
    pub fn new(path: &str) -> anyhow::Result<Self> {
        let built = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("KVCLI"))
            .build()?;
        let partial: PartialConfig = built
            .try_deserialize()
            .map_err(|e| anyhow!("failed to parse config {}: {}", path, e))?;
        Ok(partial.into_config_load())
    }

    pub fn is_show_affected(&self) -> bool {
        self.cli.as_ref().and_then(|c| c.show_affected).unwrap_or(false)
    }

    /// load config path
    pub fn get_storage_path(&self) -> PathBuf {
        match &self.storage_path {
            Some(p) => p.clone(),
            None => PathBuf::from(DEFAULT_STORAGE_PATH),
        }
    }

    /// fix part cmd options. default false
    pub fn get_auto_append_part_cmd(&self) -> bool {
        self.auto_append_part_cmd.unwrap_or(false)
    }

    /// Division symbol
    pub fn get_auto_append_part_cmd_symbol(&self) -> char {
        self.auto_append_part_cmd_symbol.unwrap_or(';')
    }

    /// `maxmemory` byte budget; 0 means unlimited.
    pub fn get_maxmemory(&self) -> u64 {
        self.maxmemory.unwrap_or(0)
    }

    /// change cmd:
    /// show_progress, show_stats, show_affected, auto_append_part_cmd,
    /// auto_append_part_cmd_symbol, multi_line, replace_newline, maxmemory
    pub fn inject_cmd(&mut self, cmd_name: &str, cmd_value: &str) -> anyhow::Result<()> {
        match cmd_name {
            "show_progress" => self.set_show_progress(cmd_value.parse()?),
            "show_affected" => self.set_show_affected(cmd_value.parse()?),
            "show_stats" => self.show_stats = Some(cmd_value.parse()?),
            "auto_append_part_cmd" => self.auto_append_part_cmd = Some(cmd_value.parse()?),
            "auto_append_part_cmd_symbol" => {
                self.auto_append_part_cmd_symbol = Some(cmd_value.parse()?)
            }
            "multi_line" => self.multi_line = Some(cmd_value.parse()?),
            "replace_newline" => self.replace_newline = Some(cmd_value.parse()?),
            "maxmemory" => self.maxmemory = Some(cmd_value.parse()?),
            _ => return Err(anyhow!("Unknown command: {}", cmd_name)),
        }
        Ok(())
    }

    pub fn terminal_update(&mut self) {
        self.set_show_progress(true);
        self.show_stats = Some(true);
    }

    pub fn fix_settings(&mut self) {
        self.storage_path = Some(match &self.storage_path {
            None => PathBuf::from(DEFAULT_STORAGE_PATH),
            Some(p) => p.join(DEFAULT_DB_NAME),
        });
    }

    fn set_show_progress(&mut self, v: bool) {
        self.cli.get_or_insert_with(CliConfig::default).show_progress = Some(v);
    }

    fn set_show_affected(&mut self, v: bool) {
        self.cli.get_or_insert_with(CliConfig::default).show_affected = Some(v);
    }
}

impl Default for CliConfig {
    fn default() -> Self {
        CliConfig { show_affected: Some(false), show_progress: Some(false) }
    }
}

/// Mirrors `ConfigLoad` but with every field optional, so a partial config
/// file (or none at all) deserializes cleanly; missing fields fall back to
/// `ConfigLoad::default()`.
#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    version: Option<u8>,
    storage_path: Option<PathBuf>,
    prompt: Option<String>,
    show_stats: Option<bool>,
    auto_append_part_cmd: Option<bool>,
    auto_append_part_cmd_symbol: Option<char>,
    multi_line: Option<bool>,
    replace_newline: Option<bool>,
    maxmemory: Option<u64>,
}

impl PartialConfig {
    fn into_config_load(self) -> ConfigLoad {
        let defaults = ConfigLoad::default();
        ConfigLoad {
            version: self.version.unwrap_or(defaults.version),
            storage_path: self.storage_path.or(defaults.storage_path),
            prompt: self.prompt.or(defaults.prompt),
            show_stats: self.show_stats.or(defaults.show_stats),
            auto_append_part_cmd: self.auto_append_part_cmd.or(defaults.auto_append_part_cmd),
            auto_append_part_cmd_symbol: self
                .auto_append_part_cmd_symbol
                .or(defaults.auto_append_part_cmd_symbol),
            multi_line: self.multi_line.or(defaults.multi_line),
            replace_newline: self.replace_newline.or(defaults.replace_newline),
            maxmemory: self.maxmemory.or(defaults.maxmemory),
            cli: defaults.cli,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = ConfigLoad::new("no/such/kvdb.yaml").unwrap();
        assert_eq!(cfg.prompt.as_deref(), Some(DEFAULT_PROMPT));
        assert_eq!(cfg.get_storage_path(), PathBuf::from(DEFAULT_STORAGE_PATH));
    }

    #[test]
    fn inject_cmd_updates_nested_cli_settings() {
        let mut cfg = ConfigLoad::default();
        cfg.inject_cmd("show_affected", "true").unwrap();
        assert!(cfg.is_show_affected());
    }

    #[test]
    fn inject_cmd_rejects_unknown_names() {
        let mut cfg = ConfigLoad::default();
        assert!(cfg.inject_cmd("nope", "true").is_err());
    }

    #[test]
    fn maxmemory_defaults_to_unlimited_and_is_settable() {
        let mut cfg = ConfigLoad::default();
        assert_eq!(cfg.get_maxmemory(), 0);
        cfg.inject_cmd("maxmemory", "1048576").unwrap();
        assert_eq!(cfg.get_maxmemory(), 1_048_576);
    }
}
