//! Configuration for scanbox.
//!
//! Values are merged from these sources, later ones winning:
//! 1. built-in defaults,
//! 2. a config file (TOML, YAML or JSON, picked by extension), either given
//!    explicitly or the platform default `config.toml` when it exists,
//! 3. `SCANBOX_`-prefixed environment variables, e.g.
//!    `SCANBOX_PAYLOAD_POLICY=reference`.
//!
//! ```toml
//! data_dir = "/var/lib/scanbox"
//! slot_key = "camscanner_documents"
//! payload_dir = "camscanner"
//! payload_policy = "copy"
//! default_name = "Scan [month padding:none]/[day padding:none]/[year]"
//! ```

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::{OptionExt, ResultExt};
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use scanbox_store::{DEFAULT_NAME_FORMAT, DEFAULT_PAYLOAD_DIR, DEFAULT_SLOT_KEY, NameFormat, PayloadPolicy, StoreOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "SCANBOX_";
/// `SCANBOX_CONFIG` names the config file itself; it is read by the CLI, not merged.
const IGNORED_ENV_KEYS: &[&str] = &["config"];
const CONFIG_FILE_NAME: &str = "config.toml";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "scanbox", "scanbox")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Root of local storage. Defaults to the platform data directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    pub slot_key: String,
    /// Relative to `data_dir`.
    pub payload_dir: PathBuf,
    pub payload_policy: PayloadPolicy,
    /// `time` format description rendered against the creation time.
    pub default_name: String,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            slot_key: DEFAULT_SLOT_KEY.to_string(),
            payload_dir: PathBuf::from(DEFAULT_PAYLOAD_DIR),
            payload_policy: PayloadPolicy::default(),
            default_name: DEFAULT_NAME_FORMAT.to_string(),
        }
    }
}

impl Config {
    /// Load and validate the configuration.
    ///
    /// An explicit `file` must exist; the platform default file is only read
    /// when present.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::from_figment(&Self::figment(file)?)
    }

    /// The merged, not yet extracted, configuration sources.
    pub fn figment(file: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        let file = match file {
            Some(path) if !path.is_file() => exn::bail!(ErrorKind::NotFound(path.to_path_buf())),
            Some(path) => Some(path.to_path_buf()),
            None => Self::default_file().filter(|path| path.is_file()),
        };
        if let Some(path) = file {
            tracing::debug!(path = %path.display(), "Reading config file");
            figment = match path.extension().and_then(|ext| ext.to_str()) {
                Some("toml") => figment.merge(Toml::file(&path)),
                Some("yaml" | "yml") => figment.merge(Yaml::file(&path)),
                Some("json") => figment.merge(Json::file(&path)),
                _ => exn::bail!(ErrorKind::UnsupportedFormat(path)),
            };
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).ignore(IGNORED_ENV_KEYS).split("__")))
    }

    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let config: Self = figment.extract().or_raise(|| ErrorKind::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Platform location of the config file read when none is given.
    pub fn default_file() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    pub fn validate(&self) -> Result<()> {
        if self.slot_key.trim().is_empty() {
            exn::bail!(ErrorKind::Invalid {
                field: "slot_key",
                reason: "must not be empty",
            });
        }
        let slot_key = || ErrorKind::Invalid {
            field: "slot_key",
            reason: "must name a file inside the data directory",
        };
        if Path::new(&self.slot_key).has_root() {
            exn::bail!(slot_key());
        }
        scanbox_storage::validate_path(format!("{}.json", self.slot_key)).or_raise(slot_key)?;
        let payload_dir = || ErrorKind::Invalid {
            field: "payload_dir",
            reason: "must be a relative path inside the data directory",
        };
        // `validate_path` would quietly strip the root.
        if self.payload_dir.has_root() {
            exn::bail!(payload_dir());
        }
        scanbox_storage::validate_path(&self.payload_dir).or_raise(payload_dir)?;
        self.name_format()?;
        Ok(())
    }

    /// Absolute storage root: `data_dir` resolved against the current
    /// directory, or the platform data directory.
    pub fn data_dir(&self) -> Result<PathBuf> {
        let dir = match &self.data_dir {
            Some(dir) => dir.clone(),
            None => project_dirs().map(|dirs| dirs.data_dir().to_path_buf()).ok_or_raise(|| ErrorKind::NoDataDir)?,
        };
        std::path::absolute(&dir).or_raise(|| ErrorKind::Invalid {
            field: "data_dir",
            reason: "cannot be resolved to an absolute path",
        })
    }

    pub fn store_options(&self) -> Result<StoreOptions> {
        Ok(StoreOptions::default()
            .with_slot_key(self.slot_key.clone())
            .with_payload_dir(self.payload_dir.clone())
            .with_payload_policy(self.payload_policy)
            .with_default_name(self.name_format()?))
    }

    fn name_format(&self) -> Result<NameFormat> {
        self.default_name.parse::<NameFormat>().or_raise(|| ErrorKind::Invalid {
            field: "default_name",
            reason: "not a valid time format description",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rstest::rstest;

    fn defaults() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::from_figment(&defaults()).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.store_options().unwrap(), StoreOptions::default());
    }

    #[rstest]
    #[case::toml("scanbox.toml", "slot_key = \"documents\"\npayload_policy = \"reference\"\n")]
    #[case::yaml("scanbox.yaml", "slot_key: documents\npayload_policy: reference\n")]
    #[case::yml("scanbox.yml", "slot_key: documents\npayload_policy: reference\n")]
    #[case::json("scanbox.json", r#"{"slot_key": "documents", "payload_policy": "reference"}"#)]
    fn test_load_file(#[case] file_name: &str, #[case] contents: &str) {
        Jail::expect_with(|jail| {
            jail.create_file(file_name, contents)?;
            let config = Config::load(Some(Path::new(file_name))).unwrap();
            assert_eq!(config.slot_key, "documents");
            assert_eq!(config.payload_policy, PayloadPolicy::Reference);
            assert_eq!(config.payload_dir, Path::new(DEFAULT_PAYLOAD_DIR));
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("scanbox.toml", "payload_policy = \"reference\"\nslot_key = \"documents\"\n")?;
            jail.set_env("SCANBOX_PAYLOAD_POLICY", "copy");
            jail.set_env("SCANBOX_DATA_DIR", "/srv/scans");
            let config = Config::load(Some(Path::new("scanbox.toml"))).unwrap();
            assert_eq!(config.payload_policy, PayloadPolicy::Copy);
            assert_eq!(config.slot_key, "documents");
            assert_eq!(config.data_dir.as_deref(), Some(Path::new("/srv/scans")));
            Ok(())
        });
    }

    #[test]
    fn test_config_file_variable_is_not_a_setting() {
        Jail::expect_with(|jail| {
            jail.create_file("scanbox.toml", "slot_key = \"documents\"\n")?;
            jail.set_env("SCANBOX_CONFIG", "scanbox.toml");
            jail.set_env("SCANBOX_PAYLOAD_POLICY", "reference");
            let config = Config::load(Some(Path::new("scanbox.toml"))).unwrap();
            assert_eq!(config.slot_key, "documents");
            assert_eq!(config.payload_policy, PayloadPolicy::Reference);
            Ok(())
        });
    }

    #[test]
    fn test_missing_explicit_file() {
        Jail::expect_with(|_| {
            let err = Config::load(Some(Path::new("nowhere.toml"))).unwrap_err();
            assert!(matches!(&*err, ErrorKind::NotFound(_)));
            Ok(())
        });
    }

    #[test]
    fn test_unsupported_format() {
        Jail::expect_with(|jail| {
            jail.create_file("scanbox.ini", "slot_key = documents")?;
            let err = Config::load(Some(Path::new("scanbox.ini"))).unwrap_err();
            assert!(matches!(&*err, ErrorKind::UnsupportedFormat(_)));
            Ok(())
        });
    }

    #[rstest]
    #[case::unknown_field("colour = \"blue\"")]
    #[case::unknown_policy("payload_policy = \"move\"")]
    #[case::wrong_type("slot_key = 42")]
    fn test_parse_errors(#[case] toml: &str) {
        let err = Config::from_figment(&defaults().merge(Toml::string(toml))).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Parse));
    }

    #[rstest]
    #[case::empty_slot_key("slot_key = \"  \"", "slot_key")]
    #[case::escaping_slot_key("slot_key = \"../documents\"", "slot_key")]
    #[case::escaping_payload_dir("payload_dir = \"../payloads\"", "payload_dir")]
    #[case::absolute_payload_dir("payload_dir = \"/tmp\"", "payload_dir")]
    #[case::absolute_slot_key("slot_key = \"/etc/documents\"", "slot_key")]
    #[case::bad_default_name("default_name = \"Scan [nonsense]\"", "default_name")]
    fn test_invalid_values(#[case] toml: &str, #[case] expected: &str) {
        let err = Config::from_figment(&defaults().merge(Toml::string(toml))).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid { field, .. } if *field == expected), "{err:?}");
    }

    #[test]
    fn test_store_options() {
        let toml = "slot_key = \"documents\"\npayload_dir = \"scans/images\"\npayload_policy = \"reference\"\ndefault_name = \"Doc [year]\"";
        let config = Config::from_figment(&defaults().merge(Toml::string(toml))).unwrap();
        let expected = StoreOptions::default()
            .with_slot_key("documents")
            .with_payload_dir("scans/images")
            .with_payload_policy(PayloadPolicy::Reference)
            .with_default_name("Doc [year]".parse().unwrap());
        assert_eq!(config.store_options().unwrap(), expected);
    }

    #[test]
    fn test_relative_data_dir_is_made_absolute() {
        let config = Config {
            data_dir: Some(PathBuf::from("scans")),
            ..Config::default()
        };
        let dir = config.data_dir().unwrap();
        assert!(dir.is_absolute());
        assert!(dir.ends_with("scans"));
    }
}
