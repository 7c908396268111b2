use std::{collections::BTreeMap, path::PathBuf};

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Development-only emulated IdP.
///
/// **Never enable in production.** Any configured username logs in with a
/// password equal to the username.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmulatorConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Username → attribute record released on login.
    #[serde(default = "default_emulator_users")]
    pub users: BTreeMap<String, BTreeMap<String, String>>,

    /// Directory for emulator state. Defaults to a folder under the OS
    /// temp directory.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,

    /// Cookie tying a browser to its emulator state.
    #[serde(default = "default_emulator_cookie")]
    pub cookie_name: String,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            users: default_emulator_users(),
            state_dir: None,
            cookie_name: default_emulator_cookie(),
        }
    }
}

impl EmulatorConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }
        if self.users.is_empty() {
            return Err(ConfigError::Validation(
                "emulator.enabled = true requires at least one emulator.users entry".into(),
            ));
        }
        if self.cookie_name.is_empty() {
            return Err(ConfigError::Validation(
                "emulator.cookie_name must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Resolved state directory.
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("shibgate-emulator"))
    }
}

fn default_emulator_cookie() -> String {
    "shibgate_emulator".to_string()
}

fn default_emulator_users() -> BTreeMap<String, BTreeMap<String, String>> {
    [
        ("admin", "Admin User", "Admin", "admin@uwm.edu"),
        ("staff", "Staff User", "Staff", "staff@uwm.edu"),
        ("user", "User User", "User", "user@uwm.edu"),
    ]
    .into_iter()
    .map(|(uid, display, given, mail)| {
        let attrs = [
            ("uid", uid),
            ("displayName", display),
            ("givenName", given),
            ("sn", "User"),
            ("mail", mail),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        (uid.to_string(), attrs)
    })
    .collect()
}
