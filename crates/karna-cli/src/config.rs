//! Configuration Vault – reads/writes `~/.karna/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use karna_kernel::OpenDoorPolicy;
use karna_middleware::MqttSettings;
use karna_runtime::RetryPolicy;
use karna_types::KarnaError;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A credential that never appears in `Debug` output and is wiped from
/// memory when dropped.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(if self.0.is_empty() { "<not set>" } else { "<redacted>" })
    }
}

/// Broker connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    pub keepalive_secs: u64,
    /// Empty means a random id per connection.
    pub client_id: String,
    pub username: String,
    #[serde(skip_serializing_if = "Secret::is_empty")]
    pub password: Secret,
    pub tls: bool,
    /// `0` leaves a lost connection down until the process is restarted.
    pub reconnect_delay_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: "localhost".to_string(),
            port: 8883,
            keepalive_secs: 60,
            client_id: String::new(),
            username: String::new(),
            password: Secret::default(),
            tls: true,
            reconnect_delay_secs: 0,
        }
    }
}

/// Redelivery of verification notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// SQLite file for undelivered notifications; in memory when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbox_path: Option<PathBuf>,
    pub retry_interval_secs: u64,
    pub max_attempts: u32,
    /// Delivered and abandoned entries are deleted after this long.
    pub retention_hours: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            outbox_path: None,
            retry_interval_secs: 30,
            max_attempts: 5,
            retention_hours: 7 * 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub llm_base_url: String,
    pub llm_model: String,
    #[serde(skip_serializing_if = "Secret::is_empty")]
    pub llm_api_key: Secret,
    pub greeting: String,
    pub unanswered_log: PathBuf,
    /// Conversation history, reloaded on the next start.
    pub chat_log: PathBuf,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            llm_base_url: "https://api.groq.com/openai".to_string(),
            llm_model: "llama3-70b-8192".to_string(),
            llm_api_key: Secret::default(),
            greeting: karna_runtime::voice::DEFAULT_GREETING.to_string(),
            unanswered_log: PathBuf::from("UnansweredQueries.json"),
            chat_log: PathBuf::from("ChatLog.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub poll_interval_ms: u64,
    pub animations_dir: PathBuf,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 16,
            animations_dir: PathBuf::from("animations"),
        }
    }
}

/// Persisted configuration stored in `~/.karna/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_robot_id")]
    pub robot_id: String,

    #[serde(default)]
    pub mqtt: MqttConfig,

    /// Delivery backend, e.g. `http://192.168.0.217:5000`.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// The activity slot shared by all Karna processes.
    #[serde(default = "default_activity_file")]
    pub activity_file: PathBuf,

    /// How long the latch is held open.
    #[serde(default = "default_door_actuation_ms")]
    pub door_actuation_ms: u64,

    #[serde(default)]
    pub open_door_policy: OpenDoorPolicy,

    #[serde(default)]
    pub notify: NotifyConfig,

    #[serde(default)]
    pub voice: VoiceConfig,

    #[serde(default)]
    pub display: DisplayConfig,
}

fn default_robot_id() -> String {
    "karna-01".to_string()
}
fn default_api_base_url() -> String {
    "http://localhost:5000".to_string()
}
fn default_activity_file() -> PathBuf {
    PathBuf::from("animation_state.txt")
}
fn default_door_actuation_ms() -> u64 {
    2000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            robot_id: default_robot_id(),
            mqtt: MqttConfig::default(),
            api_base_url: default_api_base_url(),
            activity_file: default_activity_file(),
            door_actuation_ms: default_door_actuation_ms(),
            open_door_policy: OpenDoorPolicy::default(),
            notify: NotifyConfig::default(),
            voice: VoiceConfig::default(),
            display: DisplayConfig::default(),
        }
    }
}

impl Config {
    pub fn mqtt_settings(&self) -> MqttSettings {
        MqttSettings {
            robot_id: self.robot_id.clone(),
            broker: self.mqtt.broker.clone(),
            port: self.mqtt.port,
            keepalive: Duration::from_secs(self.mqtt.keepalive_secs),
            client_id: self.mqtt.client_id.clone(),
            username: self.mqtt.username.clone(),
            password: self.mqtt.password.expose().to_string(),
            use_tls: self.mqtt.tls,
            reconnect_delay: (self.mqtt.reconnect_delay_secs > 0)
                .then(|| Duration::from_secs(self.mqtt.reconnect_delay_secs)),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            interval: Duration::from_secs(self.notify.retry_interval_secs.max(1)),
            max_attempts: self.notify.max_attempts.max(1),
            retention: Duration::from_secs(self.notify.retention_hours.saturating_mul(60 * 60)),
        }
    }

    pub fn door_actuation(&self) -> Duration {
        Duration::from_millis(self.door_actuation_ms)
    }
}

/// Return the path to `~/.karna/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".karna").join("config.toml")
}

/// Load the config from `path`, applying `KARNA_*` overrides. Returns `None`
/// if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<Config>, KarnaError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        KarnaError::Config(format!("failed to read config at {}: {e}", path.display()))
    })?;
    let mut cfg: Config = toml::from_str(&raw)
        .map_err(|e| KarnaError::Config(format!("failed to parse {}: {e}", path.display())))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `KARNA_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `KARNA_ROBOT_ID` | `robot_id` |
/// | `KARNA_MQTT_BROKER` | `mqtt.broker` |
/// | `KARNA_MQTT_PORT` | `mqtt.port` |
/// | `KARNA_MQTT_USERNAME` | `mqtt.username` |
/// | `KARNA_MQTT_PASSWORD` | `mqtt.password` |
/// | `KARNA_API_BASE_URL` | `api_base_url` |
/// | `KARNA_ACTIVITY_FILE` | `activity_file` |
/// | `KARNA_LLM_API_KEY` | `voice.llm_api_key` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("KARNA_ROBOT_ID") {
        cfg.robot_id = v;
    }
    if let Ok(v) = std::env::var("KARNA_MQTT_BROKER") {
        cfg.mqtt.broker = v;
    }
    if let Ok(v) = std::env::var("KARNA_MQTT_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.mqtt.port = port;
    }
    if let Ok(v) = std::env::var("KARNA_MQTT_USERNAME") {
        cfg.mqtt.username = v;
    }
    if let Ok(v) = std::env::var("KARNA_MQTT_PASSWORD") {
        cfg.mqtt.password = Secret::new(v);
    }
    if let Ok(v) = std::env::var("KARNA_API_BASE_URL") {
        cfg.api_base_url = v;
    }
    if let Ok(v) = std::env::var("KARNA_ACTIVITY_FILE") {
        cfg.activity_file = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("KARNA_LLM_API_KEY") {
        cfg.voice.llm_api_key = Secret::new(v);
    }
}

/// Save the config to `path`, creating its directory if necessary.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), KarnaError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| KarnaError::Config(format!("failed to create config directory: {e}")))?;
        // Restrict the config directory to the owner only (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(|e| {
                KarnaError::Config(format!("failed to set config directory permissions: {e}"))
            })?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| KarnaError::Config(format!("failed to serialize config: {e}")))?;
    // Owner-only read/write (rw-------): the file may hold broker and API
    // credentials.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| {
                KarnaError::Config(format!("failed to write config at {}: {e}", path.display()))
            })?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| {
        KarnaError::Config(format!("failed to write config at {}: {e}", path.display()))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_debug_redacts_secrets() {
        let mut cfg = Config::default();
        cfg.mqtt.password = Secret::new("hive-secret");
        cfg.voice.llm_api_key = Secret::new("gsk_secret");
        let debug_str = format!("{cfg:?}");
        assert!(!debug_str.contains("hive-secret"));
        assert!(!debug_str.contains("gsk_secret"));
        assert!(debug_str.contains("<redacted>"));
    }

    #[test]
    fn config_debug_shows_not_set_for_empty_secrets() {
        let debug_str = format!("{:?}", Config::default());
        assert!(debug_str.contains("<not set>"));
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = fs::metadata(path.parent().unwrap())
            .expect("dir metadata")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.door_actuation_ms, 2000);
        assert_eq!(loaded.open_door_policy, OpenDoorPolicy::DeliveryIdMatch);
        assert_eq!(loaded.notify.max_attempts, 5);
        assert_eq!(loaded.display.poll_interval_ms, 16);
        assert!(loaded.notify.outbox_path.is_none());
        assert_eq!(loaded.voice.chat_log, PathBuf::from("ChatLog.json"));
        assert_eq!(
            loaded.retry_policy().retention,
            Duration::from_secs(7 * 24 * 60 * 60)
        );
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "open_door_policy = \"disabled\"\n[mqtt]\nreconnect_delay_secs = 5\n",
        )
        .unwrap();

        let cfg = load_from(&path).unwrap().unwrap();
        assert_eq!(cfg.open_door_policy, OpenDoorPolicy::Disabled);
        assert_eq!(cfg.mqtt.keepalive_secs, 60);
        assert!(cfg.mqtt.tls);
        assert_eq!(cfg.mqtt_settings().reconnect_delay, Some(Duration::from_secs(5)));
    }

    #[test]
    fn zero_reconnect_delay_disables_retry() {
        assert_eq!(Config::default().mqtt_settings().reconnect_delay, None);
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "door_actuation_ms = \"soon\"").unwrap();
        assert!(matches!(load_from(&path), Err(KarnaError::Config(_))));
    }

    #[test]
    fn config_path_points_to_karna_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".karna"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn apply_env_overrides_changes_robot_id() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("KARNA_ROBOT_ID", "karna-07") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.robot_id, "karna-07");
        unsafe { std::env::remove_var("KARNA_ROBOT_ID") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_port() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("KARNA_MQTT_PORT", "not-a-port") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.mqtt.port, 8883);
        unsafe { std::env::remove_var("KARNA_MQTT_PORT") };
    }

    #[test]
    fn apply_env_overrides_sets_secrets() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("KARNA_MQTT_PASSWORD", "from-env") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.mqtt.password.expose(), "from-env");
        assert_eq!(cfg.mqtt_settings().password, "from-env");
        unsafe { std::env::remove_var("KARNA_MQTT_PASSWORD") };
    }

    #[test]
    fn apply_env_overrides_changes_api_base_url() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("KARNA_API_BASE_URL", "http://192.168.0.217:5000") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.api_base_url, "http://192.168.0.217:5000");
        unsafe { std::env::remove_var("KARNA_API_BASE_URL") };
    }
}
