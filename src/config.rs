use crate::progression::UnlockCodes;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AiSettings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// `None` keeps every document in memory only.
    pub data_dir: Option<PathBuf>,
    /// Admin routes refuse every request when unset.
    pub admin_secret: Option<String>,
    pub sync_url: Option<String>,
    pub unlock_all_code: String,
    pub reset_code: String,
    pub ai: Option<AiSettings>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            data_dir: None,
            admin_secret: None,
            sync_url: None,
            unlock_all_code: "unlockall".to_string(),
            reset_code: "resetall".to_string(),
            ai: None,
        }
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let ai = env_non_empty("AI_API_KEY").map(|api_key| AiSettings {
            api_key,
            base_url: env_non_empty("AI_BASE_URL").unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: env_non_empty("AI_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            timeout_secs: env_non_empty("AI_TIMEOUT_SECS")
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60),
        });

        Self {
            host: env_non_empty("BACKEND_HOST").unwrap_or(defaults.host),
            port: env_non_empty("BACKEND_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
            data_dir: env_non_empty("DATA_DIR").map(PathBuf::from),
            admin_secret: env_non_empty("ADMIN_SECRET"),
            sync_url: env_non_empty("SYNC_URL"),
            unlock_all_code: env_non_empty("UNLOCK_ALL_CODE").unwrap_or(defaults.unlock_all_code),
            reset_code: env_non_empty("RESET_CODE").unwrap_or(defaults.reset_code),
            ai,
        }
    }

    pub fn unlock_codes(&self) -> UnlockCodes {
        UnlockCodes::new(&self.unlock_all_code, &self.reset_code)
    }
}
