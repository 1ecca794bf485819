use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};

/// Top-level flowrun configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_workspace")]
    pub workspace: String,
    /// SQLite database for run records. Default: <workspace>/runs.db
    #[serde(default)]
    pub database: Option<String>,
    /// User id attached to tool contexts when the caller gives none.
    #[serde(default = "default_user_id")]
    pub user_id: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            database: None,
            user_id: default_user_id(),
        }
    }
}

fn default_workspace() -> String { "~/.flowrun".to_string() }
fn default_user_id() -> String { "local".to_string() }

/// Per-tool backend configuration. A missing section puts that tool in mock mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub email: Option<EmailConfig>,
    #[serde(default)]
    pub whatsapp: Option<WhatsAppConfig>,
    #[serde(default)]
    pub google_sheets: Option<SheetsConfig>,
    #[serde(default)]
    pub n8n: Option<N8nConfig>,
}

/// SMTP settings for `email.send`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    /// Implicit TLS (port 465 style). Otherwise STARTTLS is used.
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Sender address. Defaults to `username`.
    #[serde(default)]
    pub from: Option<String>,
}

fn default_smtp_port() -> u16 { 587 }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WhatsAppProvider {
    Twilio,
    Meta,
    Textme,
}

impl WhatsAppProvider {
    pub const ALL: [WhatsAppProvider; 3] = [Self::Twilio, Self::Meta, Self::Textme];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Twilio => "twilio",
            Self::Meta => "meta",
            Self::Textme => "textme",
        }
    }
}

impl std::str::FromStr for WhatsAppProvider {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "twilio" => Ok(Self::Twilio),
            "meta" => Ok(Self::Meta),
            "textme" => Ok(Self::Textme),
            other => Err(FlowError::Config(format!(
                "unknown whatsapp provider '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    /// Backend to try first. The others are still tried in order after it.
    #[serde(default)]
    pub provider: Option<WhatsAppProvider>,
    #[serde(default)]
    pub twilio: Option<TwilioConfig>,
    #[serde(default)]
    pub meta: Option<MetaConfig>,
    #[serde(default)]
    pub textme: Option<TextMeConfig>,
}

impl WhatsAppConfig {
    /// Backends in the order they should be attempted.
    pub fn provider_order(&self) -> Vec<WhatsAppProvider> {
        let mut order = Vec::with_capacity(3);
        if let Some(p) = self.provider {
            order.push(p);
        }
        for p in WhatsAppProvider::ALL {
            if !order.contains(&p) {
                order.push(p);
            }
        }
        order
    }

    pub fn is_configured(&self, provider: WhatsAppProvider) -> bool {
        match provider {
            WhatsAppProvider::Twilio => self.twilio.as_ref().is_some_and(|t| {
                non_empty(&t.account_sid) && non_empty(&t.auth_token) && non_empty(&t.from)
            }),
            WhatsAppProvider::Meta => self
                .meta
                .as_ref()
                .is_some_and(|m| non_empty(&m.token) && non_empty(&m.phone_number_id)),
            WhatsAppProvider::Textme => self.textme.as_ref().is_some_and(|t| non_empty(&t.api_key)),
        }
    }

    /// First configured backend in attempt order.
    pub fn active_provider(&self) -> Option<WhatsAppProvider> {
        self.provider_order()
            .into_iter()
            .find(|p| self.is_configured(*p))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    /// Sender number, with or without the `whatsapp:` prefix.
    pub from: String,
    #[serde(default = "default_twilio_base")]
    pub api_base: String,
}

fn default_twilio_base() -> String { "https://api.twilio.com".to_string() }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub token: String,
    pub phone_number_id: String,
    #[serde(default = "default_meta_base")]
    pub api_base: String,
}

fn default_meta_base() -> String { "https://graph.facebook.com/v18.0".to_string() }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextMeConfig {
    pub api_key: String,
    #[serde(default = "default_textme_base")]
    pub api_base: String,
}

fn default_textme_base() -> String { "https://api.textmebot.com".to_string() }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetsConfig {
    #[serde(default = "default_sheets_base")]
    pub api_base: String,
    /// Named credentials, selected by a node's `credentialRef`.
    #[serde(default)]
    pub credentials: HashMap<String, SheetsCredential>,
}

impl Default for SheetsConfig {
    fn default() -> Self {
        Self {
            api_base: default_sheets_base(),
            credentials: HashMap::new(),
        }
    }
}

impl SheetsConfig {
    /// Credential by name, falling back to the only one or to `default`.
    pub fn credential(&self, name: Option<&str>) -> Option<&SheetsCredential> {
        let found = match name {
            Some(n) => self.credentials.get(n),
            None => None,
        };
        found
            .or_else(|| self.credentials.get("default"))
            .or_else(|| {
                if self.credentials.len() == 1 {
                    self.credentials.values().next()
                } else {
                    None
                }
            })
            .filter(|c| c.is_usable())
    }
}

fn default_sheets_base() -> String { "https://sheets.googleapis.com/v4".to_string() }

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SheetsCredential {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl SheetsCredential {
    pub fn is_usable(&self) -> bool {
        configured(&self.access_token).is_some() || configured(&self.api_key).is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct N8nConfig {
    #[serde(default = "default_n8n_base")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Sent as `X-N8N-Webhook-Secret` when a node names a `secretRef`.
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

impl Default for N8nConfig {
    fn default() -> Self {
        Self {
            base_url: default_n8n_base(),
            api_key: None,
            webhook_secret: None,
        }
    }
}

fn default_n8n_base() -> String { "http://localhost:5678".to_string() }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| FlowError::ConfigNotFound(path.display().to_string()))?;

        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| FlowError::Config(e.to_string()))
    }

    /// Build a config from environment variables alone.
    pub fn from_env() -> Self {
        let mut engine = EngineConfig::default();
        if let Some(ws) = env("FLOWRUN_WORKSPACE") {
            engine.workspace = ws;
        }
        engine.database = env("FLOWRUN_DATABASE");
        if let Some(user) = env("FLOWRUN_USER") {
            engine.user_id = user;
        }
        Self {
            engine,
            tools: ToolsConfig::from_env(),
        }
    }

    /// Resolve the workspace directory (expand ~).
    pub fn workspace_dir(&self) -> PathBuf {
        expand_home(&self.engine.workspace)
    }

    pub fn database_path(&self) -> PathBuf {
        match &self.engine.database {
            Some(db) => expand_home(db),
            None => self.workspace_dir().join("runs.db"),
        }
    }

    /// Copy of the config with every secret replaced by `***`.
    pub fn redacted(&self) -> Self {
        let mut out = self.clone();
        let tools = &mut out.tools;
        if let Some(email) = tools.email.as_mut() {
            redact(&mut email.password);
        }
        if let Some(wa) = tools.whatsapp.as_mut() {
            if let Some(t) = wa.twilio.as_mut() {
                t.auth_token = REDACTED.to_string();
            }
            if let Some(m) = wa.meta.as_mut() {
                m.token = REDACTED.to_string();
            }
            if let Some(t) = wa.textme.as_mut() {
                t.api_key = REDACTED.to_string();
            }
        }
        if let Some(sheets) = tools.google_sheets.as_mut() {
            for cred in sheets.credentials.values_mut() {
                redact(&mut cred.access_token);
                redact(&mut cred.api_key);
            }
        }
        if let Some(n8n) = tools.n8n.as_mut() {
            redact(&mut n8n.api_key);
            redact(&mut n8n.webhook_secret);
        }
        out
    }
}

impl ToolsConfig {
    /// Read the conventional provider environment variables (`SMTP_HOST`,
    /// `TWILIO_ACCOUNT_SID`, `N8N_API_KEY`, ...). Sections whose key
    /// variables are unset stay `None`.
    pub fn from_env() -> Self {
        let email = env("SMTP_HOST").map(|host| EmailConfig {
            host,
            port: env("SMTP_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or_else(default_smtp_port),
            secure: env("SMTP_SECURE").is_some_and(|s| s == "true"),
            username: env("SMTP_USER"),
            password: env("SMTP_PASS"),
            from: env("SMTP_FROM"),
        });

        let twilio = match (env("TWILIO_ACCOUNT_SID"), env("TWILIO_AUTH_TOKEN")) {
            (Some(account_sid), Some(auth_token)) => Some(TwilioConfig {
                account_sid,
                auth_token,
                from: env("TWILIO_WHATSAPP_FROM").unwrap_or_default(),
                api_base: default_twilio_base(),
            }),
            _ => None,
        };
        let meta = match (
            env("META_WHATSAPP_TOKEN"),
            env("META_WHATSAPP_PHONE_NUMBER_ID"),
        ) {
            (Some(token), Some(phone_number_id)) => Some(MetaConfig {
                token,
                phone_number_id,
                api_base: default_meta_base(),
            }),
            _ => None,
        };
        let textme = env("TEXTME_API_KEY").map(|api_key| TextMeConfig {
            api_key,
            api_base: default_textme_base(),
        });
        let whatsapp = if twilio.is_some() || meta.is_some() || textme.is_some() {
            Some(WhatsAppConfig {
                provider: env("WHATSAPP_PROVIDER").and_then(|p| p.parse().ok()),
                twilio,
                meta,
                textme,
            })
        } else {
            None
        };

        let sheet_cred = SheetsCredential {
            access_token: env("GOOGLE_SHEETS_ACCESS_TOKEN"),
            api_key: env("GOOGLE_SHEETS_API_KEY"),
        };
        let google_sheets = sheet_cred.is_usable().then(|| SheetsConfig {
            api_base: default_sheets_base(),
            credentials: HashMap::from([("default".to_string(), sheet_cred)]),
        });

        let n8n_key = env("N8N_API_KEY");
        let n8n_base = env("N8N_BASE_URL");
        let n8n_secret = env("N8N_WEBHOOK_SECRET");
        let n8n = if n8n_key.is_some() || n8n_base.is_some() || n8n_secret.is_some() {
            Some(N8nConfig {
                base_url: n8n_base.unwrap_or_else(default_n8n_base),
                api_key: n8n_key,
                webhook_secret: n8n_secret,
            })
        } else {
            None
        };

        Self {
            email,
            whatsapp,
            google_sheets,
            n8n,
        }
    }
}

const REDACTED: &str = "***";

fn redact(value: &mut Option<String>) {
    if value.is_some() {
        *value = Some(REDACTED.to_string());
    }
}

/// A secret value that is actually set: not empty and not an unexpanded
/// `${VAR}` reference left behind by [`AppConfig::load`].
pub fn configured(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| non_empty(v))
}

fn non_empty(value: &str) -> bool {
    let v = value.trim();
    !v.is_empty() && !(v.starts_with("${") && v.ends_with('}'))
}

fn env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Expand `${ENV_VAR}` patterns in a string. Unset variables are kept as-is.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match std::env::var(name) {
                    Ok(val) => result.push_str(&val),
                    Err(_) => result.push_str(&rest[start..start + 2 + end + 1]),
                }
                rest = &after[end + 1..];
            }
            None => {
                result.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    result.push_str(rest);
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
