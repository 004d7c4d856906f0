use std::env;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Supabase,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_service_role_key: String,
    pub store_backend: StoreBackend,
    pub slot_generation_horizon_days: i64,
    pub max_generation_range_days: i64,
    pub notification_webhook_url: Option<String>,
    pub calendar_sync_webhook_url: Option<String>,
    pub server_port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            supabase_service_role_key: String::new(),
            store_backend: StoreBackend::Memory,
            slot_generation_horizon_days: 30,
            max_generation_range_days: 90,
            notification_webhook_url: None,
            calendar_sync_webhook_url: None,
            server_port: 3000,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let store_backend = match env::var("SCHEDULING_STORE").as_deref() {
            Ok("supabase") => StoreBackend::Supabase,
            Ok("memory") => StoreBackend::Memory,
            Ok(other) => {
                warn!("Unknown SCHEDULING_STORE '{}', using in-memory store", other);
                StoreBackend::Memory
            }
            Err(_) => StoreBackend::Memory,
        };

        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_service_role_key: env::var("SUPABASE_SERVICE_ROLE_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_SERVICE_ROLE_KEY not set, using empty value");
                    String::new()
                }),
            store_backend,
            slot_generation_horizon_days: parse_or("SLOT_GENERATION_HORIZON_DAYS", defaults.slot_generation_horizon_days),
            max_generation_range_days: parse_or("MAX_GENERATION_RANGE_DAYS", defaults.max_generation_range_days),
            notification_webhook_url: non_empty("NOTIFICATION_WEBHOOK_URL"),
            calendar_sync_webhook_url: non_empty("CALENDAR_SYNC_WEBHOOK_URL"),
            server_port: parse_or("SERVER_PORT", defaults.server_port),
        };

        if config.store_backend == StoreBackend::Supabase && !config.is_configured() {
            warn!("Supabase store selected but not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && (!self.supabase_anon_key.is_empty() || !self.supabase_service_role_key.is_empty())
    }

    pub fn is_notification_configured(&self) -> bool {
        self.notification_webhook_url.is_some() || self.calendar_sync_webhook_url.is_some()
    }

    /// Key used for PostgREST calls; the service role wins when present.
    pub fn supabase_api_key(&self) -> &str {
        if self.supabase_service_role_key.is_empty() {
            &self.supabase_anon_key
        } else {
            &self.supabase_service_role_key
        }
    }
}

fn parse_or<T: std::str::FromStr + std::fmt::Display + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}
