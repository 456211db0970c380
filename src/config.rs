use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub data_dir: PathBuf,
    pub cobalt_api_url: String,
    pub internal_secret: String,
    pub transcribe_api_url: Option<String>,
    pub trust_proxy_headers: bool,
    pub allowed_origins: Vec<String>,
}

const DEFAULT_COBALT_API_URL: &str = "https://api.cobalt.tools";

impl Config {
    pub fn from_env() -> Self {
        let data_dir = read_env("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("data"));

        Self {
            bind_addr: resolve_bind_addr(),
            data_dir,
            cobalt_api_url: read_env("COBALT_API_URL")
                .unwrap_or_else(|| DEFAULT_COBALT_API_URL.to_string()),
            internal_secret: read_env("INTERNAL_SECRET")
                .unwrap_or_else(|| "dev-secret".to_string()),
            transcribe_api_url: read_env("TRANSCRIBE_API_URL"),
            trust_proxy_headers: read_bool_env("TRUST_PROXY_HEADERS").unwrap_or(false),
            allowed_origins: read_env("ALLOWED_ORIGINS")
                .map(|value| {
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|origin| !origin.is_empty())
                        .map(ToString::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .and_then(|value| non_empty(&value).map(ToString::to_string))
}

fn read_bool_env(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn resolve_bind_addr() -> String {
    if let Some(configured) = read_env("APP_ADDR") {
        return configured;
    }

    if let Some(port) = std::env::var("PORT")
        .ok()
        .and_then(|value| value.trim().parse::<u16>().ok())
    {
        return format!("0.0.0.0:{port}");
    }

    "127.0.0.1:8787".to_string()
}

pub fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() { None } else { Some(trimmed) }
}
