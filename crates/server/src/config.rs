use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub db_path: PathBuf,
    pub upload_dir: PathBuf,
    pub artifact_dir: PathBuf,
    pub analyzer_script: PathBuf,
    pub python_bin: String,
    pub analysis_timeout_ms: u64,
    pub store_write_timeout_ms: u64,
    pub max_upload_bytes: usize,
    pub jwt_secret: String,
    pub results_api_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for StartupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for StartupError {}

impl ServerConfig {
    pub fn load() -> Result<Self, StartupError> {
        let mut merged = HashMap::new();

        if let Ok(config_path) = std::env::var("SCANBAY_CONFIG_PATH") {
            let config_path = config_path.trim();
            if !config_path.is_empty() {
                let file_kv = parse_env_file(config_path)?;
                merged.extend(file_kv);
            }
        }

        merged.extend(std::env::vars());

        Self::from_kv(&merged)
    }

    pub fn from_kv(kv: &HashMap<String, String>) -> Result<Self, StartupError> {
        let bind_addr = match nonempty(kv, "SCANBAY_BIND_ADDR") {
            None => SocketAddr::from(([127, 0, 0, 1], 8080)),
            Some(raw) => raw.parse::<SocketAddr>().map_err(|_| StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "SCANBAY_BIND_ADDR must be a socket address".to_string(),
            })?,
        };

        let jwt_secret = require_nonempty(kv, "SCANBAY_JWT_SECRET")?;
        let results_api_key = require_nonempty(kv, "SCANBAY_RESULTS_API_KEY")?;

        let db_path = path_or(kv, "SCANBAY_DB_PATH", "data/scanbay.db");
        let upload_dir = path_or(kv, "SCANBAY_UPLOAD_DIR", "uploads");
        let artifact_dir = path_or(kv, "SCANBAY_ARTIFACT_DIR", "artifacts");
        let analyzer_script = path_or(kv, "SCANBAY_ANALYZER_SCRIPT", "scripts/analyze.py");

        let python_bin = nonempty(kv, "SCANBAY_PYTHON_BIN")
            .map(|s| s.to_string())
            .unwrap_or_else(|| {
                if cfg!(windows) {
                    "python".to_string()
                } else {
                    "python3".to_string()
                }
            });

        let analysis_timeout_ms = parse_u64(
            kv.get("SCANBAY_ANALYSIS_TIMEOUT_MS"),
            60_000,
            "SCANBAY_ANALYSIS_TIMEOUT_MS",
        )?;
        if analysis_timeout_ms == 0 {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "SCANBAY_ANALYSIS_TIMEOUT_MS must be positive".to_string(),
            });
        }

        let store_write_timeout_ms = parse_u64(
            kv.get("SCANBAY_STORE_WRITE_TIMEOUT_MS"),
            2_000,
            "SCANBAY_STORE_WRITE_TIMEOUT_MS",
        )?;
        if store_write_timeout_ms == 0 {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "SCANBAY_STORE_WRITE_TIMEOUT_MS must be positive".to_string(),
            });
        }

        let max_upload_bytes = parse_u64(
            kv.get("SCANBAY_MAX_UPLOAD_BYTES"),
            16 * 1024 * 1024,
            "SCANBAY_MAX_UPLOAD_BYTES",
        )?;
        if max_upload_bytes == 0 {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "SCANBAY_MAX_UPLOAD_BYTES must be positive".to_string(),
            });
        }

        Ok(Self {
            bind_addr,
            db_path,
            upload_dir,
            artifact_dir,
            analyzer_script,
            python_bin,
            analysis_timeout_ms,
            store_write_timeout_ms,
            max_upload_bytes: max_upload_bytes as usize,
            jwt_secret,
            results_api_key,
        })
    }
}

fn parse_env_file(path: &str) -> Result<HashMap<String, String>, StartupError> {
    let contents = std::fs::read_to_string(path).map_err(|_| StartupError {
        code: "ERR_INVALID_CONFIG",
        message: format!("failed to read config file at {}", path),
    })?;

    let mut kv = HashMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: format!("config file line is not KEY=VALUE: {}", line),
            });
        };
        kv.insert(key.trim().to_string(), value.trim().to_string());
    }

    Ok(kv)
}

fn nonempty<'a>(kv: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    kv.get(key).map(|s| s.trim()).filter(|s| !s.is_empty())
}

fn require_nonempty(kv: &HashMap<String, String>, key: &'static str) -> Result<String, StartupError> {
    nonempty(kv, key)
        .map(|s| s.to_string())
        .ok_or_else(|| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be set and non-empty", key),
        })
}

fn path_or(kv: &HashMap<String, String>, key: &str, default: &str) -> PathBuf {
    nonempty(kv, key)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}

fn parse_u64(
    value: Option<&String>,
    default: u64,
    key: &'static str,
) -> Result<u64, StartupError> {
    match value.map(|s| s.trim()).filter(|s| !s.is_empty()) {
        None => Ok(default),
        Some(v) => v.parse::<u64>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be a non-negative integer", key),
        }),
    }
}
