use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, ErrorKind};
use std::path::PathBuf;

const CONFIG_FILE: &str = ".tallyrc";

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl Config {
    /// Get the path to the config file (~/.tallyrc)
    pub fn path() -> io::Result<PathBuf> {
        dirs::home_dir()
            .map(|h| h.join(CONFIG_FILE))
            .ok_or_else(|| io::Error::new(ErrorKind::NotFound, "Could not find home directory"))
    }

    /// Load config from ~/.tallyrc
    pub fn load() -> io::Result<Self> {
        let path = Self::path()?;
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> io::Result<Self> {
        toml::from_str(content)
            .map_err(|e| io::Error::new(ErrorKind::InvalidData, e.to_string()))
    }

    /// Save config to ~/.tallyrc
    pub fn save(&self) -> io::Result<()> {
        let path = Self::path()?;
        let content = toml::to_string_pretty(self)
            .map_err(|e| io::Error::new(ErrorKind::InvalidData, e.to_string()))?;

        // Set restrictive permissions on the file (600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            let mut opts = fs::OpenOptions::new();
            opts.write(true).create(true).truncate(true).mode(0o600);
            use std::io::Write;
            let mut file = opts.open(&path)?;
            file.write_all(content.as_bytes())?;
            return Ok(());
        }

        #[cfg(not(unix))]
        {
            fs::write(&path, content)
        }
    }

    /// Resolve the replica address; `TALLY_HOST`/`TALLY_PORT` win over the file
    pub fn resolve(&self, env_host: Option<String>, env_port: Option<String>) -> Result<(String, u16), String> {
        let host = env_host
            .or_else(|| self.host.clone())
            .unwrap_or_else(|| DEFAULT_HOST.to_string());

        let port = match env_port {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|e| format!("Invalid port number '{}': {}", raw, e))?,
            None => self.port.unwrap_or(DEFAULT_PORT),
        };

        Ok((host, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let config = Config::parse("host = \"10.0.0.2\"\nport = 8082\n").unwrap();
        assert_eq!(config.host.as_deref(), Some("10.0.0.2"));
        assert_eq!(config.port, Some(8082));

        assert_eq!(Config::parse("").unwrap(), Config::default());
        assert!(Config::parse("port = \"eighty\"").is_err());
    }

    #[test]
    fn test_resolve_precedence() {
        let config = Config { host: Some("file-host".to_string()), port: Some(9000) };

        assert_eq!(config.resolve(None, None).unwrap(), ("file-host".to_string(), 9000));
        assert_eq!(
            config.resolve(Some("env-host".to_string()), Some("9001".to_string())).unwrap(),
            ("env-host".to_string(), 9001)
        );
        assert_eq!(
            Config::default().resolve(None, None).unwrap(),
            (DEFAULT_HOST.to_string(), DEFAULT_PORT)
        );
        assert!(config.resolve(None, Some("x".to_string())).is_err());
    }
}
