use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{env_subst::substitute_env, schema::GatewayFileConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "rpcgate.toml",
    "rpcgate.yaml",
    "rpcgate.yml",
    "rpcgate.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<GatewayFileConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
        .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))
}

/// Load the config file named on the command line, or discover one.
///
/// Search order when no path is given:
/// 1. `./rpcgate.{toml,yaml,yml,json}`
/// 2. `~/.config/rpcgate/rpcgate.{toml,yaml,yml,json}`
///
/// Returns `GatewayFileConfig::default()` when nothing is found. A file
/// that exists but does not parse is an error: the file holds the RPC
/// credentials and silently falling back would start with the wrong ones.
pub fn discover_and_load(explicit: Option<&Path>) -> anyhow::Result<GatewayFileConfig> {
    if let Some(path) = explicit {
        debug!(path = %path.display(), "loading config");
        return load_config(path);
    }
    match find_config_file() {
        Some(path) => {
            debug!(path = %path.display(), "loading discovered config");
            load_config(&path)
        },
        None => {
            debug!("no config file found, using defaults");
            Ok(GatewayFileConfig::default())
        },
    }
}

fn find_config_file() -> Option<PathBuf> {
    let local = CONFIG_FILENAMES.iter().map(PathBuf::from);
    let global = config_dir()
        .into_iter()
        .flat_map(|dir| CONFIG_FILENAMES.iter().map(move |name| dir.join(name)));
    local.chain(global).find(|p| p.exists())
}

/// Returns `~/.config/rpcgate/` on all platforms.
pub fn config_dir() -> Option<PathBuf> {
    home_dir().map(|h| h.join(".config").join("rpcgate"))
}

/// Returns the data directory (`~/.rpcgate/`) holding the TLS identity.
pub fn data_dir() -> PathBuf {
    home_dir()
        .map(|h| h.join(".rpcgate"))
        .unwrap_or_else(|| PathBuf::from(".rpcgate"))
}

fn home_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<GatewayFileConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

#[cfg(test)]
mod tests {
    use {super::*, secrecy::ExposeSecret};

    #[test]
    fn loads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rpcgate.toml");
        std::fs::write(
            &path,
            "addr = \"0.0.0.0:0\"\nuser = \"u\"\npass = \"p\"\ncert_hosts = [\"dex.local\"]\n",
        )
        .unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.addr, "0.0.0.0:0");
        assert_eq!(cfg.user, "u");
        assert_eq!(cfg.pass.as_ref().unwrap().expose_secret(), "p");
        assert_eq!(cfg.cert_hosts, vec!["dex.local".to_string()]);
    }

    #[test]
    fn loads_yaml_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rpcgate.yaml");
        std::fs::write(&path, "user: operator\n").unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.user, "operator");
        assert_eq!(cfg.addr, crate::DEFAULT_ADDR);
        assert!(cfg.pass.is_none());
        assert!(cfg.cert_path().ends_with("rpc.cert"));
        assert!(cfg.key_path().ends_with("rpc.key"));
    }

    #[test]
    fn explicit_cert_paths_win() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rpcgate.json");
        std::fs::write(&path, r#"{"cert": "/tmp/a.cert", "key": "/tmp/a.key"}"#).unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.cert_path(), PathBuf::from("/tmp/a.cert"));
        assert_eq!(cfg.key_path(), PathBuf::from("/tmp/a.key"));
    }

    #[test]
    fn unsupported_extension_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rpcgate.ini");
        std::fs::write(&path, "user=u").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn broken_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rpcgate.toml");
        std::fs::write(&path, "addr = [").unwrap();
        assert!(discover_and_load(Some(&path)).is_err());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover_and_load(Some(&dir.path().join("nope.toml"))).is_err());
    }
}
