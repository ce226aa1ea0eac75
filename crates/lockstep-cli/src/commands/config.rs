use super::{json_pretty, EXIT_SUCCESS};
use lockstep_core::{CoreError, Engine};
use lockstep_schema::ConfigKey;
use std::path::Path;

#[derive(Debug)]
pub enum Action {
    Set { key: String, value: String },
    Remove { key: String },
}

fn parse_key(key: &str) -> Result<ConfigKey, String> {
    key.parse::<ConfigKey>()
        .map_err(|e| CoreError::from(e).to_string())
}

pub fn run(manifest: &Path, action: Action, json: bool) -> Result<u8, String> {
    let (key, status) = match action {
        Action::Set { key, value } => {
            let key = parse_key(&key)?;
            Engine::set_config(manifest, key, &value).map_err(|e| e.to_string())?;
            (key, "set")
        }
        Action::Remove { key } => {
            let key = parse_key(&key)?;
            let removed = Engine::remove_config(manifest, key).map_err(|e| e.to_string())?;
            (key, if removed { "removed" } else { "unset" })
        }
    };
    if json {
        let payload = serde_json::json!({ "status": status, "key": key.as_str() });
        println!("{}", json_pretty(&payload)?);
    } else if status == "unset" {
        println!("{key} was not set");
    } else {
        println!("{status} {key}");
    }
    Ok(EXIT_SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_key_is_a_manifest_error() {
        let err = parse_key("env.colour").unwrap_err();
        assert!(err.starts_with("manifest error:"), "{err}");
        assert_eq!(parse_key("solver").unwrap(), ConfigKey::Solver);
    }
}
