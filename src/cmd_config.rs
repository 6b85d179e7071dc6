use std::path::Path;

use anyhow::{Result, bail};
use serde_json::Value;

use crate::ConfigAction;
use tfcrew::config::AppConfig;

pub fn run(action: &ConfigAction, config_path: &Path) -> Result<()> {
    match action {
        ConfigAction::Init => cmd_init(config_path),
        ConfigAction::Show => cmd_show(config_path),
        ConfigAction::Set { key, value } => cmd_set(config_path, key, value),
        ConfigAction::Path => {
            println!("{}", config_path.display());
            Ok(())
        }
    }
}

fn cmd_init(config_path: &Path) -> Result<()> {
    if config_path.exists() {
        bail!(
            "Config already exists at {}\nUse 'tfcrew config set' to modify",
            config_path.display()
        );
    }
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(
        config_path,
        serde_json::to_string_pretty(&AppConfig::default())?,
    )?;
    println!("Created {}", config_path.display());
    println!("Set your API key with 'tfcrew config set backend.api_key <KEY>'.");
    Ok(())
}

fn cmd_show(config_path: &Path) -> Result<()> {
    if !config_path.exists() {
        bail!(
            "No config at {}\nRun 'tfcrew config init' to create one",
            config_path.display()
        );
    }
    let content = std::fs::read_to_string(config_path)?;
    let json: Value = serde_json::from_str(&content)?;
    println!("{}", serde_json::to_string_pretty(&mask_secrets(&json))?);
    Ok(())
}

fn cmd_set(config_path: &Path, key: &str, value: &str) -> Result<()> {
    let mut json: Value = if config_path.exists() {
        serde_json::from_str(&std::fs::read_to_string(config_path)?)?
    } else {
        if let Some(p) = config_path.parent() {
            std::fs::create_dir_all(p)?;
        }
        serde_json::json!({ "version": 1 })
    };
    set_nested(&mut json, key, value)?;
    // Refuse to write something the loader would reject.
    serde_json::from_value::<AppConfig>(json.clone())
        .map_err(|e| anyhow::anyhow!("Invalid value for {key}: {e}"))?;
    std::fs::write(config_path, serde_json::to_string_pretty(&json)?)?;
    println!("Set {} = {}", key, mask_value(key, value));
    Ok(())
}

fn set_nested(json: &mut Value, key: &str, val: &str) -> Result<()> {
    let parts: Vec<&str> = key.split('.').filter(|p| !p.is_empty()).collect();
    let Some((last, parents)) = parts.split_last() else {
        bail!("Empty key");
    };
    let mut cur = json;
    for p in parents {
        if !cur.is_object() {
            *cur = serde_json::json!({});
        }
        cur = match cur {
            Value::Object(map) => map
                .entry(p.to_string())
                .or_insert_with(|| serde_json::json!({})),
            _ => bail!("Cannot descend into '{p}'"),
        };
    }
    if !cur.is_object() {
        *cur = serde_json::json!({});
    }
    if let Value::Object(map) = cur {
        map.insert(last.to_string(), typed_value(val));
    }
    Ok(())
}

fn typed_value(val: &str) -> Value {
    if val == "true" {
        Value::Bool(true)
    } else if val == "false" {
        Value::Bool(false)
    } else if let Ok(n) = val.parse::<u64>() {
        Value::Number(n.into())
    } else if let Some(n) = val.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
        Value::Number(n)
    } else if val.starts_with('[') {
        serde_json::from_str(val).unwrap_or_else(|_| Value::String(val.to_string()))
    } else {
        Value::String(val.to_string())
    }
}

fn mask_secrets(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut m = serde_json::Map::new();
            for (k, v) in map {
                match v {
                    Value::String(s) if is_secret_key(k) => {
                        m.insert(k.clone(), Value::String(mask_str(s)));
                    }
                    _ => {
                        m.insert(k.clone(), mask_secrets(v));
                    }
                }
            }
            Value::Object(m)
        }
        Value::Array(a) => Value::Array(a.iter().map(mask_secrets).collect()),
        other => other.clone(),
    }
}

fn is_secret_key(key: &str) -> bool {
    let u = key.to_uppercase();
    u.contains("KEY") || u.contains("SECRET") || u.contains("TOKEN")
}

fn mask_str(s: &str) -> String {
    if s.len() <= 8 || !s.is_ascii() {
        "***".to_string()
    } else {
        format!("{}...{}", &s[..4], &s[s.len() - 4..])
    }
}

fn mask_value(key: &str, value: &str) -> String {
    if is_secret_key(key) {
        mask_str(value)
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_creates_nested_sections() {
        let mut json = serde_json::json!({ "version": 1 });
        set_nested(&mut json, "orchestration.max_cycles", "3").unwrap();
        set_nested(&mut json, "backend.temperature", "0.2").unwrap();
        set_nested(&mut json, "orchestration.change_markers", r#"["revise","nope"]"#).unwrap();
        assert_eq!(json["orchestration"]["max_cycles"], 3);
        assert_eq!(json["backend"]["temperature"], 0.2);
        assert_eq!(json["orchestration"]["change_markers"][1], "nope");
        assert!(set_nested(&mut json, "", "x").is_err());

        let config: AppConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.orchestration.max_cycles, 3);
    }

    #[test]
    fn secrets_are_masked() {
        let json = serde_json::json!({
            "backend": { "api_key": "sk-ant-0123456789abcdef", "model": "m" }
        });
        let masked = mask_secrets(&json);
        assert_eq!(masked["backend"]["api_key"], "sk-a...cdef");
        assert_eq!(masked["backend"]["model"], "m");
        assert_eq!(mask_value("backend.api_key", "short"), "***");
    }

    #[test]
    fn init_then_set_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        cmd_init(&path).unwrap();
        assert!(cmd_init(&path).is_err());
        cmd_set(&path, "terraform.binary", "/usr/local/bin/terraform").unwrap();
        assert!(cmd_set(&path, "orchestration.selection", "random").is_err());
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.terraform.binary, "/usr/local/bin/terraform");
        assert_eq!(config.orchestration.max_cycles, 5);
    }
}
