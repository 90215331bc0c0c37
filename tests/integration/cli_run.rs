//! Integration tests for the CLI run and config commands

use genflow::cli::{Cli, Commands, RunContext};
use genflow::config::GenflowConfig;
use clap::Parser;
use tempfile::TempDir;

const REQUESTS: &str = r#"[
    {
        "id": "tagline",
        "model": "echo-1",
        "prompt": { "kind": "inline", "prompt": "Say hi to {{who}}" },
        "variables": { "who": "Ada" },
        "params": { "type": "text", "stream": true },
        "priority": 4
    },
    {
        "id": "bad",
        "model": "",
        "prompt": { "kind": "inline", "prompt": "nothing" },
        "params": { "type": "text" }
    }
]"#;

#[test]
fn test_run_command_json_output() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("requests.json");
    std::fs::write(&path, REQUESTS).unwrap();
    let path_str = path.to_string_lossy().to_string();

    let cli = Cli::try_parse_from(["genflow", "run", path_str.as_str(), "--format", "json"]).unwrap();
    let context = RunContext::from_config(GenflowConfig::default());
    let output = context.execute(&cli.command).unwrap();

    let value: serde_json::Value = serde_json::from_str(&output).unwrap();
    let units = value["units"].as_array().unwrap();
    assert_eq!(units.len(), 2);
    assert_eq!(units[0]["status"], "completed");
    assert_eq!(units[0]["result"]["content"], "Say hi to Ada");
    assert_eq!(units[1]["status"], "failed");
    assert_eq!(value["stats"]["total_completed"], 1);
    assert_eq!(value["stats"]["total_failed"], 1);
}

#[test]
fn test_run_command_text_output() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("requests.json");
    std::fs::write(&path, REQUESTS).unwrap();

    let command = Commands::Run {
        requests: path,
        format: "text".to_string(),
        max_concurrent: Some(1),
        timeout_secs: 30,
        history: None,
    };
    let output = RunContext::from_config(GenflowConfig::default())
        .execute(&command)
        .unwrap();
    assert!(output.contains("tagline"));
    assert!(output.contains("completed"));
    assert!(output.contains("failed"));
}

#[test]
fn test_missing_request_file() {
    let temp_dir = TempDir::new().unwrap();
    let command = Commands::Run {
        requests: temp_dir.path().join("missing.json"),
        format: "text".to_string(),
        max_concurrent: None,
        timeout_secs: 5,
        history: None,
    };
    assert!(RunContext::from_config(GenflowConfig::default())
        .execute(&command)
        .is_err());
}

#[test]
fn test_config_command_renders_toml() {
    let command = Commands::Config {
        format: "toml".to_string(),
    };
    let output = RunContext::from_config(GenflowConfig::default())
        .execute(&command)
        .unwrap();
    assert!(output.contains("[queue]"));
    assert!(output.contains("max_polls = 120"));
}
