//! Integration tests for stageforge
//!
//! These tests drive the binary end to end against temporary project
//! directories. Generation tests point the client at a local stub endpoint.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use tempfile::TempDir;

const API_KEY_ENV: &str = "DEEPSEEK_API_KEY";

/// Helper to create a stageforge Command with a clean environment
fn stageforge() -> Command {
    let mut cmd = cargo_bin_cmd!("stageforge");
    cmd.env(API_KEY_ENV, "sk-integration-test")
        .env_remove("STAGEFORGE_MODEL")
        .env_remove("STAGEFORGE_BASE_URL")
        .env_remove("STAGEFORGE_API_KEY_ENV")
        .env_remove("STAGEFORGE_LOG");
    cmd
}

/// Helper to create a temporary project directory
fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

/// Helper to initialize stageforge in a temp directory
fn init_stageforge_project(dir: &TempDir) {
    stageforge()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();
}

/// Serve `requests` chat completions that all answer with `content`.
/// Returns the base URL to put in `[llm] base_url`.
fn spawn_stub_endpoint(content: &str, requests: usize) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let body = serde_json::json!({
        "choices": [{
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }],
        "usage": { "total_tokens": 42 }
    })
    .to_string();

    std::thread::spawn(move || {
        for stream in listener.incoming().take(requests) {
            let Ok(mut stream) = stream else { continue };
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap_or(0) == 0 {
                    break;
                }
                let lower = line.to_ascii_lowercase();
                if let Some(value) = lower.strip_prefix("content-length:") {
                    content_length = value.trim().parse().unwrap_or(0);
                }
                if line == "\r\n" {
                    break;
                }
            }
            let mut request_body = vec![0u8; content_length];
            reader.read_exact(&mut request_body).ok();

            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).ok();
            stream.flush().ok();
        }
    });

    format!("http://{}/v1", addr)
}

fn write_config(dir: &TempDir, base_url: &str) {
    let config = format!(
        r#"
[llm]
base_url = "{}"
timeout_secs = 10

[generation]
max_rounds = 2
critique = false
inter_artifact_delay_ms = 0
"#,
        base_url
    );
    fs::write(dir.path().join(".stageforge/stageforge.toml"), config).unwrap();
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_stageforge_help() {
        stageforge()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("generate"));
    }

    #[test]
    fn test_stageforge_version() {
        stageforge().arg("--version").assert().success();
    }

    #[test]
    fn test_init_creates_structure() {
        let dir = create_temp_project();

        stageforge()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("Initialized stageforge project"));

        let state = dir.path().join(".stageforge");
        assert!(state.join("stageforge.toml").is_file());
        assert!(state.join("catalog.toml").is_file());
        assert!(state.join("templates/prd.md").is_file());
        assert!(state.join("projects").is_dir());
        assert!(state.join("logs").is_dir());
    }

    #[test]
    fn test_init_idempotent() {
        let dir = create_temp_project();
        init_stageforge_project(&dir);

        stageforge()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("already initialized"));
    }

    #[test]
    fn test_project_dir_flag() {
        let dir = create_temp_project();

        stageforge()
            .arg("--project-dir")
            .arg(dir.path())
            .arg("init")
            .assert()
            .success();

        assert!(dir.path().join(".stageforge/catalog.toml").exists());
    }
}

// =============================================================================
// Configuration and Catalog Tests
// =============================================================================

mod configuration {
    use super::*;

    #[test]
    fn test_config_show_defaults_without_init() {
        let dir = create_temp_project();

        stageforge()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Using default configuration"))
            .stdout(predicate::str::contains("deepseek-chat"));
    }

    #[test]
    fn test_config_show_reads_file() {
        let dir = create_temp_project();
        init_stageforge_project(&dir);

        stageforge()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Config file:"))
            .stdout(predicate::str::contains("[generation]"));
    }

    #[test]
    fn test_config_validate_no_config() {
        let dir = create_temp_project();

        stageforge()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Using defaults (valid)"));
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = create_temp_project();
        init_stageforge_project(&dir);
        fs::write(
            dir.path().join(".stageforge/stageforge.toml"),
            "[llm]\nmodel = \"\"\n",
        )
        .unwrap();

        stageforge()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("model is empty"));
    }

    #[test]
    fn test_catalog_validate_default() {
        let dir = create_temp_project();
        init_stageforge_project(&dir);

        stageforge()
            .current_dir(dir.path())
            .args(["catalog", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Catalog is valid"));
    }

    #[test]
    fn test_catalog_validate_rejects_cycle() {
        let dir = create_temp_project();
        init_stageforge_project(&dir);
        let catalog = r#"
[[stages]]
id = "s"
name = "S"
outputs = ["a", "b"]

[artifacts.a]
name = "A"
depends_on = ["b"]

[artifacts.b]
name = "B"
depends_on = ["a"]
"#;
        fs::write(dir.path().join(".stageforge/catalog.toml"), catalog).unwrap();

        stageforge()
            .current_dir(dir.path())
            .args(["catalog", "validate"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("Cycle"));
    }

    #[test]
    fn test_catalog_show_lists_stages() {
        let dir = create_temp_project();

        stageforge()
            .current_dir(dir.path())
            .args(["catalog", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("built-in default"))
            .stdout(predicate::str::contains("requirement"));
    }
}

// =============================================================================
// Generation Tests
// =============================================================================

mod generation {
    use super::*;

    #[test]
    fn test_generate_unknown_stage_fails_validation() {
        let dir = create_temp_project();
        init_stageforge_project(&dir);

        stageforge()
            .current_dir(dir.path())
            .args([
                "generate", "--project", "p1", "--stage", "nowhere", "--types", "prd",
            ])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Stage nowhere is not defined"));
    }

    #[test]
    fn test_generate_type_outside_stage_fails_validation() {
        let dir = create_temp_project();
        init_stageforge_project(&dir);

        stageforge()
            .current_dir(dir.path())
            .args([
                "generate",
                "--project",
                "p1",
                "--stage",
                "requirement",
                "--types",
                "prototype",
            ])
            .assert()
            .failure()
            .stderr(predicate::str::contains("are outputs of stage requirement"));
    }

    #[test]
    fn test_generate_rejects_malformed_context() {
        let dir = create_temp_project();
        init_stageforge_project(&dir);

        stageforge()
            .current_dir(dir.path())
            .args([
                "generate",
                "--project",
                "p1",
                "--stage",
                "requirement",
                "--types",
                "prd",
                "--context",
                "CONVERSATION",
            ])
            .assert()
            .failure()
            .stderr(predicate::str::contains("expects KEY=VALUE"));
    }

    #[test]
    fn test_generate_without_api_key_fails() {
        let dir = create_temp_project();
        init_stageforge_project(&dir);

        stageforge()
            .current_dir(dir.path())
            .env_remove(API_KEY_ENV)
            .args([
                "generate", "--project", "p1", "--stage", "requirement", "--types", "prd",
            ])
            .assert()
            .failure()
            .stderr(predicate::str::contains(API_KEY_ENV));
    }

    #[test]
    fn test_missing_dependency_blocks_run() {
        let dir = create_temp_project();
        init_stageforge_project(&dir);

        stageforge()
            .current_dir(dir.path())
            .args([
                "generate",
                "--project",
                "p1",
                "--stage",
                "strategy",
                "--types",
                "strategy-doc",
            ])
            .assert()
            .failure()
            .stderr(predicate::str::contains("missing dependency inputs: prd"));

        stageforge()
            .current_dir(dir.path())
            .args(["runs", "--project", "p1", "--status", "blocked"])
            .assert()
            .success()
            .stdout(predicate::str::contains("blocked"))
            .stdout(predicate::str::contains("DEPENDENCY_MISSING"));
    }

    #[test]
    fn test_generate_against_stub_endpoint() {
        let dir = create_temp_project();
        init_stageforge_project(&dir);
        let base_url = spawn_stub_endpoint(
            "# PRD\n\n## Background\nA habit tracker for teams.\n<<END_OF_PRD>>",
            4,
        );
        write_config(&dir, &base_url);

        stageforge()
            .current_dir(dir.path())
            .args([
                "generate",
                "--project",
                "p1",
                "--stage",
                "requirement",
                "--types",
                "prd",
                "--context",
                "CONVERSATION=Build a habit tracker for small teams",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("Generated 1 artifact(s)"));

        let artifacts_dir = dir.path().join(".stageforge/projects/p1/artifacts/requirement");
        let files: Vec<_> = fs::read_dir(&artifacts_dir).unwrap().collect();
        assert_eq!(files.len(), 1);
        let body = fs::read_to_string(files[0].as_ref().unwrap().path()).unwrap();
        assert!(body.contains("A habit tracker for teams."));
        assert!(!body.contains("<<END_OF_PRD>>"));

        stageforge()
            .current_dir(dir.path())
            .args(["runs", "--project", "p1", "--json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"status\": \"succeeded\""));

        stageforge()
            .current_dir(dir.path())
            .args(["project", "show", "p1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Indexed artifacts: 1"));
    }
}

// =============================================================================
// Ledger and Project Tests
// =============================================================================

mod ledger {
    use super::*;

    #[test]
    fn test_runs_empty_project() {
        let dir = create_temp_project();
        init_stageforge_project(&dir);

        stageforge()
            .current_dir(dir.path())
            .args(["runs", "--project", "p1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No runs recorded for project p1"));
    }

    #[test]
    fn test_runs_rejects_unknown_status() {
        let dir = create_temp_project();
        init_stageforge_project(&dir);

        stageforge()
            .current_dir(dir.path())
            .args(["runs", "--project", "p1", "--status", "done"])
            .assert()
            .failure();
    }

    #[test]
    fn test_session_unknown_run() {
        let dir = create_temp_project();
        init_stageforge_project(&dir);

        stageforge()
            .current_dir(dir.path())
            .args(["session", "wfr-missing"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("No run or chunk session found"));
    }

    #[test]
    fn test_project_create_and_outputs() {
        let dir = create_temp_project();
        init_stageforge_project(&dir);

        stageforge()
            .current_dir(dir.path())
            .args(["project", "create", "p1", "--name", "Habit Tracker"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created project"));

        stageforge()
            .current_dir(dir.path())
            .args(["project", "outputs", "p1", "requirement", "prd,feature-list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("prd, feature-list"));

        stageforge()
            .current_dir(dir.path())
            .args(["project", "show", "p1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Habit Tracker"))
            .stdout(predicate::str::contains("outputs = prd, feature-list"));

        // user-story is a catalog output but no longer one of this project's
        stageforge()
            .current_dir(dir.path())
            .args([
                "generate",
                "--project",
                "p1",
                "--stage",
                "requirement",
                "--types",
                "user-story",
            ])
            .assert()
            .failure()
            .stderr(predicate::str::contains("are outputs of stage requirement"));
    }
}
