use fraudsim_core::config::TrackingConfig;
use fraudsim_core::{
    Database, FallbackCache, Participant, SessionHandle, SessionInit, SessionManager,
};
use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use std::sync::Arc;
use tempfile::TempDir;

const OPERATOR: &str = "ops@example.com";

struct CliTestEnv {
    _temp_dir: TempDir,
    home: PathBuf,
    xdg_data: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_data = base.join("xdg-data");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");

        fs::create_dir_all(&home).expect("failed to create HOME");
        fs::create_dir_all(&xdg_data).expect("failed to create XDG_DATA_HOME");
        fs::create_dir_all(xdg_config.join("fraudsim")).expect("failed to create XDG_CONFIG_HOME");
        fs::create_dir_all(&xdg_state).expect("failed to create XDG_STATE_HOME");

        fs::write(
            xdg_config.join("fraudsim/config.toml"),
            format!("[tracking]\noperator_emails = [\"{OPERATOR}\"]\n"),
        )
        .expect("failed to write config");

        Self {
            _temp_dir: temp_dir,
            home,
            xdg_data,
            xdg_config,
            xdg_state,
        }
    }

    fn manager(&self) -> SessionManager {
        let data_dir = self.xdg_data.join("fraudsim");
        let db = Database::open(&data_dir.join("data.db")).expect("failed to open db");
        db.migrate().expect("failed to migrate db");
        let cache =
            FallbackCache::open(&data_dir.join("fallback.json")).expect("failed to open cache");
        SessionManager::new(Arc::new(db), Arc::new(cache), TrackingConfig::default())
    }
}

/// One participant session with captured data and one operator session.
fn seed(env: &CliTestEnv) -> (String, String) {
    let manager = env.manager();

    let guest = manager.initialize(
        None,
        &SessionInit {
            entry_point: "/flights".to_string(),
            ..Default::default()
        },
    );
    let handle = SessionHandle::from(&guest);
    manager.advance(&handle, 3, 6);
    for (name, value) in [("email", "ada@example.com"), ("card_number", "4111")] {
        manager.record_capture(&fraudsim_core::CapturedField {
            id: format!("{}-{}", guest.id, name),
            session_id: guest.id.clone(),
            step: 3,
            field_name: name.to_string(),
            field_value: value.to_string(),
            is_sensitive: name == "card_number",
            captured_at: fraudsim_core::timestamp_now(),
        });
    }

    let admin = manager.initialize(
        None,
        &SessionInit {
            participant: Some(Participant {
                email: Some("admin.ops@example.com".to_string()),
                ..Default::default()
            }),
            entry_point: "/admin".to_string(),
            ..Default::default()
        },
    );

    (guest.id, admin.id)
}

fn run_bin(env: &CliTestEnv, args: &[&str]) -> Output {
    let bin_path = PathBuf::from(assert_cmd::cargo::cargo_bin!("fraudsim"));

    Command::new(bin_path)
        .args(args)
        .env("HOME", &env.home)
        .env("XDG_DATA_HOME", &env.xdg_data)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state)
        .env_remove("FRAUDSIM_ACTOR")
        .output()
        .unwrap_or_else(|e| panic!("failed to execute fraudsim: {e}"))
}

fn assert_success(args: &[&str], output: &Output) {
    if output.status.success() {
        return;
    }

    let rendered_args = args
        .iter()
        .map(|arg| OsString::from(arg).to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    panic!(
        "fraudsim {rendered_args} failed\nstatus: {}\nstdout:\n{}\nstderr:\n{}",
        output.status, stdout, stderr
    );
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn sessions_hides_operator_sessions_unless_all() {
    let env = CliTestEnv::new();
    let (guest, admin) = seed(&env);

    let args = ["sessions", "--json"];
    let output = run_bin(&env, &args);
    assert_success(&args, &output);
    let views: serde_json::Value =
        serde_json::from_str(&stdout(&output)).expect("sessions --json should print JSON");
    let ids: Vec<&str> = views
        .as_array()
        .expect("expected a JSON array")
        .iter()
        .filter_map(|v| v["session"]["id"].as_str())
        .collect();
    assert_eq!(ids, vec![guest.as_str()]);

    let args = ["sessions", "--all", "--json"];
    let output = run_bin(&env, &args);
    assert_success(&args, &output);
    let text = stdout(&output);
    assert!(text.contains(&guest));
    assert!(text.contains(&admin));
}

#[test]
fn interventions_require_an_operator() {
    let env = CliTestEnv::new();
    let (guest, _) = seed(&env);

    let output = run_bin(&env, &["nudge", &guest]);
    assert!(!output.status.success(), "nudge without --actor should fail");

    let output = run_bin(&env, &["--actor", "ada@example.com", "nudge", &guest]);
    assert!(!output.status.success(), "non-operator actor should be rejected");

    let args = ["--actor", OPERATOR, "nudge", guest.as_str()];
    let output = run_bin(&env, &args);
    assert_success(&args, &output);
    assert!(stdout(&output).contains("Queued nudge"));

    let args = ["activity"];
    let output = run_bin(&env, &args);
    assert_success(&args, &output);
    let text = stdout(&output);
    assert!(text.contains("nudge"));
    assert!(text.contains(OPERATOR));
}

#[test]
fn unknown_session_is_reported() {
    let env = CliTestEnv::new();
    seed(&env);

    let output = run_bin(&env, &["--actor", OPERATOR, "analyze", "no-such-session"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("session not found"),
        "expected the store error in stderr, got:\n{stderr}"
    );
}

#[test]
fn analyze_and_alerts_round_trip() {
    let env = CliTestEnv::new();
    let (guest, _) = seed(&env);

    let args = ["--actor", OPERATOR, "analyze", guest.as_str()];
    let output = run_bin(&env, &args);
    assert_success(&args, &output);
    let text = stdout(&output);
    assert!(text.contains("Risk level:       high (75)"), "got:\n{text}");
    assert!(text.contains("Time to exposure: minutes"));

    let args = ["--actor", OPERATOR, "check-alerts", guest.as_str()];
    let output = run_bin(&env, &args);
    assert_success(&args, &output);
    assert!(stdout(&output).contains("[high]"));

    let args = ["alerts"];
    let output = run_bin(&env, &args);
    assert_success(&args, &output);
    let alert_id = stdout(&output)
        .split_whitespace()
        .next()
        .expect("expected an alert line")
        .to_string();

    for _ in 0..2 {
        let args = ["--actor", OPERATOR, "resolve", alert_id.as_str()];
        let output = run_bin(&env, &args);
        assert_success(&args, &output);
        assert!(stdout(&output).contains(&format!("resolved by {OPERATOR}")));
    }

    let output = run_bin(&env, &["alerts"]);
    assert!(stdout(&output).contains("No open alerts."));
}

#[test]
fn forced_sweep_deactivates_everything() {
    let env = CliTestEnv::new();
    seed(&env);

    let args = ["--actor", OPERATOR, "sweep"];
    let output = run_bin(&env, &args);
    assert_success(&args, &output);
    assert!(stdout(&output).contains("Deactivated 0 session(s)"));

    let args = ["--actor", OPERATOR, "sweep", "--force"];
    let output = run_bin(&env, &args);
    assert_success(&args, &output);
    assert!(stdout(&output).contains("Deactivated 2 session(s)"));

    let output = run_bin(&env, &["sessions", "--all"]);
    assert!(stdout(&output).contains("No live sessions."));
}

#[test]
fn detail_shows_captured_fields() {
    let env = CliTestEnv::new();
    let (guest, _) = seed(&env);

    let args = ["detail", guest.as_str()];
    let output = run_bin(&env, &args);
    assert_success(&args, &output);
    let text = stdout(&output);
    assert!(text.contains("Progress:  3/6 (50%)"), "got:\n{text}");
    assert!(text.contains("ada@example.com"));
    assert!(text.contains("[sensitive]"));
    assert!(!text.contains("4111"));
}
