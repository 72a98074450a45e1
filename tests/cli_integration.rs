use assert_cmd::Command;
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

struct TestEnv {
    dir: TempDir,
}

impl TestEnv {
    fn new() -> Self {
        let dir = TempDir::new().expect("create tempdir");
        std::process::Command::new("git")
            .args(["init"])
            .current_dir(dir.path())
            .output()
            .expect("git init");
        Self { dir }
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("brigade").expect("binary");
        cmd.current_dir(self.dir.path());
        cmd
    }

    fn write_plan(&self, filename: &str, content: &str) -> PathBuf {
        let p = self.dir.path().join(filename);
        fs::write(&p, content).expect("write plan file");
        p
    }

    fn run_json(&self, args: &[&str]) -> Value {
        let mut a: Vec<&str> = args.to_vec();
        a.push("--json");
        let output = self.cmd().args(&a).output().expect("run");
        let stdout = String::from_utf8_lossy(&output.stdout);
        serde_json::from_str(&stdout)
            .unwrap_or_else(|e| panic!("parse JSON failed: {e}\nstdout: {stdout}"))
    }
}

fn simple_plan() -> &'static str {
    r#"{
        "featureName": "widgets",
        "branchName": "feat/widgets",
        "tasks": [
            {"id": "a", "title": "Add a feature flag", "complexity": "junior", "verification": ["true"]},
            {"id": "b", "title": "Wire the flag into the gateway", "complexity": "junior", "dependsOn": ["a"], "verification": ["true"]}
        ]
    }"#
}

#[test]
fn status_on_fresh_plan_reports_zero_done() {
    let env = TestEnv::new();
    let plan_path = env.write_plan("plan.json", simple_plan());

    let v = env.run_json(&["status", plan_path.to_str().unwrap()]);
    assert_eq!(v["data"]["total"], 2);
    assert_eq!(v["data"]["done"], 0);
    assert_eq!(v["data"]["currentTask"], Value::Null);
}

#[test]
fn dry_run_lists_tasks_in_topological_order() {
    let env = TestEnv::new();
    let plan_path = env.write_plan("plan.json", simple_plan());

    let v = env.run_json(&["run", plan_path.to_str().unwrap(), "--dry-run"]);
    let would_run = v["wouldRun"].as_array().expect("wouldRun array");
    assert_eq!(would_run, &[Value::String("a".into()), Value::String("b".into())]);
}

#[test]
fn dry_run_respects_only_filter() {
    let env = TestEnv::new();
    let plan_path = env.write_plan("plan.json", simple_plan());

    let v = env.run_json(&["run", plan_path.to_str().unwrap(), "--dry-run", "--only", "b"]);
    let would_run = v["wouldRun"].as_array().expect("wouldRun array");
    assert_eq!(would_run, &[Value::String("b".into())]);
}

#[test]
fn invalid_plan_reports_load_error() {
    let env = TestEnv::new();
    let plan_path = env.write_plan(
        "bad.json",
        r#"{"featureName":"f","branchName":"b","tasks":[
            {"id":"a","title":"A","complexity":"junior","dependsOn":["missing"]}
        ]}"#,
    );

    let v = env.run_json(&["status", plan_path.to_str().unwrap()]);
    assert_eq!(v["success"], false);
    assert_eq!(v["error"]["code"], "PLAN_LOAD");
}

#[test]
fn decide_writes_command_file() {
    let env = TestEnv::new();
    let command_path = env.dir.path().join("command.json");

    let mut cmd = env.cmd();
    cmd.args([
        "decide",
        command_path.to_str().unwrap(),
        "--decision",
        "01ARZ3NDEKTSV4RRFFQ69G5FAV",
        "--action",
        "skip",
        "--reason",
        "not worth the risk",
    ]);
    cmd.assert().success();

    let raw = fs::read_to_string(&command_path).expect("command file written");
    let value: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value["action"], "skip");
    assert_eq!(value["decision"], "01ARZ3NDEKTSV4RRFFQ69G5FAV");
}
