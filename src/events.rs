use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::warn;

/// Discriminator for the append-only event log (spec.md §4.12's minimum
/// event set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ServiceStart,
    TaskStart,
    TaskComplete,
    Escalation,
    Review,
    Attention,
    DecisionNeeded,
    DecisionReceived,
    ScopeDecision,
    ServiceComplete,
}

/// The compact status snapshot rewritten atomically on every transition
/// (spec.md §4.12).
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub prd: String,
    pub done: usize,
    pub total: usize,
    pub current: Option<String>,
    pub worker: Option<String>,
    pub elapsed: u64,
    pub attention: bool,
    pub reason: Option<String>,
}

/// Writes the event log and status snapshot. Failures to write to either
/// sink are logged and never propagate (spec.md §4.12, §7).
pub struct EventEmitter {
    events_path: Option<PathBuf>,
    status_path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl EventEmitter {
    pub fn new(events_path: Option<PathBuf>, status_path: Option<PathBuf>) -> Self {
        Self {
            events_path,
            status_path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None, None)
    }

    /// Appends one line-delimited JSON record with a monotonic timestamp and
    /// the given discriminator plus extra fields.
    pub fn emit(&self, kind: EventKind, fields: Value) {
        let Some(path) = &self.events_path else {
            return;
        };
        let _guard = self.write_lock.lock().expect("event log mutex poisoned");

        let mut record = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "event": kind,
        });
        if let (Value::Object(record_map), Value::Object(extra)) = (&mut record, fields) {
            record_map.extend(extra);
        }

        if let Err(e) = append_line(path, &record) {
            warn!(path = %path.display(), error = %e, "failed to append event, continuing");
        }
    }

    /// Atomically rewrites the status snapshot file.
    pub fn write_status(&self, snapshot: &StatusSnapshot) {
        let Some(path) = &self.status_path else {
            return;
        };
        if let Err(e) = write_status_atomic(path, snapshot) {
            warn!(path = %path.display(), error = %e, "failed to write status snapshot, continuing");
        }
    }

    pub fn service_start(&self, total: usize) {
        self.emit(EventKind::ServiceStart, json!({"total": total}));
    }

    pub fn task_start(&self, task_id: &str, tier: &str) {
        self.emit(EventKind::TaskStart, json!({"taskId": task_id, "tier": tier}));
    }

    pub fn task_complete(&self, task_id: &str) {
        self.emit(EventKind::TaskComplete, json!({"taskId": task_id}));
    }

    pub fn escalation(&self, task_id: &str, from: &str, to: &str, reason: &str) {
        self.emit(
            EventKind::Escalation,
            json!({"taskId": task_id, "from": from, "to": to, "reason": reason}),
        );
    }

    pub fn review(&self, task_id: &str, result: &str, reason: &str) {
        self.emit(EventKind::Review, json!({"taskId": task_id, "result": result, "reason": reason}));
    }

    pub fn attention(&self, reason: &str) {
        self.emit(EventKind::Attention, json!({"reason": reason}));
    }

    pub fn decision_needed(&self, decision_id: &str, task_id: &str, reason: &str) {
        self.emit(
            EventKind::DecisionNeeded,
            json!({"decisionId": decision_id, "taskId": task_id, "reason": reason}),
        );
    }

    pub fn decision_received(&self, decision_id: &str, action: &str) {
        self.emit(
            EventKind::DecisionReceived,
            json!({"decisionId": decision_id, "action": action}),
        );
    }

    pub fn scope_decision(&self, task_id: &str, question: &str, decision: &str) {
        self.emit(
            EventKind::ScopeDecision,
            json!({"taskId": task_id, "question": question, "decision": decision}),
        );
    }

    pub fn service_complete(&self, done: usize, total: usize) {
        self.emit(EventKind::ServiceComplete, json!({"done": done, "total": total}));
    }
}

fn append_line(path: &Path, record: &Value) -> std::io::Result<()> {
    use std::io::Write;
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", serde_json::to_string(record)?)
}

fn write_status_atomic(path: &Path, snapshot: &StatusSnapshot) -> std::io::Result<()> {
    use std::io::Write;
    let dir = path.parent().map(|p| p.to_path_buf()).unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&dir)?;
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(format!(".tmp-{}", std::process::id()));
    let tmp_path = dir.join(tmp_name);
    {
        let mut f = std::fs::File::create(&tmp_path)?;
        f.write_all(serde_json::to_string_pretty(snapshot)?.as_bytes())?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)
}

#[allow(dead_code)]
fn now_rfc3339() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_appends_line_delimited_json() {
        let dir = tempfile::tempdir().unwrap();
        let events_path = dir.path().join("events.jsonl");
        let emitter = EventEmitter::new(Some(events_path.clone()), None);
        emitter.service_start(3);
        emitter.task_start("a", "junior");

        let content = std::fs::read_to_string(&events_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "service_start");
        assert_eq!(first["total"], 3);
    }

    #[test]
    fn write_status_is_well_formed_json() {
        let dir = tempfile::tempdir().unwrap();
        let status_path = dir.path().join("status.json");
        let emitter = EventEmitter::new(None, Some(status_path.clone()));
        emitter.write_status(&StatusSnapshot {
            prd: "feature".to_string(),
            done: 1,
            total: 3,
            current: Some("b".to_string()),
            worker: Some("senior".to_string()),
            elapsed: 42,
            attention: false,
            reason: None,
        });
        let raw = std::fs::read_to_string(&status_path).unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["done"], 1);
        assert_eq!(value["total"], 3);
    }

    #[test]
    fn disabled_emitter_is_a_no_op() {
        let emitter = EventEmitter::disabled();
        emitter.service_start(0);
    }
}
