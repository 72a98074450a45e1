use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::BrigadeError;
use crate::graph::cycle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Junior,
    Senior,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Junior,
    Senior,
    Executive,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Junior => "junior",
            Self::Senior => "senior",
            Self::Executive => "executive",
        }
    }

    /// The tier one promotion above this one, or `None` at the ceiling.
    pub fn next(&self) -> Option<Tier> {
        match self {
            Self::Junior => Some(Self::Senior),
            Self::Senior => Some(Self::Executive),
            Self::Executive => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationKind {
    Pattern,
    Unit,
    Integration,
    Smoke,
}

/// Either a bare shell command or a typed `{type, cmd}` pair (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationSpec {
    pub kind: Option<VerificationKind>,
    pub cmd: String,
}

impl VerificationSpec {
    pub fn is_pattern_only(&self) -> bool {
        matches!(self.kind, Some(VerificationKind::Pattern))
    }
}

impl Serialize for VerificationSpec {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        match &self.kind {
            None => serializer.serialize_str(&self.cmd),
            Some(kind) => {
                let mut map = serializer.serialize_map(Some(2))?;
                let type_str = match kind {
                    VerificationKind::Pattern => "pattern",
                    VerificationKind::Unit => "unit",
                    VerificationKind::Integration => "integration",
                    VerificationKind::Smoke => "smoke",
                };
                map.serialize_entry("type", type_str)?;
                map.serialize_entry("cmd", &self.cmd)?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for VerificationSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bare(String),
            Typed { r#type: String, cmd: String },
        }

        let raw = Raw::deserialize(deserializer)?;
        Ok(match raw {
            Raw::Bare(cmd) => VerificationSpec { kind: None, cmd },
            Raw::Typed { r#type, cmd } => {
                let kind = match r#type.as_str() {
                    "pattern" => VerificationKind::Pattern,
                    "unit" => VerificationKind::Unit,
                    "integration" => VerificationKind::Integration,
                    "smoke" => VerificationKind::Smoke,
                    other => {
                        return Err(serde::de::Error::custom(format!(
                            "unknown verification type: {other}"
                        )))
                    }
                };
                VerificationSpec {
                    kind: Some(kind),
                    cmd,
                }
            }
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default, rename = "acceptanceCriteria")]
    pub acceptance_criteria: Vec<String>,
    #[serde(default, rename = "dependsOn")]
    pub depends_on: Vec<String>,
    pub complexity: Complexity,
    #[serde(default)]
    pub passes: bool,
    #[serde(default)]
    pub verification: Vec<VerificationSpec>,
    #[serde(default, rename = "manualVerification")]
    pub manual_verification: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    #[serde(rename = "featureName")]
    pub feature_name: String,
    #[serde(rename = "branchName")]
    pub branch_name: String,
    #[serde(default)]
    pub walkaway: bool,
    #[serde(default)]
    pub constraints: Vec<String>,
    pub tasks: Vec<Task>,
}

impl Plan {
    /// Parse and validate a plan document, enumerating every violation
    /// found (duplicate ids, dangling `dependsOn` references, cycles)
    /// rather than failing on the first one (spec.md §4.1).
    pub fn load_str(raw: &str) -> Result<Plan, BrigadeError> {
        let plan: Plan = serde_json::from_str(raw)
            .map_err(|e| BrigadeError::plan_load(&[format!("invalid JSON: {e}")]))?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn load_file(path: &std::path::Path) -> Result<Plan, BrigadeError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| BrigadeError::plan_load(&[format!("cannot read {}: {e}", path.display())]))?;
        Self::load_str(&raw)
    }

    fn validate(&self) -> Result<(), BrigadeError> {
        let mut violations = Vec::new();

        let mut seen = HashSet::new();
        for t in &self.tasks {
            if !seen.insert(t.id.clone()) {
                violations.push(format!("duplicate task id: {}", t.id));
            }
        }

        let ids: HashSet<&str> = self.tasks.iter().map(|t| t.id.as_str()).collect();
        for t in &self.tasks {
            for dep in &t.depends_on {
                if !ids.contains(dep.as_str()) {
                    violations.push(format!("task {} depends on unknown task {dep}", t.id));
                }
            }
        }

        if violations.is_empty() {
            let nodes: Vec<String> = self.tasks.iter().map(|t| t.id.clone()).collect();
            let edges: Vec<(String, String)> = self
                .tasks
                .iter()
                .flat_map(|t| t.depends_on.iter().map(move |d| (t.id.clone(), d.clone())))
                .collect();
            if let Err(e) = cycle::detect_cycle(&nodes, &edges) {
                violations.push(e.message);
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(BrigadeError::plan_load(&violations))
        }
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// All dependencies of `id` are marked `passes=true`.
    pub fn dependencies_satisfied(&self, id: &str) -> bool {
        match self.task(id) {
            None => false,
            Some(t) => t
                .depends_on
                .iter()
                .all(|dep| self.task(dep).map(|d| d.passes).unwrap_or(false)),
        }
    }

    /// A stable topological order (ties broken by task id) used to make
    /// scheduling deterministic across runs.
    pub fn topological_order(&self) -> Vec<String> {
        let mut indegree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for t in &self.tasks {
            indegree.entry(t.id.as_str()).or_insert(0);
            dependents.entry(t.id.as_str()).or_default();
        }
        for t in &self.tasks {
            *indegree.entry(t.id.as_str()).or_insert(0) += t.depends_on.len();
            for dep in &t.depends_on {
                dependents.entry(dep.as_str()).or_default().push(t.id.as_str());
            }
        }

        let mut ready: Vec<&str> = indegree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&id, _)| id)
            .collect();
        ready.sort_unstable();

        let mut order = Vec::with_capacity(self.tasks.len());
        while !ready.is_empty() {
            ready.sort_unstable();
            let id = ready.remove(0);
            order.push(id.to_string());
            if let Some(deps) = dependents.get(id) {
                for &dependent in deps {
                    if let Some(d) = indegree.get_mut(dependent) {
                        *d -= 1;
                        if *d == 0 {
                            ready.push(dependent);
                        }
                    }
                }
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_json(tasks: &str) -> String {
        format!(
            r#"{{"featureName":"f","branchName":"b","tasks":[{tasks}]}}"#
        )
    }

    #[test]
    fn rejects_duplicate_ids() {
        let raw = plan_json(
            r#"{"id":"a","title":"A","complexity":"junior"},{"id":"a","title":"A2","complexity":"junior"}"#,
        );
        let err = Plan::load_str(&raw).unwrap_err();
        assert!(err.message.contains("duplicate task id"));
    }

    #[test]
    fn rejects_dangling_dependency() {
        let raw = plan_json(
            r#"{"id":"a","title":"A","complexity":"junior","dependsOn":["missing"]}"#,
        );
        let err = Plan::load_str(&raw).unwrap_err();
        assert!(err.message.contains("unknown task"));
    }

    #[test]
    fn rejects_cycle() {
        let raw = plan_json(
            r#"{"id":"a","title":"A","complexity":"junior","dependsOn":["b"]},{"id":"b","title":"B","complexity":"junior","dependsOn":["a"]}"#,
        );
        let err = Plan::load_str(&raw).unwrap_err();
        assert!(err.message.to_lowercase().contains("cycle"));
    }

    #[test]
    fn topological_order_is_stable() {
        let raw = plan_json(
            r#"{"id":"b","title":"B","complexity":"junior","dependsOn":["a"]},{"id":"a","title":"A","complexity":"junior"},{"id":"c","title":"C","complexity":"junior","dependsOn":["a"]}"#,
        );
        let plan = Plan::load_str(&raw).unwrap();
        assert_eq!(plan.topological_order(), vec!["a", "b", "c"]);
    }
}
