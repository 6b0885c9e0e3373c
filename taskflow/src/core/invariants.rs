//! Document invariants beyond what the JSON schemas can express.
//!
//! Every check runs; callers get the complete list of violations.

use std::collections::BTreeSet;
use std::path::{Component, Path};

use crate::core::scheduler::dependency_key;
use crate::core::stage::Stage;
use crate::persona::Persona;
use crate::task::{AnnotationKind, Task, TaskRecord, validate_id};

/// Validate a task document. `authorized_roots` are workspace-relative
/// directories; empty means the whole workspace.
pub fn validate_task(task: &Task, authorized_roots: &[String]) -> Vec<String> {
    let mut errors = Vec::new();

    if let Err(err) = validate_id(&task.task_id) {
        errors.push(format!("task_id: {err}"));
    }
    if task.created_by.trim().is_empty() {
        errors.push("created_by must not be empty".to_string());
    }
    if let Err(err) = validate_id(&task.persona) {
        errors.push(format!("persona: {err}"));
    }
    if task.objective.trim().is_empty() {
        errors.push("objective must not be empty".to_string());
    }

    let mut seen = BTreeSet::new();
    for dependency in &task.dependencies {
        let key = dependency_key(dependency);
        if key.is_empty() {
            errors.push("dependencies must not contain empty entries".to_string());
            continue;
        }
        if key == task.task_id {
            errors.push(format!("task '{}' depends on itself", task.task_id));
        }
        if !seen.insert(key) {
            errors.push(format!("duplicate dependency '{key}'"));
        }
    }

    if task.output_path.trim().is_empty() {
        errors.push("output_path must not be empty".to_string());
    } else if !output_path_allowed(&task.output_path, authorized_roots) {
        errors.push(format!(
            "output_path '{}' is outside the authorized roots",
            task.output_path
        ));
    }

    if task.success_criteria.iter().any(|c| c.trim().is_empty()) {
        errors.push("success_criteria must not contain blank entries".to_string());
    }
    if task.constraints.iter().any(|c| c.trim().is_empty()) {
        errors.push("constraints must not contain blank entries".to_string());
    }

    errors
}

/// Output paths are relative, never climb out of the workspace, and (when
/// roots are configured) live under one of them. Purely lexical.
pub fn output_path_allowed(output_path: &str, authorized_roots: &[String]) -> bool {
    let path = Path::new(output_path);
    let mut depth = 0usize;
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => {
                depth += 1;
                parts.push(part);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return false;
                }
                depth -= 1;
                parts.pop();
            }
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    if parts.is_empty() {
        return false;
    }
    if authorized_roots.is_empty() {
        return true;
    }
    let normalized: std::path::PathBuf = parts.iter().collect();
    authorized_roots.iter().any(|root| {
        let root = Path::new(root.trim_end_matches('/'));
        normalized.starts_with(root) && normalized != root
    })
}

/// Validate a persona document.
pub fn validate_persona(persona: &Persona) -> Vec<String> {
    let mut errors = Vec::new();
    if let Err(err) = validate_id(&persona.persona_name) {
        errors.push(format!("persona_name: {err}"));
    }
    if persona.system_prompt.trim().is_empty() {
        errors.push("system_prompt must not be empty".to_string());
    }
    let mut seen = BTreeSet::new();
    for tool in &persona.tools {
        if !seen.insert(tool.as_str()) {
            errors.push(format!("duplicate tool '{tool}'"));
        }
    }
    if let Some(t) = persona.model_config.temperature
        && !(0.0..=2.0).contains(&t)
    {
        errors.push(format!("temperature {t} must be within 0..=2"));
    }
    if let Some(p) = persona.model_config.top_p
        && !(0.0..=1.0).contains(&p)
    {
        errors.push(format!("top_p {p} must be within 0..=1"));
    }
    errors
}

/// Validate a persisted record (stage-dependent fields).
pub fn validate_record(record: &TaskRecord) -> Vec<String> {
    let mut errors = Vec::new();
    if record.owner.is_some() && record.stage != Stage::InProgress {
        errors.push(format!(
            "task '{}' has an owner while {}",
            record.task_id(),
            record.stage
        ));
    }
    if record.stage == Stage::Failed && record.failure_reason().is_none() {
        errors.push(format!(
            "task '{}' is failed without a recorded reason",
            record.task_id()
        ));
    }
    if record
        .annotations
        .iter()
        .any(|a| a.kind == AnnotationKind::Review && a.message.trim().is_empty())
    {
        errors.push(format!(
            "task '{}' has an empty review annotation",
            record.task_id()
        ));
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{persona, record, task};
    use crate::task::{Annotation, Owner};

    #[test]
    fn well_formed_task_has_no_errors() {
        assert!(validate_task(&task("t1"), &[]).is_empty());
    }

    #[test]
    fn collects_all_violations() {
        let mut t = task("bad/id");
        t.created_by = " ".to_string();
        t.objective = String::new();
        t.output_path = "../escape.md".to_string();
        let errors = validate_task(&t, &[]);
        assert_eq!(errors.len(), 4, "{errors:?}");
    }

    #[test]
    fn self_and_duplicate_dependencies_are_rejected() {
        let mut t = task("t1");
        t.dependencies = vec!["t1.json".to_string(), "a".to_string(), "a.json".to_string()];
        let errors = validate_task(&t, &[]);
        assert!(errors.iter().any(|e| e.contains("depends on itself")));
        assert!(errors.iter().any(|e| e.contains("duplicate dependency 'a'")));
    }

    #[test]
    fn output_path_must_stay_under_authorized_roots() {
        let roots = vec!["deliverables".to_string(), "archive/out/".to_string()];
        assert!(output_path_allowed("deliverables/a.md", &roots));
        assert!(output_path_allowed("./archive/out/x/y.md", &roots));
        assert!(!output_path_allowed("deliverables", &roots));
        assert!(!output_path_allowed("deliverables/../secrets.md", &roots));
        assert!(!output_path_allowed("deliverables-evil/a.md", &roots));
        assert!(!output_path_allowed("/etc/passwd", &[]));
        assert!(!output_path_allowed("a/../../b", &[]));
        assert!(output_path_allowed("a/../b.md", &[]));
    }

    #[test]
    fn persona_ranges_are_checked() {
        let mut p = persona("writer", &["write_file", "write_file"]);
        p.model_config.temperature = Some(3.0);
        p.model_config.top_p = Some(-0.1);
        let errors = validate_persona(&p);
        assert_eq!(errors.len(), 3, "{errors:?}");
    }

    #[test]
    fn failed_record_requires_reason() {
        let mut r = record(task("t1"), Stage::Failed);
        assert_eq!(validate_record(&r).len(), 1);
        r.annotations
            .push(Annotation::new(AnnotationKind::Failure, "backend down"));
        assert!(validate_record(&r).is_empty());
    }

    #[test]
    fn owner_only_while_in_progress() {
        let mut r = record(task("t1"), Stage::Assigned);
        r.owner = Some(Owner {
            pid: 1,
            attempt: 1,
            started_at: chrono::Utc::now(),
        });
        assert_eq!(validate_record(&r).len(), 1);
    }
}
