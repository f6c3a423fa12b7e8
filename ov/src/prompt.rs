//! Prompt template rendering
//!
//! Templates use `{{key}}` placeholders filled by simple string
//! replacement. Unknown placeholders are left intact so a typo is
//! visible in the worker transcript instead of silently vanishing.

use std::collections::HashMap;
use std::path::Path;

use queuestore::Task;

/// Render a template against a context map
pub fn render(template: &str, context: &HashMap<String, String>) -> String {
    let mut result = template.to_string();
    for (key, value) in context {
        let placeholder = format!("{{{{{}}}}}", key);
        result = result.replace(&placeholder, value);
    }
    result
}

/// Standard context for a task about to be dispatched
pub fn task_context(task: &Task, working_dir: &Path) -> HashMap<String, String> {
    let mut context = HashMap::new();
    context.insert("task-id".to_string(), task.id.clone());
    context.insert("task-name".to_string(), task.name.clone());
    context.insert("task-description".to_string(), task.description.clone());
    context.insert("priority".to_string(), task.priority.to_string());
    context.insert("category".to_string(), task.category.clone());
    context.insert(
        "working-directory".to_string(),
        working_dir.display().to_string(),
    );
    if !task.acceptance_criteria.is_empty() {
        context.insert(
            "acceptance-criteria".to_string(),
            task.acceptance_criteria.join("\n- "),
        );
    }
    if !task.steps.is_empty() {
        context.insert("steps".to_string(), task.steps.join("\n- "));
    }
    if !task.questions_resolved.is_empty() {
        let answered = task
            .questions_resolved
            .iter()
            .map(|q| format!("Q: {}\nA: {}", q.question, q.answer))
            .collect::<Vec<_>>()
            .join("\n\n");
        context.insert("resolved-questions".to_string(), answered);
    }
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_render_replaces_known_placeholders() {
        let mut context = HashMap::new();
        context.insert("task-name".to_string(), "Fix login".to_string());
        context.insert("iteration".to_string(), "3".to_string());

        let out = render("[{{iteration}}] Work on: {{task-name}}", &context);
        assert_eq!(out, "[3] Work on: Fix login");
    }

    #[test]
    fn test_render_leaves_unknown_placeholders() {
        let out = render("Hello {{nobody}}", &HashMap::new());
        assert_eq!(out, "Hello {{nobody}}");
    }

    #[test]
    fn test_task_context_carries_analysis_material() {
        let mut task = Task::new("Fix login", "500s on submit");
        task.acceptance_criteria = vec!["login succeeds".to_string()];
        task.questions_resolved.push(queuestore::ResolvedQuestion {
            question: "Which auth backend?".to_string(),
            answer: "OIDC".to_string(),
        });

        let context = task_context(&task, &PathBuf::from("/tmp/wt"));
        assert_eq!(context["task-name"], "Fix login");
        assert_eq!(context["working-directory"], "/tmp/wt");
        assert!(context["acceptance-criteria"].contains("login succeeds"));
        assert!(context["resolved-questions"].contains("OIDC"));
        assert!(!context.contains_key("steps"));
    }
}
