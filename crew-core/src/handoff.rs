//! Cross-stage memory for one task and prompt rendering

use std::borrow::Cow;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::config::DEFAULT_HANDOFF_CHAR_CAP;

/// Accumulates stage outputs and renders each stage's prompt from them
#[derive(Debug, Clone)]
pub struct HandoffContext {
    task: String,
    stages: Vec<String>,
    /// Insertion-ordered; a re-recorded stage keeps its original position
    outputs: Vec<(String, String)>,
    working_dir: PathBuf,
    char_cap: usize,
}

impl HandoffContext {
    pub fn new(task: impl Into<String>, stages: Vec<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            task: task.into(),
            stages,
            outputs: Vec::new(),
            working_dir: working_dir.into(),
            char_cap: DEFAULT_HANDOFF_CHAR_CAP,
        }
    }

    /// Override the per-stage output cap used when rendering
    pub fn with_char_cap(mut self, char_cap: usize) -> Self {
        self.char_cap = char_cap;
        self
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn stages(&self) -> &[String] {
        &self.stages
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn char_cap(&self) -> usize {
        self.char_cap
    }

    /// Record a stage's output; recording the same stage again overwrites it
    pub fn record_output(&mut self, stage: &str, text: impl Into<String>) {
        let text = text.into();
        match self.outputs.iter_mut().find(|(name, _)| name == stage) {
            Some((_, existing)) => *existing = text,
            None => self.outputs.push((stage.to_string(), text)),
        }
        if !self.stages.iter().any(|name| name == stage) {
            self.stages.push(stage.to_string());
        }
    }

    pub fn output(&self, stage: &str) -> Option<&str> {
        self.outputs
            .iter()
            .find(|(name, _)| name == stage)
            .map(|(_, text)| text.as_str())
    }

    /// Recorded outputs in insertion order
    pub fn outputs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outputs
            .iter()
            .map(|(name, text)| (name.as_str(), text.as_str()))
    }

    /// Prompt for `stage`: task text, every other recorded output, role footer
    pub fn build_prompt(&self, stage: &str) -> String {
        self.render(stage, None)
    }

    /// Prompt for a dispatched role carrying the coordinator's instruction
    pub fn build_assignment_prompt(&self, role: &str, assignment: &str) -> String {
        self.render(role, Some(assignment))
    }

    fn render(&self, stage: &str, assignment: Option<&str>) -> String {
        let mut prompt = String::new();
        let _ = write!(prompt, "# Task\n\n{}\n", self.task.trim_end());

        for (name, text) in self.outputs.iter().filter(|(name, _)| name != stage) {
            let (shown, truncated) = truncate_chars(text, self.char_cap);
            let _ = write!(prompt, "\n## Output from {name}\n\n{}\n", shown.trim_end());
            if truncated {
                let _ = writeln!(
                    prompt,
                    "\n[... output truncated to {} characters]",
                    self.char_cap
                );
            }
        }

        if let Some(assignment) = assignment {
            let _ = write!(prompt, "\n## Assignment\n\n{}\n", assignment.trim_end());
        }

        let _ = write!(
            prompt,
            "\n## Your role\n\nYou are the {stage} agent. Work in {}.\n",
            self.working_dir.display()
        );
        prompt
    }
}

/// Cut `text` to at most `cap` characters, reporting whether anything was cut
fn truncate_chars(text: &str, cap: usize) -> (Cow<'_, str>, bool) {
    match text.char_indices().nth(cap) {
        Some((byte_index, _)) => (Cow::Borrowed(&text[..byte_index]), true),
        None => (Cow::Borrowed(text), false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> HandoffContext {
        HandoffContext::new(
            "Add a health endpoint",
            vec!["product".to_string(), "development".to_string()],
            "/work/repo",
        )
    }

    // ==================== Rendering Tests ====================

    #[test]
    fn first_stage_prompt_has_task_and_role() {
        let prompt = context().build_prompt("product");
        assert!(prompt.starts_with("# Task\n\nAdd a health endpoint\n"));
        assert!(prompt.contains("You are the product agent"));
        assert!(prompt.contains("/work/repo"));
        assert!(!prompt.contains("## Output from"));
    }

    #[test]
    fn prior_outputs_appear_in_insertion_order() {
        let mut ctx = context();
        ctx.record_output("product", "Spec: add health endpoint");
        ctx.record_output("design", "Use GET /health");

        let prompt = ctx.build_prompt("development");
        let product = prompt.find("## Output from product").unwrap();
        let design = prompt.find("## Output from design").unwrap();
        assert!(product < design);
        assert!(prompt.contains("Spec: add health endpoint"));
    }

    #[test]
    fn own_output_is_not_repeated() {
        let mut ctx = context();
        ctx.record_output("product", "first draft");
        assert!(!ctx.build_prompt("product").contains("first draft"));
    }

    #[test]
    fn assignment_prompt_includes_instruction() {
        let mut ctx = context();
        ctx.record_output("development", "implemented");
        let prompt = ctx.build_assignment_prompt("review", "Review the diff for races");
        assert!(prompt.contains("## Assignment\n\nReview the diff for races"));
        assert!(prompt.contains("## Output from development"));
        assert!(prompt.contains("You are the review agent"));
    }

    // ==================== Truncation Tests ====================

    #[test]
    fn output_at_cap_is_verbatim() {
        let mut ctx = context();
        let text = "a".repeat(8000);
        ctx.record_output("product", text.clone());
        let prompt = ctx.build_prompt("development");
        assert!(prompt.contains(&text));
        assert!(!prompt.contains("truncated"));
    }

    #[test]
    fn output_over_cap_is_truncated_with_marker() {
        let mut ctx = context();
        let text = format!("{}{}", "a".repeat(8000), "b".repeat(500));
        ctx.record_output("product", text);
        let prompt = ctx.build_prompt("development");
        assert!(prompt.contains(&"a".repeat(8000)));
        assert!(!prompt.contains("bb"));
        assert!(prompt.contains("[... output truncated to 8000 characters]"));
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let (shown, truncated) = truncate_chars("ééééé", 3);
        assert_eq!(shown, "ééé");
        assert!(truncated);
    }

    #[test]
    fn configurable_cap() {
        let mut ctx = context().with_char_cap(5);
        ctx.record_output("product", "0123456789");
        let prompt = ctx.build_prompt("development");
        assert!(prompt.contains("01234\n"));
        assert!(!prompt.contains("56789"));
    }

    // ==================== Recording Tests ====================

    #[test]
    fn rerecording_overwrites_in_place() {
        let mut ctx = context();
        ctx.record_output("product", "old");
        ctx.record_output("design", "layout");
        ctx.record_output("product", "new");

        assert_eq!(ctx.output("product"), Some("new"));
        let names: Vec<_> = ctx.outputs().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["product", "design"]);

        let prompt = ctx.build_prompt("development");
        assert!(prompt.contains("new"));
        assert!(!prompt.contains("old"));
    }

    #[test]
    fn recording_unknown_stage_extends_stage_list() {
        let mut ctx = context();
        ctx.record_output("security", "ok");
        assert_eq!(ctx.stages().last().map(String::as_str), Some("security"));
    }
}
