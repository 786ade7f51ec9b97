//! Prompt text sent to the model.
//!
//! - [`ContextBlock`]: the system message carrying instructions, project
//!   summary, action catalog, durable memory and rules
//! - [`tools_summary`]: the action catalog grouped by category
//! - [`compression_prompt`] / [`insight_prompt`]: maintenance queries

use regex::Regex;
use std::sync::LazyLock;

use crate::memory::MemoryItem;
use crate::tools::ToolSpec;

/// Longest action description shown in the catalog summary.
const MAX_TOOL_DESCRIPTION: usize = 80;

/// Prefixes an extracted insight must start with to be kept.
pub const INSIGHT_PREFIXES: [&str; 2] = ["Decision:", "Pattern:"];

// First line of the answer, tolerating a markdown bullet or bold label
static INSIGHT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[-*]\s+)?\*{0,2}(Decision|Pattern)\*{0,2}:\*{0,2}\s*(\S.*)$")
        .expect("valid insight regex")
});

/// Tag attached to decisions captured by insight extraction.
pub const INSIGHT_TAG: &str = "proactive-insight";

/// The system context block.
///
/// Empty sections are skipped, so a block built from nothing is empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextBlock {
    pub instructions: String,
    pub project_info: String,
    pub tools_summary: String,
    pub memory: String,
    pub rules: String,
}

impl ContextBlock {
    pub fn new(instructions: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
            ..Self::default()
        }
    }

    pub fn with_project_info(mut self, info: impl Into<String>) -> Self {
        self.project_info = info.into();
        self
    }

    pub fn with_tools_summary(mut self, summary: impl Into<String>) -> Self {
        self.tools_summary = summary.into();
        self
    }

    pub fn with_memory(mut self, memory: impl Into<String>) -> Self {
        self.memory = memory.into();
        self
    }

    pub fn with_rules(mut self, rules: impl Into<String>) -> Self {
        self.rules = rules.into();
        self
    }

    /// Render the block as one system message.
    pub fn render(&self) -> String {
        let sections = [
            (None, &self.instructions),
            (Some("## Project"), &self.project_info),
            (Some("## Tools"), &self.tools_summary),
            (Some("## Memory"), &self.memory),
            (Some("## Project Rules"), &self.rules),
        ];

        let mut out = String::new();
        for (heading, body) in sections {
            let body = body.trim();
            if body.is_empty() {
                continue;
            }
            if !out.is_empty() {
                out.push_str("\n\n");
            }
            if let Some(heading) = heading {
                out.push_str(heading);
                out.push_str("\n\n");
            }
            out.push_str(body);
        }
        out
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ToolCategory {
    File,
    Browser,
    VersionControl,
    Other,
}

impl ToolCategory {
    const ORDER: [ToolCategory; 4] = [Self::File, Self::Browser, Self::VersionControl, Self::Other];

    fn of(name: &str) -> Self {
        let lower = name.to_lowercase();
        let has = |needle: &str| lower.contains(needle);
        if has("file") || has("read") || has("write") || has("edit") {
            Self::File
        } else if has("browser") || has("navigate") {
            Self::Browser
        } else if has("git") {
            Self::VersionControl
        } else {
            Self::Other
        }
    }

    fn heading(self) -> &'static str {
        match self {
            Self::File => "### File Operations",
            Self::Browser => "### Browser Automation",
            Self::VersionControl => "### Version Control",
            Self::Other => "### Other Tools",
        }
    }
}

/// Summarize the action catalog for the context block.
pub fn tools_summary(tools: &[ToolSpec]) -> String {
    let mut out =
        String::from("You have access to the following tools (use them via function calls):\n\n");

    for category in ToolCategory::ORDER {
        let lines: Vec<String> = tools
            .iter()
            .filter(|t| ToolCategory::of(&t.name) == category)
            .map(|t| format!("- **{}**: {}", t.name, short_description(&t.description)))
            .collect();
        if lines.is_empty() {
            continue;
        }
        out.push_str(category.heading());
        out.push('\n');
        for line in lines {
            out.push_str(&line);
            out.push('\n');
        }
        out.push('\n');
    }

    out.push_str(&format!(
        "**Total**: {} tools available. Use them to accomplish tasks efficiently.",
        tools.len()
    ));
    out
}

fn short_description(description: &str) -> String {
    if description.chars().count() > MAX_TOOL_DESCRIPTION {
        let kept: String = description.chars().take(MAX_TOOL_DESCRIPTION - 3).collect();
        format!("{}...", kept)
    } else {
        description.to_string()
    }
}

fn transcript(items: &[MemoryItem]) -> String {
    items
        .iter()
        .map(|item| format!("{}: {}\n", item.role.as_str(), item.content))
        .collect()
}

/// Ask for a short summary of a run of old messages.
pub fn compression_prompt(items: &[MemoryItem]) -> String {
    format!(
        "### Context Compression Task\n\
         Summarize the following conversation segment in 2-3 concise bullet points.\n\
         Focus strictly on:\n\
         1. Technical decisions reached.\n\
         2. Patterns discovered in the codebase.\n\
         3. Errors or obstacles encountered and how they were solved.\n\
         \n\
         Conversation Segment:\n\
         {}\n\
         Summary:",
        transcript(items)
    )
}

/// Ask whether the recent exchange established a durable decision or pattern.
pub fn insight_prompt(items: &[MemoryItem]) -> String {
    format!(
        "### Insight Extraction Task\n\
         Based on the recent interaction below, identify if any permanent technical decisions or recurring project patterns were established.\n\
         If yes, provide a single sentence starting with \"Decision:\" or \"Pattern:\".\n\
         If nothing significant was established, reply with \"NONE\".\n\
         \n\
         Recent Interaction:\n\
         {}\n\
         Insight:",
        transcript(items)
    )
}

/// Keep an insight only when it starts with one of [`INSIGHT_PREFIXES`].
///
/// Only the first line is kept, normalized to `"<Label>: <text>"`.
pub fn parse_insight(answer: &str) -> Option<String> {
    let first_line = answer.trim().lines().next()?.trim();
    if first_line.eq_ignore_ascii_case("none") {
        return None;
    }
    let captures = INSIGHT_PATTERN.captures(first_line)?;
    Some(format!("{}: {}", &captures[1], captures[2].trim_end()))
}
