//! Prompt templates for planning and reflection

use crate::tools::ToolManifestEntry;
use crate::trace::Step;

/// Default system prompt for the general agent
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an autonomous agent that accomplishes goals by calling tools.

## How you work
1. Look at the goal and what has happened so far.
2. Pick exactly ONE tool call that makes progress, or call `finish` when done.
3. Call `finish` with an `answer` argument containing your final answer.

## Rules
- Call one tool at a time and wait for its result.
- If a tool keeps failing, try a different approach instead of repeating it.
- When the goal is achieved (or clearly impossible), call `finish`.
"#;

/// System prompt for the web scraper agent type
pub const WEB_SCRAPER_PROMPT: &str = r#"You are a web scraping agent. You fetch pages, extract the requested
information, and report it concisely. Prefer `http_get` for retrieval; call
`finish` with the extracted data as your answer.
"#;

/// System prompt for the data analysis agent type
pub const DATA_ANALYSIS_PROMPT: &str = r#"You are a data analysis agent. You inspect the provided inputs, compute
the requested statistics or comparisons, and call `finish` with a clear,
numeric answer. Show your working briefly in the answer.
"#;

/// System prompt for the file processor agent type
pub const FILE_PROCESSOR_PROMPT: &str = r#"You are a file processing agent. You read, transform, and write files in
the workspace using `fs_read` and `fs_write`. Call `finish` once the files
are in the requested state, summarizing what changed.
"#;

/// Build the planner's user prompt: goal, trace summary, and tool manifest.
pub fn planner_prompt(goal: &str, steps: &[Step], manifest: &[ToolManifestEntry]) -> String {
    let mut prompt = format!("## Goal\n{}\n", goal);

    if !steps.is_empty() {
        prompt.push_str("\n## Progress so far\n");
        prompt.push_str(&summarize_steps(steps));
    }

    prompt.push_str("\n## Available tools\n");
    for entry in manifest {
        prompt.push_str(&format!("- {}: {}\n", entry.name, entry.description));
    }
    prompt.push_str("- finish: Finish the run, passing the final answer in `answer`\n");

    prompt.push_str("\nDecide the next single tool call.");
    prompt
}

/// Build the reflection prompt over the last `steps`.
pub fn reflection_prompt(goal: &str, steps: &[Step]) -> String {
    format!(
        r#"You are reviewing an agent's recent progress toward a goal.

## Goal
{}

## Recent steps
{}
Respond with ONLY a JSON object:
{{"decision": "continue" | "replan" | "stop", "confidence": 0.0-1.0, "reason": "one sentence"}}

- "continue": the approach is working, keep going.
- "replan": the approach is stuck, start planning fresh.
- "stop": the goal cannot be achieved, give up.
"#,
        goal,
        summarize_steps(steps)
    )
}

/// One line per step: action, outcome, latency.
pub fn summarize_steps(steps: &[Step]) -> String {
    let mut summary = String::new();
    for (i, step) in steps.iter().enumerate() {
        let outcome = match (&step.observation.output, &step.observation.err_msg) {
            (_, Some(err)) => format!("ERROR: {}", truncate(err, 200)),
            (Some(output), _) => format!("ok: {}", truncate(&output.to_string(), 200)),
            _ => "ok".to_string(),
        };
        summary.push_str(&format!(
            "{}. {}({}) -> {} ({}ms)\n",
            i + 1,
            step.action.name,
            truncate(&step.action.args.to_string(), 120),
            outcome,
            step.observation.latency_ms,
        ));
    }
    summary
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
