//! Prompt composition for the code-generation agent.
//!
//! Every prompt handed to the agent is composed here so the exact text is
//! deterministic and recordable on the project row for audit.

use super::models::ProjectType;

/// Initial build prompt, composed in the planning phase from the user's
/// description, the project type, and the optional preferred stack.
pub fn build_prompt(
    description: &str,
    project_type: ProjectType,
    preferred_stack: Option<&str>,
) -> String {
    let type_guidance = match project_type {
        ProjectType::WebApp => {
            "Build a complete web application with a working dev server (npm run dev or equivalent)."
        }
        ProjectType::Api => {
            "Build an HTTP API service with a clear route structure and a way to run it locally."
        }
        ProjectType::Cli => "Build a command-line tool with --help output and installable entry point.",
        ProjectType::Library => {
            "Build a reusable library with a documented public API and usage examples."
        }
        ProjectType::FullStack => {
            "Build a full-stack application: a backend API plus a frontend that consumes it, runnable together locally."
        }
    };

    let mut prompt = format!(
        "You are building a new project from scratch in the current directory.\n\n\
         Request:\n{}\n\n\
         {}\n",
        description.trim(),
        type_guidance
    );
    if let Some(stack) = preferred_stack {
        prompt.push_str(&format!("\nPreferred stack: {}. Use it unless it is unsuitable.\n", stack));
    }
    prompt.push_str(
        "\nWrite all files to the current directory. Do not ask for confirmation of \
         routine choices; if a decision genuinely needs user input, emit an \
         awaiting_input marker with the question.",
    );
    prompt
}

/// Verification prompt for the testing phase.
pub fn test_prompt(project_type: ProjectType) -> String {
    let check = match project_type {
        ProjectType::WebApp | ProjectType::FullStack => {
            "verify the app builds and the dev server starts cleanly"
        }
        ProjectType::Api => "verify the service builds and its routes respond",
        ProjectType::Cli => "verify the tool builds and --help runs",
        ProjectType::Library => "verify the library builds and its tests pass",
    };
    format!(
        "Run the project's test suite and {}. Fix any failures you find. \
         Exit successfully only once everything passes.",
        check
    )
}

/// Prompt for modifying an already-built project in place.
pub fn modification_prompt(change_description: &str) -> String {
    format!(
        "The project in the current directory is already built. Apply the \
         following change without rewriting unrelated code:\n\n{}\n\n\
         Keep the project in a runnable state.",
        change_description.trim()
    )
}

/// Seed prompt for a retry: the original request plus what went wrong,
/// plus any caller-supplied modifications.
pub fn retry_prompt(description: &str, error: &str, modifications: Option<&str>) -> String {
    let mut prompt = format!(
        "You are rebuilding a project whose previous build attempt failed.\n\n\
         Original request:\n{}\n\n\
         The previous attempt failed with:\n{}\n\n\
         Avoid repeating that failure.",
        description.trim(),
        error.trim()
    );
    if let Some(mods) = modifications {
        prompt.push_str(&format!("\n\nAdditional changes requested:\n{}", mods.trim()));
    }
    prompt
}
