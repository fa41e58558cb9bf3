//! Built-in local tools.
//!
//! The working set mirrors what the agent needs day to day: version
//! control, issue lookups, and the two terminal tools that end a turn
//! loop. Shell-out failures are reported in the result map, not as
//! handler errors, so the model can see and react to them.

use serde_json::{Map, Value};
use tokio::process::Command;

use crate::registry::LocalTool;
use toolserver::{FunctionDeclaration, Schema, SchemaType};

/// Terminal tool reporting task completion.
pub const COMPLETE: &str = "complete";

/// Terminal tool asking the user a question.
pub const ASK_QUESTION: &str = "ask_question";

/// Whether this tool call ends the turn-processing loop.
pub fn is_terminal(name: &str) -> bool {
    name == COMPLETE || name == ASK_QUESTION
}

/// The built-in tool set registered with every engine.
pub fn builtin_tools() -> Vec<LocalTool> {
    vec![
        LocalTool::new(
            FunctionDeclaration {
                name: "git_add".to_string(),
                description: "Stage a file or directory with git add".to_string(),
                parameters: Schema::object(
                    [("path_to_add", Schema::string("Path to stage"))],
                    ["path_to_add"],
                ),
            },
            |args| Box::pin(git_add(args)),
        ),
        LocalTool::new(
            FunctionDeclaration {
                name: "git_commit".to_string(),
                description: "Create a git commit with the given message".to_string(),
                parameters: Schema::object(
                    [("commit_message", Schema::string("Commit message"))],
                    ["commit_message"],
                ),
            },
            |args| Box::pin(git_commit(args)),
        ),
        LocalTool::new(
            FunctionDeclaration {
                name: "git_status".to_string(),
                description: "Show the git status of a path".to_string(),
                parameters: Schema::object(
                    [("path_to_status", Schema::string("Path to inspect"))],
                    ["path_to_status"],
                ),
            },
            |args| Box::pin(git_status(args)),
        ),
        LocalTool::new(
            FunctionDeclaration {
                name: "git_diff".to_string(),
                description: "Show the git diff of a path".to_string(),
                parameters: Schema::object(
                    [
                        ("path_to_diff", Schema::string("Path to diff")),
                        (
                            "staged",
                            Schema::of(SchemaType::Boolean)
                                .with_description("Diff the staging area instead"),
                        ),
                    ],
                    ["path_to_diff"],
                ),
            },
            |args| Box::pin(git_diff(args)),
        ),
        LocalTool::new(
            FunctionDeclaration {
                name: "gh_issue_view".to_string(),
                description: "View a GitHub issue by number using the gh CLI".to_string(),
                parameters: Schema::object(
                    [
                        (
                            "issue_number",
                            Schema::of(SchemaType::Number)
                                .with_description("Issue number to view"),
                        ),
                        (
                            "repo",
                            Schema::string(
                                "Repository (owner/repo); defaults to the current repository",
                            ),
                        ),
                    ],
                    ["issue_number"],
                ),
            },
            |args| Box::pin(gh_issue_view(args)),
        ),
        LocalTool::new(
            FunctionDeclaration {
                name: "gh_issue_create".to_string(),
                description: "Create a GitHub issue using the gh CLI".to_string(),
                parameters: Schema::object(
                    [
                        ("title", Schema::string("Issue title")),
                        ("body", Schema::string("Issue body")),
                        (
                            "repo",
                            Schema::string(
                                "Repository (owner/repo); defaults to the current repository",
                            ),
                        ),
                    ],
                    ["title"],
                ),
            },
            |args| Box::pin(gh_issue_create(args)),
        ),
        LocalTool::new(
            FunctionDeclaration {
                name: COMPLETE.to_string(),
                description: "Report that the task is finished".to_string(),
                parameters: Schema::object(
                    [("message", Schema::string("Completion message"))],
                    ["message"],
                ),
            },
            |_args| Box::pin(async { Ok(Map::new()) }),
        ),
        LocalTool::new(
            FunctionDeclaration {
                name: ASK_QUESTION.to_string(),
                description: "Ask the user a question when more information is needed \
                              to carry out the task"
                    .to_string(),
                parameters: Schema::object(
                    [
                        ("question", Schema::string("The question for the user")),
                        (
                            "options",
                            Schema::of(SchemaType::Array)
                                .with_description("Optional answer choices")
                                .with_items(Schema::of(SchemaType::String)),
                        ),
                    ],
                    ["question"],
                ),
            },
            |_args| Box::pin(async { Ok(Map::new()) }),
        ),
    ]
}

type ToolResult = Result<Map<String, Value>, crate::registry::ToolError>;

fn result_map(is_error: bool, output: impl Into<String>) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("is_error".to_string(), Value::Bool(is_error));
    map.insert("output".to_string(), Value::String(output.into()));
    map
}

fn missing_arg(name: &str) -> Map<String, Value> {
    result_map(true, format!("{name} is required"))
}

fn str_arg<'a>(args: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Run a command and fold its outcome into the uniform result map.
async fn run(program: &str, args: &[&str]) -> Map<String, Value> {
    match Command::new(program).args(args).output().await {
        Ok(output) if output.status.success() => {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            result_map(false, text)
        }
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            result_map(
                true,
                format!("{program} failed ({}):\n{stdout}{stderr}", output.status),
            )
        }
        Err(err) => result_map(true, format!("failed to run {program}: {err}")),
    }
}

async fn git_add(args: Map<String, Value>) -> ToolResult {
    let Some(path) = str_arg(&args, "path_to_add") else {
        return Ok(missing_arg("path_to_add"));
    };
    Ok(run("git", &["add", path]).await)
}

async fn git_commit(args: Map<String, Value>) -> ToolResult {
    let Some(message) = str_arg(&args, "commit_message") else {
        return Ok(missing_arg("commit_message"));
    };
    Ok(run("git", &["commit", "-m", message]).await)
}

async fn git_status(args: Map<String, Value>) -> ToolResult {
    let Some(path) = str_arg(&args, "path_to_status") else {
        return Ok(missing_arg("path_to_status"));
    };
    Ok(run("git", &["status", "--short", "--", path]).await)
}

async fn git_diff(args: Map<String, Value>) -> ToolResult {
    let Some(path) = str_arg(&args, "path_to_diff") else {
        return Ok(missing_arg("path_to_diff"));
    };
    let staged = args.get("staged").and_then(Value::as_bool).unwrap_or(false);
    let output = if staged {
        run("git", &["diff", "--staged", "--", path]).await
    } else {
        run("git", &["diff", "--", path]).await
    };
    Ok(output)
}

async fn gh_issue_view(args: Map<String, Value>) -> ToolResult {
    let Some(number) = args.get("issue_number").and_then(Value::as_f64) else {
        return Ok(result_map(true, "issue_number is required and must be a number"));
    };
    let number = format!("{number:.0}");

    let mut cmd_args = vec!["issue", "view", &number];
    if let Some(repo) = str_arg(&args, "repo") {
        cmd_args.extend(["--repo", repo]);
    }
    Ok(run("gh", &cmd_args).await)
}

async fn gh_issue_create(args: Map<String, Value>) -> ToolResult {
    let Some(title) = str_arg(&args, "title") else {
        return Ok(result_map(true, "title is required and cannot be empty"));
    };

    let mut cmd_args = vec!["issue", "create", "--title", title];
    if let Some(body) = str_arg(&args, "body") {
        cmd_args.extend(["--body", body]);
    }
    if let Some(repo) = str_arg(&args, "repo") {
        cmd_args.extend(["--repo", repo]);
    }
    Ok(run("gh", &cmd_args).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn terminal_names() {
        assert!(is_terminal("complete"));
        assert!(is_terminal("ask_question"));
        assert!(!is_terminal("git_status"));
    }

    #[test]
    fn builtin_names_are_unique() {
        let tools = builtin_tools();
        let mut names: Vec<_> = tools.iter().map(|t| t.declaration.name.clone()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), tools.len());
    }

    #[tokio::test]
    async fn missing_required_arg_is_reported_as_data() {
        let result = git_add(Map::new()).await.unwrap();
        assert_eq!(result["is_error"], json!(true));
        assert_eq!(result["output"], json!("path_to_add is required"));
    }

    #[tokio::test]
    async fn issue_number_must_be_numeric() {
        let mut args = Map::new();
        args.insert("issue_number".to_string(), json!("twelve"));
        let result = gh_issue_view(args).await.unwrap();
        assert_eq!(result["is_error"], json!(true));
    }

    #[tokio::test]
    async fn spawn_failure_is_data_not_error() {
        let result = run("skipper-no-such-command", &[]).await;
        assert_eq!(result["is_error"], json!(true));
        let output = result["output"].as_str().unwrap();
        assert!(output.contains("failed to run"));
    }

    #[tokio::test]
    async fn successful_command_reports_output() {
        let result = run("sh", &["-c", "echo ok"]).await;
        assert_eq!(result["is_error"], json!(false));
        assert_eq!(result["output"].as_str().unwrap().trim(), "ok");
    }
}
