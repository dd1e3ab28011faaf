pub const SCRIPT_TASK_PREAMBLE: &str =
r#"Write a POSIX shell script.
 - It performs the task immediately when executed. It must not prompt for input or open any interactive interface.
 - There is no pre-selected file or directory. Locate whatever the task needs programmatically.
 - I only need the script body. Don't add any explanation.
The task is described as follows:"#;

/// Wraps the user's free-text task in the fixed instructional template.
pub fn wrap_task(task: &str) -> String {
    format!("{SCRIPT_TASK_PREAMBLE}\n{task}")
}

#[cfg(test)]
mod tests {
    use super::wrap_task;

    #[test]
    fn task_text_lands_at_the_end_of_the_template() {
        let wrapped = wrap_task("Create 100 files at random paths.");
        assert!(wrapped.starts_with("Write a POSIX shell script."));
        assert!(wrapped.ends_with("\nCreate 100 files at random paths."));
    }
}
