/// Conditional template wrapping for generated schema documents
///
/// Generators write raw schema files; packaging needs each one guarded by a
/// chart value so it can be switched off at install time.
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use super::{Action, ActionContext, ActionOutput};
use crate::error::ActionError;

const SCHEMA_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Copies every schema document from `from` into `to`, wrapped in
/// `{{- if <condition> }} ... {{- end }}`
#[derive(Debug, Clone)]
pub struct WrapTemplateAction {
    pub from: PathBuf,
    pub to: PathBuf,
    pub condition: String,
}

impl WrapTemplateAction {
    pub fn new(from: impl Into<PathBuf>, to: impl Into<PathBuf>, condition: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: condition.into(),
        }
    }
}

/// Wrap a single document body in the conditional block
pub fn wrap_document(content: &str, condition: &str) -> String {
    format!(
        "{{{{- if {} }}}}\n{}\n{{{{- end }}}}\n",
        condition,
        content.trim_end_matches('\n')
    )
}

fn io_error(context: String) -> impl FnOnce(std::io::Error) -> ActionError {
    move |source| ActionError::Io { context, source }
}

fn schema_files(dir: &Path) -> Result<Vec<PathBuf>, ActionError> {
    let mut files = Vec::new();

    for entry in fs::read_dir(dir).map_err(io_error(format!(
        "Failed to read schema directory {}",
        dir.display()
    )))? {
        let path = entry
            .map_err(io_error(format!("Failed to read entry in {}", dir.display())))?
            .path();

        let is_schema = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| SCHEMA_EXTENSIONS.contains(&e))
            .unwrap_or(false);

        if path.is_file() && is_schema {
            files.push(path);
        }
    }

    // Deterministic output order for logs
    files.sort();
    Ok(files)
}

impl Action for WrapTemplateAction {
    fn describe(&self) -> String {
        format!(
            "wrap {} -> {} if {}",
            self.from.display(),
            self.to.display(),
            self.condition
        )
    }

    fn execute(&self, ctx: &ActionContext) -> Result<ActionOutput, ActionError> {
        let start = Instant::now();
        let from = ctx.resolve(&self.from);
        let to = ctx.resolve(&self.to);

        let files = schema_files(&from)?;
        if files.is_empty() {
            return Err(ActionError::Other(format!(
                "No schema documents found in {}",
                from.display()
            )));
        }

        fs::create_dir_all(&to).map_err(io_error(format!(
            "Failed to create template directory {}",
            to.display()
        )))?;

        let mut log = String::new();
        for file in files {
            let Some(name) = file.file_name() else {
                continue;
            };
            let content = fs::read_to_string(&file)
                .map_err(io_error(format!("Failed to read {}", file.display())))?;

            let dest = to.join(name);
            fs::write(&dest, wrap_document(&content, &self.condition))
                .map_err(io_error(format!("Failed to write {}", dest.display())))?;

            log.push_str(&format!("wrapped {}\n", dest.display()));
        }

        Ok(ActionOutput {
            exit_code: 0,
            duration: start.elapsed(),
            output: log.into_bytes(),
        })
    }
}
