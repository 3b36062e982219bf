//! Argument list for a single `claude --print` request.
//!
//! Order matters to the CLI's own parser:
//!
//! ```text
//! claude [--model M] --print --output-format stream-json --verbose
//!        [--resume ID | -c] [--dangerously-skip-permissions] PROMPT [PASSTHROUGH...]
//! ```

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ResumeMode {
    #[default]
    Fresh,
    /// `--resume <id>`
    Resume(String),
    /// `-c`, continue the most recent session in the working directory
    Continue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentInvocation {
    pub prompt: String,
    pub model: Option<String>,
    pub resume: ResumeMode,
    pub skip_permissions: bool,
    pub passthrough_args: Vec<String>,
}

impl AgentInvocation {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: None,
            resume: ResumeMode::Fresh,
            skip_permissions: false,
            passthrough_args: Vec::new(),
        }
    }

    pub fn model(mut self, model: Option<&str>) -> Self {
        self.model = model
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(String::from);
        self
    }

    pub fn resume(mut self, resume: ResumeMode) -> Self {
        self.resume = resume;
        self
    }

    pub fn skip_permissions(mut self, skip: bool) -> Self {
        self.skip_permissions = skip;
        self
    }

    pub fn passthrough(mut self, args: &[String]) -> Self {
        self.passthrough_args = args.to_vec();
        self
    }

    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(10 + self.passthrough_args.len());
        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        args.extend(
            ["--print", "--output-format", "stream-json", "--verbose"]
                .into_iter()
                .map(String::from),
        );
        match &self.resume {
            ResumeMode::Fresh => {}
            ResumeMode::Resume(id) => {
                args.push("--resume".to_string());
                args.push(id.clone());
            }
            ResumeMode::Continue => args.push("-c".to_string()),
        }
        if self.skip_permissions {
            args.push("--dangerously-skip-permissions".to_string());
        }
        args.push(self.prompt.clone());
        args.extend(self.passthrough_args.iter().cloned());
        args
    }
}
