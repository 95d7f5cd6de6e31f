//! Command-line interface for scribepool
//!
//! Provides argument parsing using clap derive macros, and the rules for
//! folding command-line overrides into a loaded [`Config`].

use crate::assign::{AssignReport, RunContext, Template, assign};
use crate::config::{Config, Reward};
use crate::error::{Result, ScribepoolError};
use crate::marketplace::Marketplace;
use crate::project::Project;
use crate::remote;
use crate::timespec::Timespec;
use clap::Parser;
use std::io::{BufRead, IsTerminal};
use std::path::{Path, PathBuf};

/// Upload a project's audio chunks and assign them as transcription tasks
#[derive(Parser, Debug, Default)]
#[command(
    name = "scribepool",
    version,
    about = "Upload a project's audio chunks and assign them as transcription tasks",
    after_help = "The project may also be given on stdin."
)]
pub struct AssignArgs {
    /// PROJECT and TEMPLATE, unless given by flag (or the project on stdin)
    #[arg(value_name = "PROJECT TEMPLATE", num_args = 0..)]
    pub positional: Vec<String>,

    /// Project directory, or a project name inside `local`
    #[arg(long, value_name = "PROJECT")]
    pub project: Option<String>,

    /// Template file, or a name inside `templates` (".html" optional)
    #[arg(long, value_name = "TEMPLATE")]
    pub template: Option<String>,

    /// Reward per chunk, N.NN dollars (default: assignment.reward)
    #[arg(long, value_name = "DOLLARS")]
    pub reward: Option<String>,

    /// Reward currency (default: USD)
    #[arg(long, value_name = "TYPE")]
    pub currency: Option<String>,

    /// Search keyword. Repeatable; replaces the configured keywords
    #[arg(long, value_name = "WORD")]
    pub keyword: Vec<String>,

    /// Worker time to transcribe, N[.N]y|M|d|h|m|s (default: 3h)
    #[arg(long, value_name = "TIMESPEC")]
    pub deadline: Option<String>,

    /// Time before an unclaimed task expires (default: 2d)
    #[arg(long, value_name = "TIMESPEC")]
    pub lifetime: Option<String>,

    /// Time before submitted work is approved automatically (default: 1d)
    #[arg(long, value_name = "TIMESPEC")]
    pub approval: Option<String>,

    /// Worker qualification, e.g. 'approval_rate >= 95'. Repeatable; replaces the configured list
    #[arg(long, value_name = "QUALIFICATION")]
    pub qualify: Vec<String>,

    /// Use the marketplace sandbox and the sandbox record table
    #[arg(long)]
    pub sandbox: bool,

    /// Rehearse in memory: no uploads, no tasks, no table changes (implies --sandbox)
    #[arg(long)]
    pub dry_run: bool,

    /// How many workers transcribe each chunk (default: 1)
    #[arg(long, value_name = "INT")]
    pub copies: Option<String>,

    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Verbose output (-v: debug, -vv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl AssignArgs {
    /// Fold overrides into `config`.
    ///
    /// `--keyword` and `--qualify` discard the configured list on first use,
    /// then accumulate. Every value is parsed here so a bad one aborts the
    /// run before anything touches the network.
    pub fn apply_overrides(&self, config: &mut Config) -> Result<()> {
        let assignment = &mut config.assignment;

        if let Some(text) = &self.reward {
            let reward: Reward = text.parse().map_err(|_| {
                ScribepoolError::argument(format!("can't make sense of --reward '{text}'"))
            })?;
            assignment.set_reward(reward);
        }

        if let Some(currency) = &self.currency {
            assignment.set_currency(currency.clone());
        }

        if !self.keyword.is_empty() {
            assignment.set_keywords(self.keyword.clone());
        }

        for (flag, value) in [
            ("deadline", &self.deadline),
            ("lifetime", &self.lifetime),
            ("approval", &self.approval),
        ] {
            let Some(text) = value else { continue };
            let spec: Timespec = text.parse().map_err(|e| {
                ScribepoolError::argument(format!("Bad --{flag} '{text}': {}", reason(&e)))
            })?;
            match flag {
                "deadline" => assignment.set_deadline(spec),
                "lifetime" => assignment.set_lifetime(spec),
                _ => assignment.set_approval(spec),
            }
        }

        if !self.qualify.is_empty() {
            assignment.set_qualify(Vec::new());
            for text in &self.qualify {
                assignment.add_qualification(text).map_err(|e| {
                    ScribepoolError::argument(format!(
                        "can't make sense of --qualify '{text}': {}",
                        reason(&e)
                    ))
                })?;
            }
        }

        if let Some(text) = &self.copies {
            match text.trim().parse::<u32>() {
                Ok(n) if n > 0 => assignment.set_copies(n),
                _ => {
                    return Err(ScribepoolError::argument(format!(
                        "--copies must be a positive integer, got '{text}'"
                    )));
                }
            }
        }

        Ok(())
    }

    /// Work out the project and template names.
    ///
    /// Flags win; positionals fill whichever of the two are left, project
    /// first. A project read from stdin takes the project slot.
    pub fn targets(&self, stdin_project: Option<String>) -> Result<(String, String)> {
        let mut positional = self.positional.iter().filter(|a| !a.is_empty());
        let flag_project = self.project.clone().filter(|p| !p.is_empty());

        let project = match stdin_project.filter(|p| !p.trim().is_empty()) {
            Some(from_stdin) => {
                if flag_project.is_some() {
                    return Err(ScribepoolError::argument(
                        "Duplicate project values (STDIN and --project)",
                    ));
                }
                if self.positional.len() > 1 {
                    return Err(ScribepoolError::argument(
                        "Duplicate project values (STDIN and positional argument)",
                    ));
                }
                Some(from_stdin.trim().to_string())
            }
            None => flag_project.or_else(|| positional.next().cloned()),
        };
        let template = self
            .template
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| positional.next().cloned());

        let leftover: Vec<&str> = positional.map(String::as_str).collect();
        if !leftover.is_empty() {
            return Err(ScribepoolError::argument(format!(
                "Unexpected argument(s): {}",
                leftover.join(";")
            )));
        }

        let project =
            project.ok_or_else(|| ScribepoolError::argument("Missing required arg project"))?;
        let template =
            template.ok_or_else(|| ScribepoolError::argument("Missing required arg template"))?;
        Ok((project, template))
    }
}

/// Message of a value error without its kind prefix.
fn reason(error: &ScribepoolError) -> String {
    match error {
        ScribepoolError::Format { message } | ScribepoolError::Argument { message } => {
            message.clone()
        }
        other => other.to_string(),
    }
}

/// Load the config the way every entry point does: an explicit path must
/// exist, the default path may be absent.
pub fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = match custom_path {
        Some(path) => Config::load(path)?,
        None => match Config::default_path() {
            Some(path) => Config::load_or_default(&path)?,
            None => Config::default(),
        },
    };
    Ok(config.with_env_overrides())
}

/// One line from stdin, when stdin is piped.
pub fn read_stdin_project() -> Result<Option<String>> {
    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }
    let mut line = String::new();
    stdin.lock().read_line(&mut line)?;
    let line = line.trim();
    Ok((!line.is_empty()).then(|| line.to_string()))
}

/// A path as given, or a project name inside the configured `local` dir.
pub fn resolve_project_dir(config: &Config, name: &str) -> Result<PathBuf> {
    let given = PathBuf::from(name);
    if given.exists() {
        return Ok(given);
    }
    let local = config.local().ok_or_else(|| {
        ScribepoolError::argument(format!(
            "No project at '{name}', and 'local' is missing from config file {}",
            config_name(config)
        ))
    })?;
    let candidate = local.join(name);
    if candidate.is_dir() {
        Ok(candidate)
    } else {
        Err(ScribepoolError::argument(format!(
            "No project at {}",
            candidate.display()
        )))
    }
}

/// A template file as given, or a name inside the configured `templates`
/// dir, with or without its `.html` extension.
pub fn resolve_template(config: &Config, name: &str) -> Result<PathBuf> {
    let given = PathBuf::from(name);
    if given.is_file() {
        return Ok(given);
    }
    let templates = config.templates().ok_or_else(|| {
        ScribepoolError::argument(format!(
            "No template at '{name}', and 'templates' is missing from config file {}",
            config_name(config)
        ))
    })?;
    let candidate = templates.join(name);
    if candidate.is_file() {
        return Ok(candidate);
    }
    let with_extension = templates.join(format!("{name}.html"));
    if with_extension.is_file() {
        return Ok(with_extension);
    }
    Err(ScribepoolError::argument(format!(
        "No template at {}",
        candidate.display()
    )))
}

fn config_name(config: &Config) -> String {
    config
        .path()
        .map(|p| format!("'{}'", p.display()))
        .unwrap_or_else(|| "(defaults)".to_string())
}

/// Everything a run needs that comes from the command line.
#[derive(Debug)]
pub struct Invocation {
    pub config: Config,
    pub project: Project,
    pub template: Template,
    pub sandbox: bool,
}

/// Load config, apply overrides, locate the project and template.
pub fn prepare(args: &AssignArgs, stdin_project: Option<String>) -> Result<Invocation> {
    let mut config = load_config(args.config.as_deref())?;
    args.apply_overrides(&mut config)?;
    let (project, template) = args.targets(stdin_project)?;
    let project = Project::open(resolve_project_dir(&config, &project)?)?;
    let template = Template::load(&resolve_template(&config, &template)?)?;
    Ok(Invocation {
        config,
        project,
        template,
        sandbox: args.sandbox || args.dry_run,
    })
}

/// Parse-to-report for embedders that bring their own marketplace client.
pub async fn run(
    args: &AssignArgs,
    stdin_project: Option<String>,
    marketplace: Box<dyn Marketplace>,
) -> Result<AssignReport> {
    let invocation = prepare(args, stdin_project)?;
    let ctx = RunContext::from_config(invocation.config, marketplace)?
        .with_sandbox(invocation.sandbox);
    assign(&invocation.project, &invocation.template, &ctx).await
}

/// Rehearse a run: in-memory remote, the given marketplace, and a scratch
/// copy of the record table. Nothing is uploaded and the project's own
/// tables are left as they were.
pub async fn dry_run(invocation: Invocation, marketplace: Box<dyn Marketplace>) -> Result<AssignReport> {
    let remote = remote::rehearsal_from_config(&invocation.config)?;
    let scratch = tempfile::tempdir()?;
    let project = invocation
        .project
        .scratch_copy(scratch.path(), invocation.sandbox)?;
    let ctx = RunContext::new(invocation.config, Box::new(remote), marketplace)
        .with_sandbox(invocation.sandbox);
    assign(&project, &invocation.template, &ctx).await
}
