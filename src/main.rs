use std::collections::BTreeMap;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};

use overseer::config::Config;
use overseer::orchestration::{
    ArtifactStore, CommandExecutor, Executor, FsArtifactStore, SimulatedExecutor,
};
use overseer::state::JsonFileStore;
use overseer::workflow::{Brief, CreateOptions, Workflow, WorkflowId, WorkflowStatus};
use overseer::{Error, Orchestrator, OrchestratorBuilder, Result};

/// Overseer - turns free-text directives into gated, multi-worker workflows
#[derive(Parser, Debug)]
#[command(name = "overseer")]
#[command(version, about, long_about = None)]
#[command(
    after_help = "ENVIRONMENT:\n    OVERSEER_DEBUG=1     Enable debug logging (alternative to --debug)\n    OVERSEER_LOG=<filter>  Explicit tracing filter, e.g. overseer=trace"
)]
pub struct Cli {
    /// Enable debug logging (writes to ~/.overseer/overseer.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Workflow commands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Create a workflow from a natural language directive
    Run {
        /// The directive, e.g. "have Sage create an about-me document"
        directive: String,

        /// Keep executing tasks until the workflow stops at a gate or finishes
        #[arg(long, short = 'w')]
        wait: bool,

        /// Answer questions and pass every approval gate automatically (implies --wait)
        #[arg(long, short = 'y')]
        auto_approve: bool,
    },

    /// Show one workflow as JSON
    Status {
        /// Workflow ID (full UUID or unique prefix)
        workflow_id: String,
    },

    /// List all known workflows
    List,

    /// Answer clarifying questions
    Respond {
        /// Workflow ID (full UUID or unique prefix)
        workflow_id: String,

        /// Answers as question-id=answer pairs
        #[arg(required = true)]
        answers: Vec<String>,
    },

    /// Approve the manager's brief and release the specialist tasks
    ApproveBrief {
        /// Workflow ID (full UUID or unique prefix)
        workflow_id: String,

        /// Final brief text
        #[arg(long)]
        content: Option<String>,

        /// Who approved the brief
        #[arg(long, default_value = "ceo")]
        approver: String,
    },

    /// Give final sign-off on a reviewed workflow
    Approve {
        /// Workflow ID (full UUID or unique prefix)
        workflow_id: String,

        #[arg(long, default_value = "ceo")]
        approver: String,
    },

    /// Reject a reviewed workflow
    Reject {
        /// Workflow ID (full UUID or unique prefix)
        workflow_id: String,

        #[arg(long, default_value = "ceo")]
        approver: String,
    },

    /// Pause a workflow; running tasks finish but nothing new starts
    Pause {
        /// Workflow ID (full UUID or unique prefix)
        workflow_id: String,
    },

    /// Resume a paused workflow
    Resume {
        /// Workflow ID (full UUID or unique prefix)
        workflow_id: String,
    },

    /// Fail a workflow on operator request
    Abort {
        /// Workflow ID (full UUID or unique prefix)
        workflow_id: String,

        #[arg(long, default_value = "aborted by operator")]
        reason: String,
    },

    /// List artifacts created by a worker, with lineage
    Artifacts {
        /// Worker name, e.g. Sage
        agent: String,
    },

    /// Run the execution loop until interrupted
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    overseer::log::init_with_debug(cli.debug);
    debug!("Overseer starting: {:?}", cli.command);

    let config = Config::load()?;
    config.ensure_dirs()?;
    let orchestrator = build_orchestrator(&config)?;
    let restored = orchestrator.hydrate().await?;
    debug!("Hydrated {} workflows", restored);

    let result = dispatch(&orchestrator, cli.command).await;
    orchestrator.shutdown().await;
    result
}

/// Wire the configured stores and executor into an orchestrator.
fn build_orchestrator(config: &Config) -> Result<Orchestrator> {
    let artifacts: Arc<dyn ArtifactStore> = Arc::new(FsArtifactStore::new(config.artifact_dir()?));
    let executor: Arc<dyn Executor> = match &config.command {
        Some(command_line) => {
            Arc::new(CommandExecutor::new(command_line, config.artifact_dir()?)?)
        }
        None => Arc::new(SimulatedExecutor::new(artifacts.clone()).with_delay(config.simulated_delay())),
    };

    Ok(OrchestratorBuilder::from_config(config)
        .executor(executor)
        .store(Arc::new(JsonFileStore::new(config.state_dir()?)))
        .artifact_store(artifacts)
        .build())
}

async fn dispatch(orchestrator: &Orchestrator, command: Command) -> Result<()> {
    match command {
        Command::Run {
            directive,
            wait,
            auto_approve,
        } => run_directive(orchestrator, &directive, wait || auto_approve, auto_approve).await,
        Command::Status { workflow_id } => {
            let id = resolve_workflow_id(orchestrator, &workflow_id).await?;
            let workflow = orchestrator
                .get_workflow_status(id)
                .await
                .ok_or(Error::WorkflowNotFound(id))?;
            println!("{}", serde_json::to_string_pretty(&workflow)?);
            Ok(())
        }
        Command::List => {
            let workflows = orchestrator.get_all_workflows().await?;
            if workflows.is_empty() {
                println!("No workflows");
            }
            for workflow in &workflows {
                println!("{}", summary_line(workflow));
            }
            Ok(())
        }
        Command::Respond {
            workflow_id,
            answers,
        } => {
            let id = resolve_workflow_id(orchestrator, &workflow_id).await?;
            let responses = parse_answers(&answers)?;
            let status = orchestrator.respond_to_clarification(id, responses).await?;
            println!("{}: {:?}", id.short(), status);
            Ok(())
        }
        Command::ApproveBrief {
            workflow_id,
            content,
            approver,
        } => {
            let id = resolve_workflow_id(orchestrator, &workflow_id).await?;
            let approval = approve_brief(orchestrator, id, content, &approver).await?;
            println!(
                "{}: brief approved, {} tasks scheduled",
                id.short(),
                approval
            );
            Ok(())
        }
        Command::Approve {
            workflow_id,
            approver,
        } => decide(orchestrator, &workflow_id, &approver, true).await,
        Command::Reject {
            workflow_id,
            approver,
        } => decide(orchestrator, &workflow_id, &approver, false).await,
        Command::Pause { workflow_id } => {
            let id = resolve_workflow_id(orchestrator, &workflow_id).await?;
            let status = orchestrator.pause_workflow(id).await?;
            println!("{}: {}", id.short(), status);
            Ok(())
        }
        Command::Resume { workflow_id } => {
            let id = resolve_workflow_id(orchestrator, &workflow_id).await?;
            let status = orchestrator.resume_workflow(id).await?;
            println!("{}: {}", id.short(), status);
            Ok(())
        }
        Command::Abort {
            workflow_id,
            reason,
        } => {
            let id = resolve_workflow_id(orchestrator, &workflow_id).await?;
            let status = orchestrator.abort_workflow(id, &reason).await?;
            println!("{}: {}", id.short(), status);
            Ok(())
        }
        Command::Artifacts { agent } => {
            let artifacts = orchestrator.get_agent_artifacts_with_lineage(&agent).await;
            println!("{}", serde_json::to_string_pretty(&artifacts)?);
            Ok(())
        }
        Command::Serve => serve(orchestrator).await,
    }
}

/// Create a workflow and optionally drive it until it needs a human.
async fn run_directive(
    orchestrator: &Orchestrator,
    directive: &str,
    wait: bool,
    auto_approve: bool,
) -> Result<()> {
    let created = orchestrator
        .create_workflow(directive, CreateOptions::default())
        .await?;
    let id = created.workflow_id;
    println!("{}", summary_line(&created.workflow));

    if created.workflow.status == WorkflowStatus::AwaitingClarification && !auto_approve {
        print_questions(&created.workflow);
    }
    if !wait {
        return Ok(());
    }

    loop {
        let workflow = orchestrator
            .get_workflow_status(id)
            .await
            .ok_or(Error::WorkflowNotFound(id))?;
        if workflow.status.is_terminal() {
            break;
        }

        match next_gate(&workflow) {
            Some(Gate::Clarification) if auto_approve => {
                let responses = workflow
                    .brief
                    .iter()
                    .flat_map(|b| b.outstanding_questions())
                    .map(|q| (q.id.clone(), "No preference".to_string()))
                    .collect();
                orchestrator.respond_to_clarification(id, responses).await?;
            }
            Some(Gate::Brief) if auto_approve => {
                approve_brief(orchestrator, id, None, "ceo").await?;
            }
            Some(Gate::Final) if auto_approve => {
                orchestrator.record_ceo_approval(id, "ceo", true).await?;
            }
            Some(gate) => {
                println!("{}: waiting for {}", id.short(), gate.hint(id));
                break;
            }
            None => {
                let started = orchestrator.process_next_task().await?;
                if started == 0 {
                    let workflow = orchestrator
                        .get_workflow_status(id)
                        .await
                        .ok_or(Error::WorkflowNotFound(id))?;
                    if next_gate(&workflow).is_none() && !workflow.status.is_terminal() {
                        warn!("Workflow {} has no runnable tasks", id.short());
                        println!("{}: stalled, see `overseer status {}`", id.short(), id);
                        break;
                    }
                }
            }
        }
    }

    if let Some(workflow) = orchestrator.get_workflow_status(id).await {
        println!("{}", summary_line(&workflow));
    }
    Ok(())
}

/// A point where a workflow waits for a human decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Clarification,
    Brief,
    Final,
}

impl Gate {
    fn hint(self, id: WorkflowId) -> String {
        match self {
            Gate::Clarification => format!("answers: overseer respond {} <id>=<answer>", id.short()),
            Gate::Brief => format!("brief approval: overseer approve-brief {}", id.short()),
            Gate::Final => format!("final sign-off: overseer approve {}", id.short()),
        }
    }
}

fn next_gate(workflow: &Workflow) -> Option<Gate> {
    match workflow.status {
        WorkflowStatus::AwaitingClarification => Some(Gate::Clarification),
        WorkflowStatus::WaitingForCeoApproval => Some(Gate::Final),
        _ if workflow.brief_task().is_some_and(|t| t.is_completed())
            && !workflow.pending_after_approval.is_empty() =>
        {
            Some(Gate::Brief)
        }
        _ => None,
    }
}

async fn approve_brief(
    orchestrator: &Orchestrator,
    id: WorkflowId,
    content: Option<String>,
    approver: &str,
) -> Result<usize> {
    let workflow = orchestrator
        .get_workflow_status(id)
        .await
        .ok_or(Error::WorkflowNotFound(id))?;
    let manager = workflow
        .brief
        .as_ref()
        .map(|b| b.requested_agent.clone())
        .unwrap_or_else(|| orchestrator.roster().manager().name.clone());
    let content = content
        .or_else(|| workflow.brief_task().and_then(|t| t.result.clone()))
        .unwrap_or_default();

    let approval = orchestrator
        .attach_brief_approval(id, Brief::completed(&manager, &content, approver))
        .await?;
    Ok(approval.scheduled)
}

async fn decide(
    orchestrator: &Orchestrator,
    workflow_id: &str,
    approver: &str,
    approved: bool,
) -> Result<()> {
    let id = resolve_workflow_id(orchestrator, workflow_id).await?;
    let status = orchestrator
        .record_ceo_approval(id, approver, approved)
        .await?;
    println!("{}: {}", id.short(), status);
    Ok(())
}

async fn serve(orchestrator: &Orchestrator) -> Result<()> {
    let driver = orchestrator.spawn_driver();
    info!("Execution loop running");
    println!("Overseer running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received");
    driver.shutdown();
    driver.stopped().await;
    Ok(())
}

/// Accept a full UUID or a prefix that matches exactly one known workflow.
async fn resolve_workflow_id(orchestrator: &Orchestrator, input: &str) -> Result<WorkflowId> {
    if let Ok(id) = input.parse::<WorkflowId>() {
        return Ok(id);
    }

    let prefix = input.trim().to_ascii_lowercase();
    if prefix.is_empty() {
        return Err(Error::Validation("workflow id is empty".to_string()));
    }
    let matches: Vec<WorkflowId> = orchestrator
        .get_all_workflows()
        .await?
        .into_iter()
        .map(|w| w.id)
        .filter(|id| id.to_string().starts_with(&prefix))
        .collect();

    match matches.as_slice() {
        [id] => Ok(*id),
        [] => Err(Error::Validation(format!("no workflow matches '{}'", input))),
        _ => Err(Error::Validation(format!(
            "'{}' matches {} workflows, use more characters",
            input,
            matches.len()
        ))),
    }
}

/// Parse `key=value` answers. The key is a question id or its full text.
fn parse_answers(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.trim().to_string()))
            }
            _ => Err(Error::Validation(format!(
                "expected question=answer, got '{}'",
                pair
            ))),
        })
        .collect()
}

fn summary_line(workflow: &Workflow) -> String {
    format!(
        "{}  {:<24} {:>3}%  {}",
        workflow.id.short(),
        workflow.status.to_string(),
        workflow.progress.percentage,
        truncate_string(&workflow.directive, 50)
    )
}

fn print_questions(workflow: &Workflow) {
    let Some(brief) = &workflow.brief else {
        return;
    };
    println!("Clarification needed:");
    for question in brief.outstanding_questions() {
        println!("  {}: {}", question.id, question.text);
    }
    println!("Answer with: overseer respond {} <id>=<answer>", workflow.id.short());
}

/// Truncate a string to max_len characters, adding "..." if truncated.
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    }
}
