#[cfg(feature = "cli")]
mod cli {
    use anyhow::{anyhow, Context, Result};
    use clap::{Parser, Subcommand};
    use process_store::{
        config::Config, telemetry, Analysis, AuditAction, EventData, EventType, EventValue, Workspace,
    };

    #[derive(Parser)]
    #[command(name = "process-store", about = "Local store for business process analyses")]
    struct Cli {
        #[command(subcommand)]
        command: Command,
    }

    #[derive(Subcommand)]
    enum Command {
        /// List every analysis, newest first
        List,
        /// Case-insensitive search over title, description and industry
        Search { query: String },
        /// Print the current document as JSON
        Show { id: String },
        /// List the version snapshots of a process
        Versions { id: String },
        /// Save an analysis from a JSON file
        Import {
            file: std::path::PathBuf,
            #[arg(long)]
            actor: Option<String>,
        },
        /// Delete the current document (history is kept)
        Delete { id: String },
        /// Print the audit report of a process
        Audit { id: String },
        /// Append an audit entry
        AuditAdd {
            id: String,
            action: AuditAction,
            description: String,
            #[arg(long)]
            actor: Option<String>,
        },
        /// Print analytics statistics as JSON
        Stats,
        /// Record an analytics event, data given as key=value pairs
        Track {
            event_type: EventType,
            data: Vec<String>,
        },
    }

    pub async fn run() -> Result<()> {
        telemetry::init_tracing();
        let cli = Cli::parse();
        let cfg = Config::from_env()?;
        let ws = Workspace::open(&cfg);

        match cli.command {
            Command::List => {
                for a in ws.processes.get_all_processes().await? {
                    print_row(&a);
                }
            }
            Command::Search { query } => {
                for a in ws.processes.search_processes(&query).await? {
                    print_row(&a);
                }
            }
            Command::Show { id } => {
                let analysis = ws
                    .processes
                    .get_process(&id)
                    .await?
                    .ok_or_else(|| anyhow!("process {} not found", id))?;
                println!("{}", serde_json::to_string_pretty(&analysis)?);
            }
            Command::Versions { id } => {
                for v in ws.processes.get_versions(&id).await? {
                    println!("v{}\t{}\t{}", v.version_number, v.created_at.to_rfc3339(), v.snapshot.title);
                }
            }
            Command::Import { file, actor } => {
                let raw = std::fs::read_to_string(&file)
                    .with_context(|| format!("reading {}", file.display()))?;
                let analysis: Analysis = serde_json::from_str(&raw)
                    .with_context(|| format!("parsing {}", file.display()))?;
                if let Err(e) = analysis.validate() {
                    tracing::warn!("Importing analysis with incomplete flow: {}", e);
                }
                let saved = ws.save_analysis(analysis, actor.as_deref()).await?;
                println!("{}", saved.id);
            }
            Command::Delete { id } => {
                if !ws.delete_analysis(&id).await? {
                    return Err(anyhow!("process {} not found", id));
                }
            }
            Command::Audit { id } => {
                println!("{}", ws.audit.export_audit_log(&id).await?);
            }
            Command::AuditAdd { id, action, description, actor } => {
                let entry = ws.audit.add_audit_entry(&id, action, &description, actor.as_deref()).await?;
                println!("{}", entry.id);
            }
            Command::Stats => {
                let stats = ws.analytics.get_analytics_stats().await;
                println!("{}", serde_json::to_string_pretty(&stats)?);
            }
            Command::Track { event_type, data } => {
                ws.analytics.track_event(event_type, parse_data(&data)?).await;
            }
        }
        Ok(())
    }

    fn print_row(a: &Analysis) {
        let created = a.created_at.map(|t| t.format("%Y-%m-%d").to_string()).unwrap_or_default();
        println!("{}\t{}\t{}\t{}", a.id, created, a.industry, a.title);
    }

    fn parse_data(pairs: &[String]) -> Result<EventData> {
        pairs
            .iter()
            .map(|pair| {
                let (k, v) = pair
                    .split_once('=')
                    .ok_or_else(|| anyhow!("expected key=value, got '{}'", pair))?;
                let value = v.parse::<f64>().map(EventValue::Number).unwrap_or_else(|_| EventValue::from(v));
                Ok((k.to_string(), value))
            })
            .collect()
    }
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::run().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
