//! Campost CLI client - codes, couriers and delivery tasks from the terminal

mod client;
mod messages;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::client::ApiClient;
use crate::messages::{
    AllocateRequest, CancelActor, CreateCourierRequest, CreateTaskRequest, PointType,
    StreamMessage, TaskStatus,
};

#[derive(Parser)]
#[command(name = "campost-cli")]
#[command(about = "CLI client for the campost courier routing server")]
#[command(version)]
struct Cli {
    /// Server URL
    #[arg(short, long, env = "CAMPOST_SERVER", default_value = "http://localhost:3000")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reserve a point in an area, pending approval
    Apply {
        #[arg(long)]
        school: String,
        #[arg(long)]
        area: String,
        #[arg(long, value_enum, default_value = "other")]
        point_type: PointType,
        /// Who is asking for the code
        #[arg(long)]
        requested_by: String,
        /// Specific point segment; first free one when omitted
        #[arg(long)]
        point: Option<String>,
        /// Hide the point segment from couriers outside the area
        #[arg(long)]
        private: bool,
    },

    /// Approve a pending code application
    Approve {
        application: Uuid,
        #[arg(long)]
        courier: Uuid,
    },

    /// Reject a pending code application
    Reject {
        application: Uuid,
        #[arg(long)]
        courier: Uuid,
    },

    /// Look up a code as a courier (or anonymously)
    Lookup {
        code: String,
        #[arg(long)]
        courier: Option<Uuid>,
    },

    /// Register a courier
    CreateCourier {
        #[arg(long)]
        name: String,
        /// 1 = point, 2 = area, 3 = school, 4 = global
        #[arg(long)]
        level: u8,
        #[arg(long, default_value = "")]
        prefix: String,
        #[arg(long)]
        parent: Option<Uuid>,
        #[arg(long)]
        score: Option<f64>,
    },

    /// List every courier below a courier
    Descendants { courier: Uuid },

    /// List tasks a courier could claim now
    EligibleTasks { courier: Uuid },

    /// Create a delivery task
    CreateTask {
        #[arg(long)]
        pickup: String,
        #[arg(long)]
        delivery: String,
        /// Seconds before an unclaimed task expires
        #[arg(long)]
        ttl: Option<i64>,
    },

    /// Show a task
    ShowTask { task: Uuid },

    /// Rank the couriers eligible for a task
    Candidates { task: Uuid },

    /// Claim a task
    Accept {
        task: Uuid,
        #[arg(long)]
        courier: Uuid,
    },

    /// Claim a task for the best-ranked courier
    Assign { task: Uuid },

    /// Move a held task one step forward
    Advance {
        task: Uuid,
        #[arg(long)]
        courier: Uuid,
        #[arg(long, value_enum)]
        status: TaskStatus,
    },

    /// Cancel a task as its sender, or as the courier holding it
    Cancel {
        task: Uuid,
        #[arg(long)]
        courier: Option<Uuid>,
    },

    /// Tail task events in a courier's scope
    Watch {
        courier: Uuid,
        /// Exit after the first task event
        #[arg(long)]
        once: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "campost_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    let client = ApiClient::new(&cli.server);

    match cli.command {
        Commands::Apply {
            school,
            area,
            point_type,
            requested_by,
            point,
            private,
        } => {
            let request = AllocateRequest {
                school,
                area,
                point_type,
                requested_by,
                preferred_point: point,
                is_public: !private,
            };
            print_json(&client.allocate(&request).await?)
        }
        Commands::Approve {
            application,
            courier,
        } => print_json(&client.approve(application, courier).await?),
        Commands::Reject {
            application,
            courier,
        } => print_json(&client.reject(application, courier).await?),
        Commands::Lookup { code, courier } => print_json(&client.lookup(&code, courier).await?),
        Commands::CreateCourier {
            name,
            level,
            prefix,
            parent,
            score,
        } => {
            let request = CreateCourierRequest {
                name,
                level,
                managed_prefix: prefix,
                parent_id: parent,
                performance_score: score,
            };
            print_json(&client.create_courier(&request).await?)
        }
        Commands::Descendants { courier } => {
            let couriers = client.descendants(courier).await?;
            if couriers.is_empty() {
                println!("No couriers below {}.", courier);
            }
            for c in couriers {
                println!(
                    "  {}  L{}  {:<6}  {}{}",
                    c.id,
                    c.level,
                    c.managed_prefix,
                    c.name,
                    if c.is_active { "" } else { " (inactive)" }
                );
            }
            Ok(())
        }
        Commands::EligibleTasks { courier } => {
            let tasks = client.eligible_tasks(courier).await?;
            if tasks.is_empty() {
                println!("No tasks available.");
            }
            for task in tasks {
                println!(
                    "  {}  {} -> {}  (expires: {})",
                    task.id,
                    task.pickup_code,
                    task.delivery_code,
                    task.expires_at.format("%Y-%m-%d %H:%M")
                );
            }
            Ok(())
        }
        Commands::CreateTask {
            pickup,
            delivery,
            ttl,
        } => {
            let request = CreateTaskRequest {
                pickup_code: pickup,
                delivery_code: delivery,
                ttl_secs: ttl,
            };
            print_json(&client.create_task(&request).await?)
        }
        Commands::ShowTask { task } => print_json(&client.get_task(task).await?),
        Commands::Candidates { task } => {
            for candidate in client.candidates(task).await? {
                println!(
                    "  {}  {:<6}  load {}  score {:.2}",
                    candidate.courier.id,
                    candidate.courier.managed_prefix,
                    candidate.active_tasks,
                    candidate.courier.performance_score
                );
            }
            Ok(())
        }
        Commands::Accept { task, courier } => print_json(&client.accept(task, courier).await?),
        Commands::Assign { task } => print_json(&client.assign(task).await?),
        Commands::Advance {
            task,
            courier,
            status,
        } => print_json(&client.advance(task, courier, status).await?),
        Commands::Cancel { task, courier } => {
            let actor = match courier {
                Some(id) => CancelActor::Courier(id),
                None => CancelActor::Sender,
            };
            print_json(&client.cancel(task, actor).await?)
        }
        Commands::Watch { courier, once } => run_watch(&client, courier, once).await,
    }
}

async fn run_watch(client: &ApiClient, courier: Uuid, once: bool) -> Result<()> {
    client
        .watch(courier, |msg| {
            match msg {
                StreamMessage::Subscribed { managed_prefix, .. } => {
                    println!("Watching tasks under prefix '{}'...", managed_prefix);
                }
                StreamMessage::TaskStatusChanged {
                    task,
                    previous_status,
                } => {
                    let from = previous_status
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "new".to_string());
                    println!(
                        "[{}] {} {} -> {}  ({} -> {})",
                        task.updated_at.format("%H:%M:%S"),
                        task.id,
                        from,
                        task.status,
                        task.pickup_code,
                        task.delivery_code
                    );
                    if once {
                        return false;
                    }
                }
                StreamMessage::Lagged { skipped } => {
                    eprintln!("(missed {} events)", skipped);
                }
            }
            true
        })
        .await?;

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
