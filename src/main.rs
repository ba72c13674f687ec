use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tonic::transport::Channel;
use tonic::Code;
use tracing_subscriber::EnvFilter;

use cron_lite::config::{parse_endpoints, JobDefinition, NodeConfig};
use cron_lite::coordination::MemoryBackend;
use cron_lite::grpc::serve_coordination;
use cron_lite::node::Node;
use cron_lite::proto::scheduler_service_client::SchedulerServiceClient;
use cron_lite::proto::{GetClusterStatusRequest, ListJobsRequest, TriggerJobRequest};
use cron_lite::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "cron-lite")]
#[command(version)]
#[command(about = "A minimal distributed job scheduler with leader election")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a cron-lite scheduler/worker node
    Server(ServerArgs),

    /// Start a standalone coordination server
    Coordinator(CoordinatorArgs),

    /// Job management commands
    Job {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: JobCommands,
    },

    /// Cluster management commands
    Cluster {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: ClusterCommands,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Node ID (unique identifier for this node); generated when omitted
    #[arg(long, env = "CRON_LITE_NODE_ID")]
    node_id: Option<String>,

    /// Port to listen on for gRPC
    #[arg(long, default_value = "9090")]
    port: u16,

    /// Address other nodes use to reach this node (defaults to 127.0.0.1:<port>)
    #[arg(long)]
    advertise_addr: Option<String>,

    /// Comma-separated coordination endpoints (host:port)
    #[arg(long, env = "CRON_LITE_COORDINATORS", default_value = "127.0.0.1:2379")]
    coordinators: String,

    /// Register a shell job, as name=command (repeatable)
    #[arg(long = "job")]
    jobs: Vec<JobDefinition>,

    /// Session lease TTL in milliseconds
    #[arg(long, default_value = "10000")]
    session_ttl_ms: u64,

    /// Capacity of the local trigger queue
    #[arg(long, default_value = "100")]
    queue_capacity: usize,
}

#[derive(Parser, Debug)]
struct CoordinatorArgs {
    /// Port to listen on for the coordination service
    #[arg(long, default_value = "2379")]
    port: u16,
}

// =============================================================================
// Client Arguments (shared by job and cluster commands)
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Server address
    #[arg(long, short = 'a', default_value = "http://127.0.0.1:9090")]
    addr: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// Job Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum JobCommands {
    /// Run a registered job once on some worker
    Trigger {
        /// The job name (e.g., "backup")
        name: String,
    },
    /// List jobs registered on the node
    List,
}

// =============================================================================
// Cluster Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum ClusterCommands {
    /// Get cluster status and node information
    Status,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct JobTriggerOutput {
    job_id: String,
    worker_id: String,
    worker_address: String,
}

#[derive(Serialize)]
struct JobListItem {
    job_id: String,
    name: String,
}

#[derive(Serialize)]
struct JobListOutput {
    jobs: Vec<JobListItem>,
    dropped_triggers: u64,
}

#[derive(Serialize)]
struct NodeInfoOutput {
    node_id: String,
    address: String,
    status: String,
}

#[derive(Serialize)]
struct ClusterStatusOutput {
    node_id: String,
    leader_id: String,
    is_leader: bool,
    nodes: Vec<NodeInfoOutput>,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

fn with_scheme(addr: &str) -> String {
    if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.to_string()
    } else {
        format!("http://{}", addr)
    }
}

async fn connect_client(addr: &str) -> Result<SchedulerServiceClient<Channel>, Box<dyn std::error::Error>> {
    let channel = Channel::from_shared(with_scheme(addr))?.connect().await?;
    Ok(SchedulerServiceClient::new(channel))
}

/// Find the leader's advertised address by querying cluster status
async fn find_leader_addr(
    client: &mut SchedulerServiceClient<Channel>,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let response = client
        .get_cluster_status(GetClusterStatusRequest {})
        .await?
        .into_inner();

    if response.leader_id.is_empty() {
        return Ok(None);
    }
    Ok(response
        .nodes
        .into_iter()
        .find(|n| n.node_id == response.leader_id)
        .map(|n| n.address))
}

// =============================================================================
// Server Implementation
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let node_id = args
        .node_id
        .unwrap_or_else(|| format!("node-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]));
    let listen_addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    let advertise_addr = args
        .advertise_addr
        .unwrap_or_else(|| format!("127.0.0.1:{}", args.port));

    let mut config = NodeConfig::new(node_id, listen_addr)
        .with_coordinators(parse_endpoints(&args.coordinators));
    config.advertise_addr = advertise_addr;
    config.jobs = args.jobs;
    config.election = config.election.with_session_ttl_ms(args.session_ttl_ms);
    config.engine.queue_capacity = args.queue_capacity;

    tracing::info!(
        node_id = %config.node_id,
        listen_addr = %config.listen_addr,
        advertise_addr = %config.advertise_addr,
        coordinators = ?config.coordinator_endpoints,
        "Starting cron-lite node"
    );

    let cancel = install_shutdown_handler()?;
    let node = Node::connect(config).await?;
    node.run(cancel).await?;

    Ok(())
}

async fn run_coordinator(args: CoordinatorArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let cancel = install_shutdown_handler()?;

    serve_coordination(Arc::new(MemoryBackend::new()), listener, cancel).await?;
    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

fn print_trigger(
    resp: cron_lite::proto::TriggerJobResponse,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match output_format {
        OutputFormat::Json => {
            let output = JobTriggerOutput {
                job_id: resp.job_id,
                worker_id: resp.worker_id,
                worker_address: resp.worker_address,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("Job triggered successfully!");
            println!("Job ID: {}", resp.job_id);
            println!("Worker: {} ({})", resp.worker_id, resp.worker_address);
        }
    }
    Ok(())
}

async fn handle_job_trigger(
    client: &mut SchedulerServiceClient<Channel>,
    name: String,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let status = match client
        .trigger_job(TriggerJobRequest {
            job_name: name.clone(),
        })
        .await
    {
        Ok(response) => return print_trigger(response.into_inner(), output_format),
        Err(status) => status,
    };

    if status.code() != Code::FailedPrecondition {
        eprintln!("Error: Job trigger failed: {}", status.message());
        std::process::exit(1);
    }

    // Not the leader: redirect once
    let Ok(Some(leader_addr)) = find_leader_addr(client).await else {
        eprintln!("Error: {}", status.message());
        eprintln!("Hint: Use -a to specify the leader's address, e.g.:");
        eprintln!("  cron-lite job -a http://<leader-ip>:<port> trigger ...");
        std::process::exit(1);
    };

    eprintln!("Redirecting to leader at {}...", leader_addr);
    let mut leader_client = connect_client(&leader_addr).await?;
    match leader_client
        .trigger_job(TriggerJobRequest { job_name: name })
        .await
    {
        Ok(response) => print_trigger(response.into_inner(), output_format),
        Err(e) => {
            eprintln!("Error: Job trigger failed after redirect: {}", e.message());
            std::process::exit(1);
        }
    }
}

async fn handle_job_list(
    client: &mut SchedulerServiceClient<Channel>,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = client.list_jobs(ListJobsRequest {}).await?.into_inner();

    let jobs: Vec<JobListItem> = response
        .jobs
        .into_iter()
        .map(|j| JobListItem {
            job_id: j.job_id,
            name: j.name,
        })
        .collect();

    match output_format {
        OutputFormat::Json => {
            let output = JobListOutput {
                jobs,
                dropped_triggers: response.dropped_triggers,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            if jobs.is_empty() {
                println!("No jobs registered.");
            } else {
                println!("{:<30} NAME", "JOB ID");
                println!("{}", "-".repeat(50));
                for job in &jobs {
                    println!("{:<30} {}", job.job_id, job.name);
                }
            }
            if response.dropped_triggers > 0 {
                println!();
                println!("Dropped triggers: {}", response.dropped_triggers);
            }
        }
    }
    Ok(())
}

async fn handle_cluster_status(
    client: &mut SchedulerServiceClient<Channel>,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = client
        .get_cluster_status(GetClusterStatusRequest {})
        .await?
        .into_inner();

    match output_format {
        OutputFormat::Json => {
            let output = ClusterStatusOutput {
                node_id: response.node_id,
                leader_id: response.leader_id,
                is_leader: response.is_leader,
                nodes: response
                    .nodes
                    .into_iter()
                    .map(|n| NodeInfoOutput {
                        node_id: n.node_id,
                        address: n.address,
                        status: n.status,
                    })
                    .collect(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            let leader = if response.leader_id.is_empty() {
                "none"
            } else {
                response.leader_id.as_str()
            };
            println!("Cluster Status");
            println!("{}", "=".repeat(40));
            println!("Node:   {}", response.node_id);
            println!("Leader: {}", leader);
            println!();
            println!("Nodes:");
            println!("{:<20} {:<25} STATUS", "ID", "ADDRESS");
            println!("{}", "-".repeat(55));
            for node in response.nodes {
                let marker = if node.node_id == response.leader_id {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{:<20} {:<25} {} {}",
                    node.node_id, node.address, node.status, marker
                );
            }
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => {
            run_server(server_args).await?;
        }
        Commands::Coordinator(coordinator_args) => {
            run_coordinator(coordinator_args).await?;
        }
        Commands::Job { client, command } => {
            let mut grpc_client = connect_client(&client.addr).await?;

            match command {
                JobCommands::Trigger { name } => {
                    handle_job_trigger(&mut grpc_client, name, &client.output).await?;
                }
                JobCommands::List => {
                    handle_job_list(&mut grpc_client, &client.output).await?;
                }
            }
        }
        Commands::Cluster { client, command } => {
            let mut grpc_client = connect_client(&client.addr).await?;

            match command {
                ClusterCommands::Status => {
                    handle_cluster_status(&mut grpc_client, &client.output).await?;
                }
            }
        }
    }

    Ok(())
}
