use convect_orchestrator::api::{admin_router, AppState};
use convect_orchestrator::audit::PgAuditSink;
use convect_orchestrator::lifecycle::Lifecycle;
use convect_orchestrator::migrations;
use convect_orchestrator::poll::PollConfig;
use convect_orchestrator::provision::{provision, ProvisionCtx};
use convect_orchestrator::request::ProvisioningIntent;
use convect_orchestrator::store::PgRecordStore;
use convect_providers::openstack::OpenStackClient;
use convect_providers::{ClientConfig, CloudApi};
use serde::Deserialize;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Deserialize, Debug)]
struct CommandProvision {
    intent: ProvisioningIntent,
    correlation_id: Option<String>,
}

#[derive(Deserialize, Debug)]
struct CommandDestroy {
    instance_ref: String,
    correlation_id: Option<String>,
}

#[derive(Deserialize, Debug)]
struct CommandAttachVolume {
    instance_ref: String,
    volume_ref: String,
    #[serde(default)]
    device: Option<String>,
}

#[derive(Deserialize, Debug)]
struct CommandDetachVolume {
    instance_ref: String,
    volume_ref: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    dotenv::dotenv().ok();

    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let redis_url = std::env::var("REDIS_URL").expect("REDIS_URL must be set");
    let redis_client = redis::Client::open(redis_url).unwrap();

    // Connect to Postgres
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to Postgres");

    // Check connection
    sqlx::query("SELECT 1").execute(&pool).await.unwrap();
    println!("✅ Connected to Database");

    migrations::run_inline_migrations(&pool).await;

    let config = ClientConfig::from_env().expect("cloud API configuration");
    let cloud: Arc<dyn CloudApi> = Arc::new(OpenStackClient::new(config));
    let store = Arc::new(PgRecordStore::new(pool.clone()));
    let audit = Arc::new(PgAuditSink::new(pool.clone()));

    // Cancellation fans out to every polling loop; polls stop between
    // attempts, never mid-call.
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("⚠️ Shutdown requested, polls will stop between attempts");
            let _ = cancel_tx.send(true);
        }
    });

    let ctx = Arc::new(ProvisionCtx {
        cloud: cloud.clone(),
        store: store.clone(),
        audit: audit.clone(),
        poll: PollConfig::default(),
        cancel: cancel_rx,
    });
    let lifecycle = Arc::new(Lifecycle::new(cloud.clone(), store.clone(), audit.clone()));

    // Command listener (Redis subscriber)
    let mut pubsub = redis_client.get_async_pubsub().await.unwrap();
    pubsub.subscribe("convect_events").await.unwrap();
    println!("🎧 Orchestrator listening on Redis channel 'convect_events'...");

    let dispatch_ctx = ctx.clone();
    let dispatch_lifecycle = lifecycle.clone();
    tokio::spawn(async move {
        use futures_util::StreamExt;
        let mut stream = pubsub.on_message();

        while let Some(msg) = stream.next().await {
            let payload: String = msg.get_payload().unwrap();
            println!("📩 Received Event: {}", payload);

            if let Ok(event_json) = serde_json::from_str::<serde_json::Value>(&payload) {
                let event_type = event_json["type"].as_str().unwrap_or("");

                match event_type {
                    "CMD:PROVISION" => {
                        if let Ok(cmd) =
                            serde_json::from_value::<CommandProvision>(event_json.clone())
                        {
                            println!(
                                "📥 Provision command for '{}' (correlation: {:?})",
                                cmd.intent.name, cmd.correlation_id
                            );
                            let ctx = dispatch_ctx.clone();
                            tokio::spawn(async move {
                                match provision(ctx.as_ref(), &cmd.intent).await {
                                    Ok(outcome) => println!(
                                        "✅ Instance '{}' provisioned ({})",
                                        cmd.intent.name, outcome.instance_ref
                                    ),
                                    Err(err) => eprintln!(
                                        "❌ Provisioning '{}' failed: {}",
                                        cmd.intent.name, err
                                    ),
                                }
                            });
                        }
                    }
                    "CMD:DESTROY" => {
                        if let Ok(cmd) =
                            serde_json::from_value::<CommandDestroy>(event_json.clone())
                        {
                            println!(
                                "📥 Destroy command for {} (correlation: {:?})",
                                cmd.instance_ref, cmd.correlation_id
                            );
                            let lifecycle = dispatch_lifecycle.clone();
                            tokio::spawn(async move {
                                if let Err(err) =
                                    lifecycle.destroy_instance(&cmd.instance_ref).await
                                {
                                    eprintln!(
                                        "❌ Destroy of {} failed: {}",
                                        cmd.instance_ref, err
                                    );
                                }
                            });
                        }
                    }
                    "CMD:ATTACH_VOLUME" => {
                        if let Ok(cmd) =
                            serde_json::from_value::<CommandAttachVolume>(event_json.clone())
                        {
                            let lifecycle = dispatch_lifecycle.clone();
                            tokio::spawn(async move {
                                if let Err(err) = lifecycle
                                    .attach_volume(
                                        &cmd.instance_ref,
                                        &cmd.volume_ref,
                                        cmd.device.as_deref(),
                                    )
                                    .await
                                {
                                    eprintln!(
                                        "❌ Attach of {} to {} failed: {}",
                                        cmd.volume_ref, cmd.instance_ref, err
                                    );
                                }
                            });
                        }
                    }
                    "CMD:DETACH_VOLUME" => {
                        if let Ok(cmd) =
                            serde_json::from_value::<CommandDetachVolume>(event_json.clone())
                        {
                            let lifecycle = dispatch_lifecycle.clone();
                            tokio::spawn(async move {
                                if let Err(err) = lifecycle
                                    .detach_volume(&cmd.instance_ref, &cmd.volume_ref)
                                    .await
                                {
                                    eprintln!(
                                        "❌ Detach of {} from {} failed: {}",
                                        cmd.volume_ref, cmd.instance_ref, err
                                    );
                                }
                            });
                        }
                    }
                    _ => eprintln!("⚠️  Unknown event type: {}", event_type),
                }
            }
        }
    });

    // Admin API (internal health/debug only)
    let app = admin_router(AppState {
        store: store.clone(),
        audit: audit.clone(),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], 8001));
    println!("Orchestrator listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
