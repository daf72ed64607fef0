use std::sync::Arc;

use mailsift::classifier::{Classifier, ZeroShotClassifier};
use mailsift::config::{ClassifierConfig, IngestConfig, MailApiConfig};
use mailsift::ingest::IngestionOrchestrator;
use mailsift::mail::watch::spawn_watch_renewal;
use mailsift::mail::{GmailHistory, GmailMessages, StaticTokenSource, TokenSource};
use mailsift::rules::RuleRepository;
use mailsift::server::{AppState, api_routes};
use mailsift::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let port: u16 = std::env::var("MAILSIFT_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .unwrap_or(8080);

    eprintln!("📬 mailsift v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Webhook: http://0.0.0.0:{}/api/v1/gmail-webhook", port);
    eprintln!("   Results: http://0.0.0.0:{}/api/v1/processed-emails", port);
    eprintln!("   Rules:   http://0.0.0.0:{}/api/v1/rules\n", port);

    // ── Database ─────────────────────────────────────────────────────────
    let db_path =
        std::env::var("MAILSIFT_DB_PATH").unwrap_or_else(|_| "./data/mailsift.db".to_string());

    let db_path_ref = std::path::Path::new(&db_path);
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(db_path_ref)
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: Failed to open database at {}: {}", db_path, e);
                std::process::exit(1);
            }),
    );
    eprintln!("   Database: {}", db_path);

    // ── Classifier ───────────────────────────────────────────────────────
    let classifier_config = ClassifierConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        eprintln!("  export HF_API_TOKEN=hf_...");
        std::process::exit(1);
    });
    eprintln!("   Classifier: {}", classifier_config.endpoint);
    let classifier: Arc<dyn Classifier> = Arc::new(ZeroShotClassifier::new(classifier_config)?);

    // ── Mail API ─────────────────────────────────────────────────────────
    let mail_config = MailApiConfig::from_env()?;
    let gmail_token = std::env::var("MAILSIFT_GMAIL_TOKEN").unwrap_or_else(|_| {
        eprintln!("Error: MAILSIFT_GMAIL_TOKEN not set");
        eprintln!("  export MAILSIFT_GMAIL_TOKEN=ya29....");
        std::process::exit(1);
    });
    let tokens: Arc<dyn TokenSource> = Arc::new(StaticTokenSource::new(
        secrecy::SecretString::from(gmail_token),
    ));

    let history = Arc::new(GmailHistory::new(mail_config.clone(), Arc::clone(&tokens))?);
    let messages = Arc::new(GmailMessages::new(mail_config.clone(), Arc::clone(&tokens))?);

    // ── Watch renewal ────────────────────────────────────────────────────
    if mail_config.watch_topic.is_some() {
        eprintln!(
            "   Watch renewal: every {}s",
            mail_config.watch_renew_interval.as_secs()
        );
        let _watch_handle =
            spawn_watch_renewal(mail_config.clone(), Arc::clone(&tokens), Arc::clone(&db));
    } else {
        eprintln!("   Watch renewal: disabled (GMAIL_WATCH_TOPIC not set)");
    }

    // ── Orchestrator + server ────────────────────────────────────────────
    let orchestrator = Arc::new(IngestionOrchestrator::new(
        Arc::clone(&db),
        classifier,
        history,
        messages,
        IngestConfig::default(),
    ));

    let state = AppState {
        orchestrator,
        db: Arc::clone(&db),
        rules: RuleRepository::new(Arc::clone(&db)),
    };
    let app = api_routes(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    tracing::info!(port, "mailsift server started");
    axum::serve(listener, app).await?;

    Ok(())
}
