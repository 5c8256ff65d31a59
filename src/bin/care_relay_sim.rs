//! care-relay simulator
//!
//! Runs one patient device and one caregiver console against an in-process
//! store: the patient presses a button, the caregiver sees the alert and
//! responds, and the patient hears the announcement. Device output is
//! logged through `tracing`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing_subscriber::EnvFilter;

use care_relay::{
    AlertId, AlertType, CaregiverAction, CaregiverConsole, FeedbackSinks, IdentityResolver, InMemoryKeyValueStore,
    InMemoryRealtimeStore, KeyValueStore, PatientDevice, PatientId, RelayConfig, RelayError, RelayResult,
    SubscriptionError,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliAlert {
    Water,
    Bathroom,
    Pain,
    Position,
    Urgent,
}

impl From<CliAlert> for AlertType {
    fn from(value: CliAlert) -> Self {
        match value {
            CliAlert::Water => Self::Water,
            CliAlert::Bathroom => Self::Bathroom,
            CliAlert::Pain => Self::Pain,
            CliAlert::Position => Self::Position,
            CliAlert::Urgent => Self::Urgent,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliAction {
    Coming,
    Acknowledged,
}

impl From<CliAction> for CaregiverAction {
    fn from(value: CliAction) -> Self {
        match value {
            CliAction::Coming => Self::Coming,
            CliAction::Acknowledged => Self::Acknowledged,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "care-relay-sim", version, about = "Simulate a patient alert and caregiver response")]
struct Cli {
    /// JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Pair both devices on this patient id instead of a generated one.
    #[arg(long)]
    patient_id: Option<String>,

    /// Display name written into the alert.
    #[arg(long, default_value = "Patient")]
    patient_name: String,

    /// Button the patient presses.
    #[arg(long, value_enum, default_value = "urgent")]
    alert: CliAlert,

    /// How the caregiver responds.
    #[arg(long, value_enum, default_value = "coming")]
    action: CliAction,

    /// Caregiver name recorded on the acknowledgement.
    #[arg(long, default_value = "Caregiver")]
    caregiver: String,

    /// Directory for the patient's durable local storage.
    #[cfg(feature = "persistent")]
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// How long to wait for each hop.
    #[arg(long, default_value_t = 5_000)]
    timeout_ms: u64,
}

fn local_store(cli: &Cli) -> RelayResult<Arc<dyn KeyValueStore>> {
    #[cfg(feature = "persistent")]
    {
        if let Some(dir) = &cli.data_dir {
            let store = care_relay::FileKeyValueStore::open(dir).map_err(|source| {
                care_relay::IdentityError::LocalStore {
                    key: dir.display().to_string(),
                    source,
                }
            })?;
            return Ok(Arc::new(store));
        }
    }
    let _ = cli;
    Ok(Arc::new(InMemoryKeyValueStore::new()))
}

async fn wait_for<T>(rx: &mut mpsc::UnboundedReceiver<T>, limit: Duration) -> RelayResult<T> {
    let timed_out = || {
        RelayError::Subscription(SubscriptionError::Timeout {
            duration_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        })
    };
    match timeout(limit, rx.recv()).await {
        Ok(Some(value)) => Ok(value),
        Ok(None) => Err(RelayError::internal("delivery channel closed")),
        Err(_) => Err(timed_out()),
    }
}

async fn run(cli: Cli) -> RelayResult<()> {
    let mut config = match &cli.config {
        Some(path) => RelayConfig::from_path(path)?,
        None => RelayConfig::default(),
    };
    if let Some(raw) = &cli.patient_id {
        config.identity.pinned_patient_id = Some(PatientId::new(raw)?.to_string());
    }
    let config = config.validate()?;
    let limit = Duration::from_millis(cli.timeout_ms);

    let store = Arc::new(InMemoryRealtimeStore::try_new(config.store.clone())?);
    let identity = IdentityResolver::from_config(local_store(&cli)?, &config.identity)?;
    identity.set_patient_name(&cli.patient_name)?;

    let patient = PatientDevice::new(&identity, store.clone(), FeedbackSinks::logging(), &config)?;
    let patient_id = patient.patient_id().clone();

    let (response_tx, mut response_rx) = mpsc::unbounded_channel();
    let _responses = patient.listen_for_responses(move |alert_id, response| {
        let _ = response_tx.send((alert_id.clone(), response.clone()));
    })?;

    let console = CaregiverConsole::new(store.clone(), Arc::new(care_relay::LoggingSink), cli.caregiver.clone())
        .with_subscription_config(config.subscription.clone());
    let (alert_tx, mut alert_rx) = mpsc::unbounded_channel::<AlertId>();
    let _alerts = console.connect(&patient_id, move |alerts| {
        for alert in alerts.iter().filter(|a| !a.is_acknowledged()) {
            let _ = alert_tx.send(alert.id.clone());
        }
    })?;

    let sent = patient.press(cli.alert.into()).await?;
    let seen = loop {
        let id = wait_for(&mut alert_rx, limit).await?;
        if id == sent {
            break id;
        }
    };
    tracing::info!(alert_id = %seen, "caregiver sees the alert");

    let action: CaregiverAction = cli.action.into();
    let message = match action {
        CaregiverAction::Coming => "I'm coming!",
        _ => "Seen, will check soon",
    };
    console.respond(&patient_id, &seen, action, message).await?;

    let (alert_id, response) = wait_for(&mut response_rx, limit).await?;
    println!(
        "patient {patient_id}: alert {alert_id} answered with '{}' after {} store writes",
        response.caregiver_action.as_str(),
        store.write_count()
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, retryable = e.is_retryable(), "simulation failed");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
