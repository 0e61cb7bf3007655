mod config;

use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use client_core::{
    dashboard::DashboardSource,
    lifecycle::{ChangeOrigin, ClaimConfirmer, StatusObserver},
    resolve_identity,
    sighting::{CapturedFrame, Detection, SightingOptions},
    ClaimOutcome, DashboardController, DashboardError, HttpRescueApi, Navigator,
    RefreshOutcome, ReportLifecycleCoordinator, RescueApi, SessionContext, SessionOptions,
    SightingOutcome, SightingReporter, StatusChange, StatusReconciler,
};
use shared::{
    domain::{AccountType, ActorId, ReportId},
    protocol::UserInfo,
};
use storage::{KeyValueStore, SqliteStore};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{load_settings, prepare_database_url, Settings};

const REPORT_DETAIL_ROUTE: &str = "ReportDetail";

#[derive(Parser, Debug)]
#[command(name = "rescue", about = "Rescue coordination client")]
struct Args {
    /// Backend base URL; overrides rescue.toml and the environment.
    #[arg(long, global = true)]
    api_url: Option<String>,
    #[arg(long, global = true)]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store the signed-in account locally.
    SignIn {
        #[arg(long)]
        role: AccountType,
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        token: Option<String>,
    },
    SignOut,
    /// Refresh and print the dashboard for the signed-in account.
    Dashboard {
        #[arg(long, default_value = "ngo")]
        role: AccountType,
    },
    /// Claim reports, then follow their status until they close.
    Accept {
        #[arg(long = "report", required = true)]
        reports: Vec<String>,
        #[arg(long, default_value = "user")]
        role: AccountType,
        /// Act as this id instead of the signed-in account.
        #[arg(long)]
        actor: Option<String>,
        #[arg(long)]
        yes: bool,
        /// Reconcile passes to run; 0 follows until interrupted.
        #[arg(long, default_value_t = 1)]
        passes: u32,
    },
    /// Upload a camera frame if it shows a tracked animal.
    Sighting {
        #[arg(long)]
        image: PathBuf,
        /// Detector output as `label:confidence`, e.g. `dog:0.82`.
        #[arg(long = "label")]
        labels: Vec<String>,
    },
}

/// Prints navigation requests; the terminal has no screens to switch.
struct TerminalNavigator;

impl Navigator for TerminalNavigator {
    fn replace(&self, screen: &str) {
        info!(screen, "nav: replace");
        println!("-> {screen}");
    }

    fn reset(&self, index: usize, routes: &[String]) {
        info!(index, ?routes, "nav: reset");
        if let Some(route) = routes.get(index) {
            println!("-> {route}");
        }
    }

    fn navigate(&self, screen: &str, params: serde_json::Value) {
        info!(screen, %params, "nav: navigate");
        println!("-> {screen} {params}");
    }
}

struct PromptConfirmer {
    assume_yes: bool,
}

#[async_trait]
impl ClaimConfirmer for PromptConfirmer {
    async fn confirm(&self, report_id: &ReportId, actor_id: &ActorId) -> bool {
        if self.assume_yes {
            return true;
        }
        let mut stdout = tokio::io::stdout();
        let prompt = format!("Accept report {report_id} as {actor_id}? [y/N] ");
        if stdout.write_all(prompt.as_bytes()).await.is_err() || stdout.flush().await.is_err() {
            return false;
        }
        let mut answer = String::new();
        let mut stdin = BufReader::new(tokio::io::stdin());
        match stdin.read_line(&mut answer).await {
            Ok(_) => matches!(answer.trim(), "y" | "Y" | "yes"),
            Err(err) => {
                warn!(error = %err, "claim: failed to read confirmation");
                false
            }
        }
    }
}

/// Opens the report detail screen when a claimed report is closed remotely.
struct ClosedReportObserver {
    navigator: Arc<dyn Navigator>,
}

impl StatusObserver for ClosedReportObserver {
    fn status_changed(&self, change: &StatusChange) -> Result<()> {
        if change.origin == ChangeOrigin::Remote && change.current.is_terminal() {
            self.navigator.navigate(
                REPORT_DETAIL_ROUTE,
                serde_json::json!({
                    "report_id": change.report_id,
                    "status": change.current,
                }),
            );
        }
        Ok(())
    }
}

struct App {
    settings: Settings,
    session: SessionContext,
    api: Arc<HttpRescueApi>,
}

impl App {
    async fn open(args: &Args) -> Result<Self> {
        let mut settings = load_settings();
        if let Some(api_url) = &args.api_url {
            settings.api_url = api_url.clone();
        }
        if let Some(database_url) = &args.database_url {
            settings.database_url = database_url.clone();
        }

        let database_url = prepare_database_url(&settings.database_url)?;
        let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::new(&database_url).await?);
        let api = HttpRescueApi::with_timeout(&settings.api_url, settings.request_timeout())?
            .with_token_store(store.clone());
        info!(api_url = %api.base_url(), database_url = %database_url, "rescue: client ready");

        let session = SessionContext::with_options(
            store,
            Arc::new(TerminalNavigator),
            SessionOptions {
                logout_delay: settings.logout_delay(),
                ..SessionOptions::default()
            },
        );
        Ok(Self {
            settings,
            session,
            api: Arc::new(api),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();
    let app = App::open(&args).await?;

    match args.command {
        Command::SignIn {
            role,
            id,
            name,
            email,
            token,
        } => {
            let info = UserInfo {
                account_type: role,
                entity_id: Some(ActorId::new(id)),
                name,
                email,
            };
            app.session.sign_in(&info, token.as_deref()).await?;
            println!("Signed in as {role}");
        }
        Command::SignOut => {
            app.session.sign_out().await?;
            println!("Signed out");
        }
        Command::Dashboard { role } => show_dashboard(&app, role).await?,
        Command::Accept {
            reports,
            role,
            actor,
            yes,
            passes,
        } => accept_and_follow(&app, reports, role, actor, yes, passes).await?,
        Command::Sighting { image, labels } => report_sighting(&app, image, &labels).await?,
    }

    Ok(())
}

async fn show_dashboard(app: &App, role: AccountType) -> Result<()> {
    let api: Arc<dyn RescueApi> = app.api.clone();
    let controller = DashboardController::new(api, app.session.clone(), role);

    let view = match controller.refresh().await {
        Ok(RefreshOutcome::Updated(view)) => view,
        Ok(RefreshOutcome::Skipped) => return Ok(()),
        Err(DashboardError::SessionExpired { message }) => {
            println!("Session expired. Please log in again. ({message})");
            app.session.wait_for_logout().await;
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    println!("{} ({})", view.profile.name, view.identity.actor_id);
    let stats = &view.stats;
    println!(
        "reports: total {} / active {} / completed {} / pending {}",
        stats.total_reports.unwrap_or_default(),
        stats.active_reports.unwrap_or_default(),
        stats.completed_reports.unwrap_or_default(),
        stats.pending_reports.unwrap_or_default(),
    );
    if let Some(rate) = stats.success_rate {
        println!("success rate: {rate:.1}%");
    }
    println!("notifications: {}", view.notification_count);
    for source in [DashboardSource::Profile, DashboardSource::Stats] {
        if !view.is_live(source) {
            println!("({} unavailable; showing placeholders)", source.as_str());
        }
    }
    Ok(())
}

async fn accept_and_follow(
    app: &App,
    reports: Vec<String>,
    role: AccountType,
    actor: Option<String>,
    yes: bool,
    passes: u32,
) -> Result<()> {
    let actor_id = match actor {
        Some(actor) => ActorId::new(actor),
        None => resolve_identity(app.session.store().as_ref(), role)
            .await
            .context("no signed-in account; run sign-in or pass --actor")?
            .actor_id,
    };

    let coordinator = Arc::new(ReportLifecycleCoordinator::with_confirmer(Arc::new(
        PromptConfirmer { assume_yes: yes },
    )));
    coordinator
        .add_observer(Arc::new(ClosedReportObserver {
            navigator: app.session.navigator().clone(),
        }))
        .await;

    let mut changes = BroadcastStream::new(coordinator.subscribe());
    let printer = tokio::spawn(async move {
        while let Some(change) = changes.next().await {
            match change {
                Ok(change) => println!(
                    "{}: {} -> {}",
                    change.report_id, change.previous, change.current
                ),
                Err(err) => warn!(error = %err, "status: change stream lagged"),
            }
        }
    });

    let mut claimed = 0;
    for report in reports {
        let report_id = ReportId::new(report);
        match coordinator.accept_report(&report_id, &actor_id).await {
            Ok(ClaimOutcome::Claimed(record)) => {
                claimed += 1;
                println!("Claimed {} (claim {})", record.report_id, record.claim_id);
            }
            Ok(ClaimOutcome::AlreadyClaimed(_)) => println!("{report_id} already claimed"),
            Ok(ClaimOutcome::InFlight) => println!("{report_id} claim already in progress"),
            Err(err) => println!("{report_id}: {err}"),
        }
    }
    if claimed == 0 {
        printer.abort();
        bail!("no reports were claimed");
    }

    let api: Arc<dyn RescueApi> = app.api.clone();
    let reconciler =
        Arc::new(StatusReconciler::new(coordinator.clone(), api).with_session(app.session.clone()));

    if passes == 0 {
        let mut handle = reconciler.clone().spawn(app.settings.reconcile_interval());
        let abort = handle.abort_handle();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => abort.abort(),
            _ = &mut handle => app.session.wait_for_logout().await,
        }
    } else {
        for pass in 0..passes {
            if pass > 0 {
                tokio::time::sleep(app.settings.reconcile_interval()).await;
            }
            if let Err(err) = reconciler.reconcile_once().await {
                println!("Session expired. Please log in again. ({err})");
                let _ = app.session.expire();
                app.session.wait_for_logout().await;
                break;
            }
        }
    }

    for divergence in reconciler.divergences().await {
        println!(
            "{}: claimed locally but backend still reports {}",
            divergence.report_id, divergence.remote
        );
    }
    printer.abort();
    Ok(())
}

fn parse_detection(raw: &str) -> Result<Detection> {
    let Some((label, confidence)) = raw.rsplit_once(':') else {
        bail!("expected label:confidence, got '{raw}'");
    };
    let confidence: f32 = confidence
        .trim()
        .parse()
        .with_context(|| format!("invalid confidence in '{raw}'"))?;
    Ok(Detection::new(label.trim(), confidence))
}

async fn report_sighting(app: &App, image: PathBuf, labels: &[String]) -> Result<()> {
    let detections = labels
        .iter()
        .map(|raw| parse_detection(raw))
        .collect::<Result<Vec<_>>>()?;
    let jpeg = tokio::fs::read(&image)
        .await
        .with_context(|| format!("failed to read '{}'", image.display()))?;

    let api: Arc<dyn RescueApi> = app.api.clone();
    let reporter = SightingReporter::with_options(
        api,
        SightingOptions {
            cooldown: app.settings.sighting_cooldown(),
            ..SightingOptions::default()
        },
    );
    match reporter.report(CapturedFrame::now(jpeg), &detections).await? {
        SightingOutcome::Sent { status, filename } => {
            println!("Uploaded {filename} (status {status})")
        }
        SightingOutcome::NoAnimal => println!("No tracked animal in frame"),
        SightingOutcome::CoolingDown { remaining } => {
            println!("Skipped; next upload in {}ms", remaining.as_millis())
        }
    }
    Ok(())
}
