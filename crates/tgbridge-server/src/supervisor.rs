//! Wires the components together and runs the scheduled polling loop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tgbridge_core::AppConfig;
use tgbridge_tgtg::user_agent::{build_user_agent, FALLBACK_APP_VERSION};
use tgbridge_tgtg::{AppVersionChecker, ClientOptions, Session, TgtgClient};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::discovery::{SwitchConfig, Topics};
use crate::error::ScheduleError;
use crate::humanize::Locale;
use crate::intense::IntenseFetchController;
use crate::known_shops::KnownShops;
use crate::marketplace::Marketplace;
use crate::poll::{FavouriteSet, PollEngine, PollOptions};
use crate::schedule::ScheduleSpec;
use crate::scheduler::{self, SalesWindowScheduler};
use crate::token_store::TokenStore;
use crate::transport::{IntenseCommand, MqttTransport, Transport};
use crate::watchdog::{exit_process, Watchdog};

const COMMAND_CHANNEL_CAPACITY: usize = 8;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs the bridge until `shutdown` is cancelled.
///
/// # Errors
///
/// Returns an error for the fatal startup conditions: an invalid schedule,
/// an unusable data directory, or a failed initial login.
pub async fn run(config: AppConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    let schedule = ScheduleSpec::from_source(&config.schedule, config.randomize_calls)
        .context("invalid polling schedule")?;

    std::fs::create_dir_all(&config.data_dir).with_context(|| {
        format!("failed to create data directory {}", config.data_dir.display())
    })?;

    let checker = Arc::new(AppVersionChecker::new(Duration::from_secs(
        config.request_timeout_secs,
    ))?);
    let latest_version = match checker.latest_version().await {
        Ok(version) => Some(version),
        Err(e) => {
            tracing::warn!(
                error = %e,
                fallback = FALLBACK_APP_VERSION,
                "app version lookup failed, using fallback version"
            );
            None
        }
    };

    let tokens = Arc::new(TokenStore::new(
        &config.data_dir,
        latest_version.as_deref().unwrap_or(FALLBACK_APP_VERSION),
    ));
    let bundle = tokens.load_usable().context("failed to read token file")?;
    let session = match bundle.as_ref().and_then(|b| b.to_session()) {
        Some(session) => {
            tracing::info!(path = %tokens.path().display(), "loaded tokens from file");
            session
        }
        None => seed_session(&config, &tokens.client_version()),
    };

    let client = Arc::new(TgtgClient::new(ClientOptions {
        email: config.email.clone(),
        language: config.language.clone(),
        timeout: Duration::from_secs(config.request_timeout_secs),
        session,
    })?);
    let marketplace: Arc<dyn Marketplace> = client;

    if let (Some(_), Some(latest)) = (&bundle, &latest_version) {
        if let Err(e) = tokens.apply_latest_version(marketplace.as_ref(), latest) {
            tracing::error!(error = %e, "failed to persist rebuilt session");
        }
    }

    marketplace.login().await.context("login failed")?;
    if let Err(e) = tokens.save_session(&marketplace.session()) {
        tracing::error!(error = %e, "failed to write token file");
    }

    let now = Utc::now().with_timezone(&config.timezone);
    let watchdog = Watchdog::start(
        schedule.watchdog_timeout(now, marketplace.request_timeout())?,
        exit_process(),
    );

    let topics = Topics::new(config.mqtt.discovery_prefix.clone());
    let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let (mqtt, pump) = MqttTransport::connect(
        &config.mqtt,
        topics.intense_command(),
        command_tx.clone(),
        shutdown.child_token(),
    );
    let mqtt = Arc::new(mqtt);
    let transport: Arc<dyn Transport> = Arc::clone(&mqtt) as Arc<dyn Transport>;

    if !mqtt.wait_connected(CONNECT_TIMEOUT).await {
        tracing::warn!(
            host = %config.mqtt.host,
            port = config.mqtt.port,
            "MQTT broker not reachable yet, publishes fail until it is"
        );
    }
    if config.intense_fetch.is_some() {
        announce_intense_switch(transport.as_ref(), &topics).await;
    }

    let jobs = scheduler::build_scheduler(
        checker,
        Arc::clone(&tokens),
        Arc::clone(&marketplace),
        config.timezone,
    )
    .await?;

    let favourites = FavouriteSet::default();
    let mut engine = PollEngine::new(
        Arc::clone(&marketplace),
        Arc::clone(&transport),
        Arc::clone(&tokens),
        KnownShops::new(&config.data_dir),
        topics.clone(),
        favourites.clone(),
        PollOptions {
            cleanup: config.cleanup,
            publish_orders: config.publish_orders,
            timezone: config.timezone,
            locale: Locale::from_tag(&config.locale),
        },
    );
    if config.enable_auto_intense_fetch {
        let sales = SalesWindowScheduler::new(
            Arc::clone(&marketplace),
            favourites,
            command_tx,
            jobs.clone(),
            config.timezone,
        );
        engine = engine.on_first_success(move || {
            tokio::spawn(async move {
                if let Err(e) = sales.start().await {
                    tracing::error!(error = %e, "failed to start sales window checks");
                }
            });
        });
    }
    let engine = Arc::new(Mutex::new(engine));

    let intense = IntenseFetchController::new(
        Arc::clone(&engine),
        Arc::clone(&transport),
        topics,
        config.intense_fetch,
    );
    let commands = tokio::spawn(handle_commands(
        command_rx,
        intense.clone(),
        shutdown.child_token(),
    ));

    tracing::info!("starting loop");
    let result = poll_loop(
        &schedule,
        &engine,
        &intense,
        &watchdog,
        marketplace.as_ref(),
        config.timezone,
        &shutdown,
    )
    .await;

    tracing::info!("shutting down");
    watchdog.stop();
    let mut jobs = jobs;
    if let Err(e) = jobs.shutdown().await {
        tracing::warn!(error = %e, "scheduler shutdown failed");
    }
    intense.stop().await;
    commands.abort();
    mqtt.disconnect();
    shutdown.cancel();
    if let Err(e) = pump.await {
        tracing::debug!(error = %e, "MQTT event loop task ended abnormally");
    }

    result
}

/// Tokens from configuration, or none, with a fresh user agent.
fn seed_session(config: &AppConfig, app_version: &str) -> Session {
    let mut session = Session::anonymous(build_user_agent(app_version));
    if let Some(seed) = &config.token_seed {
        tracing::info!("using tokens from configuration");
        session.access_token = Some(seed.access_token.clone());
        session.refresh_token = Some(seed.refresh_token.clone());
        session.user_id.clone_from(&seed.user_id);
        session.cookie.clone_from(&seed.cookie);
    }
    session
}

/// Subscribes to the switch command topic and publishes its descriptor in
/// the `OFF` state.
async fn announce_intense_switch(transport: &dyn Transport, topics: &Topics) {
    if let Err(e) = transport.subscribe(&topics.intense_command()).await {
        tracing::error!(error = %e, "failed to subscribe to intense fetch commands");
    }
    match serde_json::to_string(&SwitchConfig::intense_fetch(topics)) {
        Ok(config) => {
            if let Err(e) = transport.publish(&topics.intense_config(), config, true).await {
                tracing::error!(error = %e, "failed to publish intense fetch switch");
            }
        }
        Err(e) => tracing::error!(error = %e, "failed to encode intense fetch switch"),
    }
    if let Err(e) = transport
        .publish(&topics.intense_state(), "OFF".to_string(), false)
        .await
    {
        tracing::error!(error = %e, "failed to publish intense fetch state");
    }
}

async fn handle_commands(
    mut commands: mpsc::Receiver<IntenseCommand>,
    intense: IntenseFetchController,
    shutdown: CancellationToken,
) {
    loop {
        let command = tokio::select! {
            () = shutdown.cancelled() => break,
            command = commands.recv() => command,
        };
        match command {
            Some(IntenseCommand::On) => {
                intense.start();
            }
            Some(IntenseCommand::Off) => {
                intense.stop().await;
            }
            None => break,
        }
    }
}

/// Sleeps until each scheduled run and ticks.
async fn poll_loop(
    schedule: &ScheduleSpec,
    engine: &Mutex<PollEngine>,
    intense: &IntenseFetchController,
    watchdog: &Watchdog,
    marketplace: &dyn Marketplace,
    timezone: chrono_tz::Tz,
    shutdown: &CancellationToken,
) -> anyhow::Result<()> {
    loop {
        let next = schedule.next_run(Utc::now().with_timezone(&timezone))?;
        tracing::info!(next_run = %next.at, "next run scheduled");
        tokio::select! {
            () = shutdown.cancelled() => return Ok(()),
            () = tokio::time::sleep(next.delay) => {}
        }

        scheduled_tick(schedule, engine, intense, watchdog, marketplace, timezone).await?;
    }
}

/// Polls unless an intense fetch is active, then re-arms the watchdog for
/// the next scheduled run plus the client's request timeout.
///
/// Returns whether a poll cycle ran.
async fn scheduled_tick(
    schedule: &ScheduleSpec,
    engine: &Mutex<PollEngine>,
    intense: &IntenseFetchController,
    watchdog: &Watchdog,
    marketplace: &dyn Marketplace,
    timezone: chrono_tz::Tz,
) -> Result<bool, ScheduleError> {
    tracing::debug!("loop run started");
    let ran = if intense.is_running() {
        tracing::info!("skipping scheduled run, intense fetch is running");
        false
    } else {
        if engine.lock().await.run_cycle().await {
            tracing::debug!("loop run finished");
        } else {
            tracing::error!("loop run was not successful");
        }
        true
    };

    let timeout = schedule.watchdog_timeout(
        Utc::now().with_timezone(&timezone),
        marketplace.request_timeout(),
    )?;
    watchdog.reset(Some(timeout));
    Ok(ran)
}
