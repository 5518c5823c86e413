use clap::Parser;
use mesh_commissioner::commissioner::registry::RegistryCursor;
use mesh_commissioner::commissioner::petition::PetitionState;
use mesh_commissioner::commissioner::{Commissioner, EventOutcome};
use mesh_commissioner::config::Config;
use mesh_commissioner::link::LoopbackLink;
use mesh_commissioner::meshcop::{CommissioningState, Eui64};
use mesh_commissioner::sleep::{resync, sleep_budget, HostSleep, SleepControl};
use mesh_commissioner::{CommissionError, InterfaceId};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mesh-commissioner")]
#[command(about = "Thread native commissioner: petition, joiner allow-list and finalisation")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Print the admitted joiners as JSON and exit
    #[arg(long)]
    list_joiners: bool,
}

/// Joiner as printed by `--list-joiners`; the PSKd itself stays private
#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct JoinerReport {
    eui64: Eui64,
    short_eui64: bool,
    pskd_len: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("Warning: Failed to load config from {:?}: {}", cli.config, e);
        eprintln!("Using default configuration");
        Config::default()
    });

    // Initialize tracing/logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    info!("mesh-commissioner v{}", env!("CARGO_PKG_VERSION"));

    let interface_id = config.commissioner.interface_id;
    let (link, mut events) = LoopbackLink::new(
        config.link.secured,
        config.link.network.clone(),
        config.link.leader_verdict,
    );
    let mut commissioner = Commissioner::new(link, config.commissioner.settings());

    let mode = commissioner.register(interface_id)?;
    info!("Interface {} registered in {:?} mode", interface_id, mode);

    for joiner in &config.joiners {
        if let Err(e) = commissioner.device_add(
            interface_id,
            joiner.short_eui64,
            joiner.eui64.as_bytes(),
            joiner.pskd.as_bytes(),
            None,
        ) {
            error!("Skipping joiner {}: {}", joiner.eui64, e);
        }
    }

    if cli.list_joiners {
        let report = joiner_report(&commissioner, interface_id);
        println!("{}", serde_json::to_string_pretty(&report)?);
        commissioner.unregister(interface_id)?;
        return Ok(());
    }

    let steering = commissioner.steering_data(interface_id)?;
    info!("Steering data: {}", hex::encode_upper(steering.as_bytes()));

    let mut ticket = match commissioner.petition_start(
        interface_id,
        &config.commissioner.commissioner_id,
        Some(Box::new(|id: InterfaceId, state: CommissioningState| {
            info!("Interface {}: petition result {}", id, state);
            0
        })),
    ) {
        Ok(ticket) => ticket,
        Err(CommissionError::ScanRequired) => {
            warn!("No network selected; set [link.network] to simulate a completed scan");
            commissioner.unregister(interface_id)?;
            return Err(CommissionError::ScanRequired.into());
        }
        Err(e) => return Err(e.into()),
    };

    let mut host = HostSleep::default();
    let mut answered = false;

    info!(
        "Commissioner running (keep-alive every {:?}). Press Ctrl+C to stop.",
        commissioner.settings().keep_alive_interval
    );
    loop {
        let now = chrono::Utc::now();
        let budget = sleep_budget(&host, commissioner.next_mandatory_wake(now));
        let asleep = budget > 0
            && match host.enter_sleep() {
                Ok(()) => true,
                Err(e) => {
                    debug!("Staying awake: {}", e);
                    false
                }
            };
        let started = tokio::time::Instant::now();

        let keep_running = tokio::select! {
            outcome = &mut ticket, if !answered => {
                answered = true;
                match outcome {
                    Ok(CommissioningState::Accept) => {
                        info!("Commissioner role granted");
                        true
                    }
                    Ok(CommissioningState::Pending) => {
                        info!("Petition pending, waiting for the leader");
                        true
                    }
                    Ok(state) => {
                        warn!("Petition ended with {}, stopping", state);
                        false
                    }
                    Err(e) => {
                        error!("Petition failed: {}", e);
                        false
                    }
                }
            }
            Some(event) = events.recv() => {
                match commissioner.handle_link_event(event, chrono::Utc::now()) {
                    Ok(EventOutcome::Petition(state)) => {
                        info!("Interface {}: petition state {}", interface_id, state);
                        !matches!(state, PetitionState::Rejected | PetitionState::NoNetwork)
                    }
                    Ok(EventOutcome::Finalisation { eui64, decision }) => {
                        info!("Joiner {} finalisation {}", eui64, decision);
                        true
                    }
                    Err(e) => {
                        warn!("Ignoring link event: {}", e);
                        true
                    }
                }
            }
            _ = tokio::time::sleep(Duration::from_millis(budget as u64)) => {
                let now = chrono::Utc::now();
                let due = commissioner
                    .next_keep_alive_due(interface_id)
                    .is_some_and(|due| due <= now);
                if !commissioner.check_keep_alive_expiry(now).is_empty() {
                    error!("Commissioner session expired");
                    false
                } else if !due {
                    true
                } else if let Err(e) = commissioner.petition_keep_alive(
                    interface_id,
                    CommissioningState::Accept,
                    now,
                ) {
                    error!("Keep-alive failed: {}", e);
                    false
                } else {
                    true
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                false
            }
        };

        if asleep {
            let slept = started.elapsed();
            match resync(&mut host, slept) {
                Ok(outcome) => debug!("Woke after {:?}: {:?}", slept, outcome),
                Err(e) => warn!("Timer resync after sleep failed: {}", e),
            }
        }
        if !keep_running {
            break;
        }
    }

    commissioner.unregister(interface_id)?;
    Ok(())
}

fn joiner_report(
    commissioner: &Commissioner<LoopbackLink>,
    interface_id: InterfaceId,
) -> Vec<JoinerReport> {
    let mut report = Vec::new();
    let mut cursor = RegistryCursor::start();
    while let Some((info, next)) = commissioner.device_get_next(interface_id, &cursor) {
        report.push(JoinerReport {
            eui64: info.eui64,
            short_eui64: info.short_eui64,
            pskd_len: info.pskd.len(),
        });
        cursor = next;
    }
    report
}
