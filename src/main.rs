//! ircbnc - IRC bouncer daemon.

use std::cell::RefCell;
use std::rc::Rc;

use bnc_proto::LineParser;
use ircbnc::bnc::{Bnc, BncDeps};
use ircbnc::bus::MessageBus;
use ircbnc::config::{validate, Config};
use ircbnc::scheduler::{throttle, Component, RunOutcome, Scheduler};
use ircbnc::timer::{Clock, SystemClock};
use ircbnc::upstream::UpstreamNetwork;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if std::env::var("IRCBNC_LOG_JSON").is_ok_and(|v| v == "1") {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ircbnc.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    if let Err(problems) = validate(&config) {
        for problem in &problems {
            warn!(problem = %problem, "Config problem");
        }
    }

    info!(
        server = %config.irc.bnc.server_name,
        networks = config.irc.networks.len(),
        "Starting ircbnc"
    );

    let bus = Rc::new(MessageBus::new());
    let parser = Rc::new(LineParser::new());
    let clock: Rc<dyn Clock> = Rc::new(SystemClock);

    let mut scheduler = Scheduler::new(throttle::from_config(
        config.scheduler.throttle,
        config.scheduler.tick(),
    ));

    let bnc = Bnc::new(
        config.irc.bnc.clone(),
        BncDeps {
            bus: Rc::clone(&bus),
            parser: Rc::clone(&parser),
            clock: Rc::clone(&clock),
        },
    )?;
    let bnc: Component = Rc::new(RefCell::new(bnc));
    scheduler.add(bnc, Some("bnc"));

    for network in &config.irc.networks {
        let alias = format!("net:{}", network.name);
        let upstream = UpstreamNetwork::new(
            network.clone(),
            Rc::clone(&bus),
            Rc::clone(&parser),
            Rc::clone(&clock),
        )?;
        let upstream: Component = Rc::new(RefCell::new(upstream));
        scheduler.add(upstream, Some(&alias));
    }

    match scheduler.run() {
        RunOutcome::Stopped => info!("Scheduler stopped"),
        RunOutcome::Exhausted => warn!("No components left, exiting"),
    }
    Ok(())
}
