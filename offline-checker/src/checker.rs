use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::config::{Config, Timeouts};
use crate::delta::Delta;
use crate::ident::{DeviceKey, MacAddress};
use crate::snapshot::{Dcs, Snapshot, Source};
use crate::state::State;
use crate::{email, report};

/// Everything learned during one check.
#[derive(Clone, Debug)]
pub struct Run {
    pub now: DateTime<Utc>,
    /// When the previous check ran, `now` if unknown.
    pub last_run: DateTime<Utc>,
    pub snapshot: Snapshot,
    pub controllers: Delta<MacAddress>,
    pub devices: Delta<DeviceKey>,
}

impl Run {
    pub fn has_changes(&self) -> bool {
        self.controllers.has_changes() || self.devices.has_changes()
    }

    /// What to remember for the next check.
    pub fn next_state(&self) -> State {
        State {
            last_run: Some(self.now),
            offline_idcs: self.controllers.offline.clone(),
            ignored_idcs: self.controllers.ignored.clone(),
            offline_devices: self.devices.offline.clone(),
            ignored_devices: self.devices.ignored.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Options {
    /// Write the state file after reporting
    pub save_state: bool,
    /// Allow the report email to be sent, subject to the email config
    pub send_email: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            save_state: true,
            send_email: true,
        }
    }
}

/// Fetch a snapshot from `source` and compare it with `state`.
pub async fn check<S>(source: &S, state: &State, timeouts: &Timeouts, now: DateTime<Utc>) -> Run
where
    S: Source + ?Sized,
{
    let snapshot = Snapshot::collect(source, &state.offline_devices, &state.ignored_devices).await;

    let controllers = Delta::evaluate(
        snapshot.controllers.values(),
        now,
        timeouts.idc,
        &state.offline_idcs,
        &state.ignored_idcs,
    );
    info!(
        new = controllers.newly_offline.len(),
        still = controllers.still_offline.len(),
        recovered = controllers.recovered.len(),
        ignored = controllers.ignored.len(),
        "Checked IDCs"
    );

    let devices = Delta::evaluate(
        snapshot.devices.values(),
        now,
        timeouts.device,
        &state.offline_devices,
        &state.ignored_devices,
    );
    info!(
        new = devices.newly_offline.len(),
        still = devices.still_offline.len(),
        recovered = devices.recovered.len(),
        ignored = devices.ignored.len(),
        "Checked Modbus devices"
    );

    Run {
        now,
        last_run: state.last_run_or(now),
        snapshot,
        controllers,
        devices,
    }
}

/// Write the HTML report, send the email if warranted, then save the state.
///
/// Reporting failures are logged and do not stop the state from being saved.
pub async fn finish(config: &Config, options: &Options, run: &Run) -> crate::Result<()> {
    let html = report::render(run, &config.dcs, config.email.show_ignored);

    match std::fs::write(&config.output.html, &html) {
        Ok(()) => info!(path = %config.output.html.display(), "Wrote report"),
        Err(error) => error!(path = %config.output.html.display(), %error, "Failed to write report"),
    }

    if options.send_email && email::should_send(run, &config.email) {
        if let Err(error) = email::deliver(config, html).await {
            error!(%error, "Failed to send report email");
        }
    } else {
        info!("No email sent");
    }

    if options.save_state {
        run.next_state().save(&config.state, &run.snapshot)?;
    }
    Ok(())
}

/// One complete check against the configured DCS.
pub async fn run(config: &Config, options: &Options) -> crate::Result<()> {
    let state = State::load(&config.state)?;

    let dcs = Dcs::connect(&config.dcs).await;
    let run = check(&dcs, &state, &config.timeouts, Utc::now()).await;
    dcs.logout().await;

    finish(config, options, &run).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeviceKind, DeviceStatus};
    use crate::testing::{controller, device, mac, FakeSource};
    use chrono::TimeDelta;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;
    use std::path::Path;

    fn config(dir: &Path) -> Config {
        let mut config: Config = r#"
            [dcs]
            url = "https://dcs.example.com/DCS"
            username = "reporter"
            password = "secret"
        "#
        .parse()
        .unwrap();
        config.state = dir.join("state.toml");
        config.output.html = dir.join("report.html");
        config
    }

    fn ago(minutes: i64) -> Option<DateTime<Utc>> {
        Some(Utc::now() - TimeDelta::minutes(minutes))
    }

    #[tokio::test]
    async fn first_run_reports_everything_as_new() {
        let mut a = controller(0xA, "4.0");
        a.last_connected = ago(45);
        let mut dev = device(0xB, 1, DeviceKind::PulseCounter, DeviceStatus::Offline);
        dev.status_changed = ago(60);
        let source = FakeSource::new(vec![a, controller(0xB, "4.0")]).with_devices(vec![dev]);

        let run = check(&source, &State::default(), &Timeouts::default(), Utc::now()).await;

        assert_eq!(run.last_run, run.now);
        assert_eq!(run.controllers.newly_offline, BTreeSet::from([mac(0xA)]));
        assert_eq!(run.devices.newly_offline, BTreeSet::from([DeviceKey::new(mac(0xB), 1)]));
        assert!(run.controllers.recovered.is_empty());
        assert!(run.has_changes());
    }

    #[tokio::test]
    async fn tracks_changes_since_previous_check() {
        let mut a = controller(0xA, "3.0");
        a.last_connected = ago(45);
        let b = controller(0xB, "3.0");
        let mut meter = device(0xB, 2, DeviceKind::Meter, DeviceStatus::Offline);
        meter.status_changed = ago(600);
        let source = FakeSource::new(vec![a, b]).with_devices(vec![
            device(0xB, 1, DeviceKind::PulseCounter, DeviceStatus::Online),
            meter,
        ]);

        let last_run = Utc::now() - TimeDelta::hours(1);
        let state = State {
            last_run: Some(last_run),
            offline_idcs: BTreeSet::from([mac(0xA), mac(0xB)]),
            ignored_idcs: BTreeSet::new(),
            offline_devices: BTreeSet::from([DeviceKey::new(mac(0xB), 1)]),
            ignored_devices: BTreeSet::new(),
        };

        let run = check(&source, &state, &Timeouts::default(), Utc::now()).await;

        assert_eq!(run.last_run, last_run);
        assert_eq!(run.controllers.still_offline, BTreeSet::from([mac(0xA)]));
        assert_eq!(run.controllers.recovered, BTreeSet::from([mac(0xB)]));
        // Fetched because it owns a tracked device, even though its firmware is too old to bother with otherwise
        assert_eq!(source.fetched(), vec![mac(0xB)]);
        assert_eq!(run.devices.recovered, BTreeSet::from([DeviceKey::new(mac(0xB), 1)]));
        assert!(run.devices.offline.is_empty());
    }

    #[tokio::test]
    async fn unreachable_dcs_recovers_everything() {
        let state = State {
            offline_idcs: BTreeSet::from([mac(0xA)]),
            offline_devices: BTreeSet::from([DeviceKey::new(mac(0xA), 1)]),
            ..State::default()
        };

        let run = check(&FakeSource::failing(), &state, &Timeouts::default(), Utc::now()).await;

        assert_eq!(run.controllers.recovered, BTreeSet::from([mac(0xA)]));
        assert_eq!(run.devices.recovered, BTreeSet::from([DeviceKey::new(mac(0xA), 1)]));
    }

    #[tokio::test]
    async fn ignored_entities_are_carried_forward() {
        let mut a = controller(0xA, "3.0");
        a.last_connected = None;
        let source = FakeSource::new(vec![a]);
        let state = State {
            offline_idcs: BTreeSet::from([mac(0xA)]),
            ignored_idcs: BTreeSet::from([mac(0xA), mac(0xF)]),
            ignored_devices: BTreeSet::from([DeviceKey::new(mac(0xF), 9)]),
            ..State::default()
        };

        let run = check(&source, &state, &Timeouts::default(), Utc::now()).await;
        let next = run.next_state();

        assert!(!run.has_changes());
        assert!(next.offline_idcs.is_empty());
        assert_eq!(next.ignored_idcs, state.ignored_idcs);
        assert_eq!(next.ignored_devices, state.ignored_devices);
        assert_eq!(next.last_run, Some(run.now));
    }

    #[tokio::test]
    async fn finish_writes_report_and_state() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let mut a = controller(0xA, "4.0");
        a.last_connected = ago(45);
        let source = FakeSource::new(vec![a]);

        let run = check(&source, &State::default(), &config.timeouts, Utc::now()).await;
        finish(&config, &Options::default(), &run).await.unwrap();

        let html = std::fs::read_to_string(&config.output.html).unwrap();
        assert!(html.contains("*** New Offline IDCs found ***"));

        let saved = State::load(&config.state).unwrap();
        assert_eq!(saved.offline_idcs, BTreeSet::from([mac(0xA)]));
        assert!(saved.last_run.is_some());
    }

    #[tokio::test]
    async fn report_failure_does_not_prevent_saving_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.output.html = dir.path().join("missing").join("report.html");
        let run = check(&FakeSource::new(vec![]), &State::default(), &config.timeouts, Utc::now()).await;

        finish(&config, &Options::default(), &run).await.unwrap();

        assert!(config.state.exists());
    }

    #[tokio::test]
    async fn dry_run_leaves_state_alone() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let run = check(&FakeSource::new(vec![]), &State::default(), &config.timeouts, Utc::now()).await;
        let options = Options {
            save_state: false,
            send_email: false,
        };

        finish(&config, &options, &run).await.unwrap();

        assert!(config.output.html.exists());
        assert!(!config.state.exists());
    }
}
