use crate::infra::AdmissionStore;
use admission_intake::config::AppConfig;
use admission_intake::error::AppError;
use admission_intake::telemetry;
use admission_intake::workflows::admission::{
    AdmissionWave, ExpiryReaper, NewAdmissionWave, WaveId, WaveRepository,
};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Subcommand};
use std::path::PathBuf;
use tracing::warn;

#[derive(Args, Debug, Default)]
pub(crate) struct PruneArgs {
    /// Snapshot file to prune (defaults to ADMISSION_DATA_PATH)
    #[arg(long)]
    pub(crate) data_path: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub(crate) enum WaveCommand {
    /// Register a new, inactive admission wave
    Add(WaveAddArgs),
    /// Make one wave the single active wave
    Activate(WaveActivateArgs),
    /// List every wave with its active flag
    List(WaveListArgs),
}

#[derive(Args, Debug)]
pub(crate) struct WaveAddArgs {
    /// Display title, e.g. "Gelombang 1"
    #[arg(long)]
    pub(crate) title: String,
    /// Academic year label, e.g. "2026/2027"
    #[arg(long)]
    pub(crate) academic_year: String,
    /// First day of the registration window (YYYY-MM-DD)
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) start_date: NaiveDate,
    /// Last day of the registration window (YYYY-MM-DD)
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) end_date: NaiveDate,
    /// Planned intake for the wave
    #[arg(long, default_value_t = 0)]
    pub(crate) quota_target: u32,
    #[arg(long)]
    pub(crate) data_path: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub(crate) struct WaveActivateArgs {
    /// Identifier printed by `wave add` or `wave list`
    pub(crate) id: u64,
    #[arg(long)]
    pub(crate) data_path: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
pub(crate) struct WaveListArgs {
    #[arg(long)]
    pub(crate) data_path: Option<PathBuf>,
}

pub(crate) fn run_prune(args: PruneArgs) -> Result<(), AppError> {
    let store = open_store(args.data_path)?;
    let removed = prune_store(&store, Utc::now())?;
    println!("Pruned {removed} expired draft(s).");
    Ok(())
}

pub(crate) fn run_wave(command: WaveCommand) -> Result<(), AppError> {
    match command {
        WaveCommand::Add(args) => {
            let store = open_store(args.data_path.clone())?;
            let wave = add_wave(&store, args)?;
            println!("Created wave {}: {}", wave.id.0, describe(&wave));
        }
        WaveCommand::Activate(args) => {
            let store = open_store(args.data_path)?;
            let wave = store.activate(WaveId(args.id))?;
            println!("Active wave is now {}: {}", wave.id.0, describe(&wave));
        }
        WaveCommand::List(args) => {
            let store = open_store(args.data_path)?;
            let waves = store.list()?;
            if waves.is_empty() {
                println!("No admission waves registered.");
            }
            for wave in waves {
                let marker = if wave.is_active { "*" } else { " " };
                println!("{marker} {}: {}", wave.id.0, describe(&wave));
            }
        }
    }
    Ok(())
}

fn open_store(data_path: Option<PathBuf>) -> Result<AdmissionStore, AppError> {
    let mut config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;
    if let Some(path) = data_path {
        config.admission.data_path = Some(path);
    }
    if config.admission.data_path.is_none() {
        warn!("no ADMISSION_DATA_PATH configured; operating on an empty in-memory store");
    }
    Ok(AdmissionStore::from_config(&config.admission)?)
}

pub(crate) fn prune_store(store: &AdmissionStore, now: DateTime<Utc>) -> Result<usize, AppError> {
    Ok(ExpiryReaper::new(store).prune(now)?)
}

fn add_wave(store: &AdmissionStore, args: WaveAddArgs) -> Result<AdmissionWave, AppError> {
    let wave = NewAdmissionWave {
        title: args.title,
        academic_year: args.academic_year,
        start_date: args.start_date,
        end_date: args.end_date,
        quota_target: args.quota_target,
    };
    Ok(WaveRepository::insert(store, wave)?)
}

fn describe(wave: &AdmissionWave) -> String {
    format!(
        "{} ({}), {} to {}, quota {}",
        wave.title, wave.academic_year, wave.start_date, wave.end_date, wave.quota_target
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use admission_intake::workflows::admission::{
        DraftId, DraftRepository, Gender, IdentityDetails, NewDraft, RegistrationCode,
        SecretCredential,
    };
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 24, 9, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn finalized(
        store: &AdmissionStore,
        nisn: &str,
        nik: &str,
        expires_at: DateTime<Utc>,
    ) -> DraftId {
        let mut draft = DraftRepository::insert(
            store,
            NewDraft {
                admission_wave_id: None,
                identity: IdentityDetails {
                    full_name: "Dewi Lestari".to_string(),
                    nisn: nisn.to_string(),
                    nik: nik.to_string(),
                    gender: Gender::Female,
                    place_of_birth: "Purwokerto".to_string(),
                    date_of_birth: NaiveDate::from_ymd_opt(2010, 8, 9).expect("valid date"),
                },
                created_at: expires_at - Duration::hours(72),
            },
        )
        .expect("insert");
        draft.registration_code = Some(RegistrationCode(format!("REG-2026-{}", &nisn[5..])));
        draft.secret_credential = Some(SecretCredential::new(format!("credential-{nisn}")));
        draft.expires_at = Some(expires_at);
        store.update(draft.clone()).expect("finalize");
        draft.id
    }

    #[test]
    fn prune_counts_only_lapsed_drafts_and_persists() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("admission.json");
        let store = AdmissionStore::open(&path).expect("store");

        let an_hour = Duration::hours(1);
        let lapsed = finalized(&store, "0010000001", "3301000000000011", now() - an_hour);
        let live = finalized(&store, "0010000002", "3301000000000012", now() + an_hour);

        assert_eq!(prune_store(&store, now()).expect("prune"), 1);
        assert_eq!(prune_store(&store, now()).expect("second prune"), 0);

        let reopened = AdmissionStore::open(&path).expect("reopen");
        assert!(reopened.fetch(lapsed).expect("fetch").is_none());
        assert!(reopened.fetch(live).expect("fetch").is_some());
    }

    #[test]
    fn added_waves_start_inactive() {
        let store = AdmissionStore::in_memory();
        let wave = add_wave(
            &store,
            WaveAddArgs {
                title: "Gelombang 1".to_string(),
                academic_year: "2026/2027".to_string(),
                start_date: NaiveDate::from_ymd_opt(2026, 1, 5).expect("valid date"),
                end_date: NaiveDate::from_ymd_opt(2026, 3, 31).expect("valid date"),
                quota_target: 96,
                data_path: None,
            },
        )
        .expect("wave added");

        assert!(!wave.is_active);
        assert!(store.active().expect("active").is_none());
        assert_eq!(
            describe(&wave),
            "Gelombang 1 (2026/2027), 2026-01-05 to 2026-03-31, quota 96"
        );
    }
}
