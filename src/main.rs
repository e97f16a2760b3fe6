use std::{process, sync::Arc};

use rollcall::{
    application::repos::SideStore,
    cache::{CacheConfig, ProfileSyncService},
    config::{self, Command, LookupArgs, Settings, SideStoreKind},
    domain::entities::UserProfile,
    infra::{
        bus::LocalChangeBus,
        error::InfraError,
        fixtures::{FixtureProfileStore, TemplateResolver},
        side_store::{FileSideStore, MemorySideStore},
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &InfraError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), InfraError> {
    let (cli_args, settings) = config::load_with_cli().map_err(|err| {
        InfraError::configuration(format!("failed to load configuration: {err}"))
    })?;

    telemetry::init(&settings.logging)?;

    match cli_args.command {
        Command::Lookup(args) => run_lookup(&settings, args).await,
        Command::ClearSnapshots => run_clear_snapshots(&settings).await,
    }
}

async fn run_lookup(settings: &Settings, args: LookupArgs) -> Result<(), InfraError> {
    let store = Arc::new(FixtureProfileStore::load(&args.fixtures).await?);

    let mut builder = ProfileSyncService::builder(store)
        .config(CacheConfig::from(&settings.cache))
        .side_store(build_side_store(settings)?)
        .change_bus(Arc::new(LocalChangeBus::default()));
    if let Some(base_url) = settings.resolver.base_url.as_ref() {
        builder = builder.resolver(Arc::new(TemplateResolver::new(base_url.clone())));
    }
    let service = builder.build();
    service.ensure_active()?;

    if args.batch {
        service.get_users(&args.ids).await;
    } else {
        for id in &args.ids {
            service.get_user(id).await;
        }
    }

    // Let avatar resolution settle so the printed profiles are enriched.
    service.wait_idle().await;

    let profiles: Vec<UserProfile> = args
        .ids
        .iter()
        .map(|id| {
            service
                .get(id)
                .unwrap_or_else(|| UserProfile::placeholder(id))
        })
        .collect();

    let report = service.flush().await;
    service.deactivate();
    info!(
        resolved = profiles.len(),
        snapshots_written = report.written,
        snapshots_failed = report.failed,
        "Lookup complete"
    );

    println!("{}", serde_json::to_string_pretty(&profiles)?);
    Ok(())
}

async fn run_clear_snapshots(settings: &Settings) -> Result<(), InfraError> {
    let service = ProfileSyncService::builder(Arc::new(FixtureProfileStore::default()))
        .config(CacheConfig::from(&settings.cache))
        .side_store(build_side_store(settings)?)
        .build();

    service.clear_snapshots().await?;
    info!(
        directory = %settings.side_store.directory.display(),
        "Profile snapshots cleared"
    );
    Ok(())
}

fn build_side_store(settings: &Settings) -> Result<Arc<dyn SideStore>, InfraError> {
    let store: Arc<dyn SideStore> = match settings.side_store.kind {
        SideStoreKind::File => Arc::new(FileSideStore::new(&settings.side_store.directory)?),
        SideStoreKind::Memory => Arc::new(MemorySideStore::new(settings.side_store.memory_limit)),
    };
    Ok(store)
}
