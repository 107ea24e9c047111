//! pollsrv - scheduled Modbus data acquisition into SQLite

use clap::Parser;
use common::CancellationToken;
use errors::{ServiceErrorTrait, ServiceResult};
use tracing::{error, info};

use pollsrv::bootstrap::{self, Args};
use pollsrv::scheduler::Scheduler;
use pollsrv::session::ModbusSession;
use pollsrv::{SERVICE_NAME, SERVICE_VERSION};

#[tokio::main]
async fn main() -> ServiceResult<()> {
    let args = Args::parse();

    let settings = match args.load_settings() {
        Ok(settings) => settings,
        Err(e) => {
            // Logging is configured from settings; fall back to the console
            let _ = common::logging::init_console(tracing::Level::INFO);
            error!("[{}] {}", e.error_code(), e);
            return Err(e);
        },
    };

    bootstrap::initialize_logging(&settings)?;
    info!("Starting {} v{}", SERVICE_NAME, SERVICE_VERSION);

    let result = run(&args, settings).await;
    if let Err(e) = &result {
        error!("[{}] {}", e.error_code(), e);
    }
    result
}

async fn run(args: &Args, settings: pollsrv::config::Settings) -> ServiceResult<()> {
    let table = bootstrap::load_variable_table()?;

    if args.validate {
        bootstrap::validate_configuration(&settings, &table);
        return Ok(());
    }

    let sink = bootstrap::open_storage(&settings).await?;

    let session = ModbusSession::new(
        settings.endpoint.clone(),
        settings.timeout,
        settings.baud_rate,
    );

    let shutdown = CancellationToken::new();
    let listener = common::shutdown::cancel_on_shutdown(shutdown.clone());

    let mut scheduler = Scheduler::new(
        session,
        sink.clone(),
        table,
        settings.cycle_options(),
        settings.interval,
        settings.scheduler_mode(),
    );
    let result = scheduler.run(shutdown.clone()).await;

    shutdown.cancel();
    let _ = listener.await;
    if let Some(sink) = &sink {
        sink.client().close().await;
    }

    Ok(result?)
}
