use anyhow::Context;
use tracing::{error, info};

use trackmap_worker::{
    config::Config,
    observability,
    pipeline::{PipelineOrchestrator, RunContext},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    std::panic::set_hook(Box::new(|panic_info| {
        let thread = std::thread::current();
        let thread_name = thread.name().unwrap_or("unnamed");
        let message = panic_info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| {
                panic_info
                    .payload()
                    .downcast_ref::<String>()
                    .map(|s| s.as_str())
            })
            .unwrap_or("unknown panic payload");

        if let Some(location) = panic_info.location() {
            error!(
                thread = thread_name,
                file = location.file(),
                line = location.line(),
                column = location.column(),
                message,
                "panic occurred"
            );
        } else {
            error!(
                thread = thread_name,
                message, "panic occurred without location information"
            );
        }
    }));

    observability::tracing::init().context("failed to initialize tracing")?;

    let config = Config::from_env().context("failed to load configuration")?;
    info!(
        input = %config.input_path().display(),
        output = %config.output_path().display(),
        group_count = config.group_count().get(),
        seed = config.seed(),
        projection_dim = config.projection_dim().get(),
        "starting trackmap batch run"
    );

    let orchestrator = PipelineOrchestrator::from_config(&config);
    let run = RunContext::new();
    let result = orchestrator.execute(&run).await?;

    info!(
        run_id = %result.run_id,
        rows_written = result.rows_written,
        output = %result.output_path.display(),
        "catalog enrichment finished"
    );

    Ok(())
}
