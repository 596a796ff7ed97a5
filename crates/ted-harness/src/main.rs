//! ted runner entry point.
//!
//! Runs the install smoke suite (install, then cleanup) against every
//! configured machine, prints one line per suite and exits non-zero if any
//! suite failed.

use std::sync::Arc;
use ted_core::CoreError;
use ted_harness::{Harness, HarnessConfig};
use ted_vm::{VmrunConfig, VmrunDriver};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr, suite results to stdout
    tracing_subscriber::registry()
        .with(
            EnvFilter::from_default_env()
                .add_directive("ted_harness=info".parse()?)
                .add_directive("ted_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = HarnessConfig::load()?;
    config.validate()?;
    tracing::info!(?config, "Configuration loaded");

    let vmrun = VmrunConfig::from_env();
    vmrun.validate_warn();

    let harness = Harness::new(config, Arc::new(VmrunDriver::new(vmrun)));
    let reports = harness
        .describe("install", |harness, params| async move {
            harness.install(&params.tag)?.cleanup().await?;
            Ok::<_, CoreError>(())
        })
        .await;

    for report in &reports {
        println!("{report}");
    }

    let failed = reports.iter().filter(|r| !r.passed()).count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} suites failed", reports.len());
    }
    tracing::info!(suites = reports.len(), "All suites passed");
    Ok(())
}
