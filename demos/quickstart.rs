//! Quick-start examples for the horde-video SDK.
//!
//! Run with:
//!   HORDE_API_KEY=... RUST_LOG=horde_video=info cargo run --example quickstart
//!
//! Without a key the anonymous key is used, which sits at the back of the queue.

use std::time::Duration;

use horde_video::{ClientBuilder, JobDescriptor, JobEvent, PollPolicy, Resolution, TemporalParams};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> horde_video::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // -----------------------------------------------------------------------
    // 1. Create a client (reads HORDE_API_KEY from environment)
    // -----------------------------------------------------------------------
    let client = ClientBuilder::new()
        .poll_policy(PollPolicy {
            wait_ceiling: Duration::from_secs(30 * 60),
            ..PollPolicy::default()
        })
        .build()?;

    // -----------------------------------------------------------------------
    // 2. Refresh the models the network currently serves
    // -----------------------------------------------------------------------
    let limits = client.refresh_limits().await?;
    println!("Available models: {}", limits.models.join(", "));
    println!();

    // -----------------------------------------------------------------------
    // 3. Watch lifecycle events in the background
    // -----------------------------------------------------------------------
    let mut events = client.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                JobEvent::StateChanged { job_id, from, to } => println!("  {job_id}: {from} -> {to}"),
                JobEvent::PollRetry { job_id, attempt, error } => {
                    println!("  {job_id}: poll retry #{attempt} ({error})")
                }
                _ => {}
            }
        }
    });

    // -----------------------------------------------------------------------
    // 4. Generate a clip and print partial frames as they arrive
    // -----------------------------------------------------------------------
    let job = JobDescriptor::text_to_video("a paper lantern drifting over a night lake")
        .with_model(limits.models[0].clone())
        .with_duration(3.0)
        .with_fps(16)
        .with_resolution(Resolution::HD_1024_576)
        .with_temporal(TemporalParams {
            motion_scale: 1.2,
            ..TemporalParams::default()
        });

    let result = client
        .generate(&job, |partial| println!("Partial {} ready", partial.id))
        .await?;

    println!("Job {} finished in {:.0?}", result.job_id, result.elapsed);
    for artifact in &result.artifacts {
        println!("  {} -> {:?}", artifact.id, artifact.location);
    }
    for warning in &result.warnings {
        println!("  warning: partial {} disagrees with final", warning.partial.id);
    }
    println!();

    // -----------------------------------------------------------------------
    // 5. Submit without blocking, check progress, then cancel
    // -----------------------------------------------------------------------
    let id = client.submit(&JobDescriptor::text_to_video("a fox in fresh snow")).await?;
    tokio::time::sleep(Duration::from_secs(10)).await;

    let progress = client.status(&id).await?;
    println!(
        "Job {} is {} (queue position {:?}, ~{:?} wait)",
        id, progress.state, progress.queue_position, progress.estimated_wait
    );
    client.cancel(&id).await?;
    println!("Cancelled {}", id);

    client.shutdown().await;
    Ok(())
}
