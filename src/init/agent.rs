// SPDX-License-Identifier: Apache-2.0

//! Assembles and runs the daemon: registry task, console sink drain,
//! supervisor fed from the inputs file, and ordered shutdown.

use std::sync::Arc;

use tokio::select;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config_feed::{self, config_channel, DEFAULT_FEED_CAPACITY};
use crate::init::args::AgentRun;
use crate::init::BoxError;
use crate::sinks::console::console_sink;
use crate::sinks::Sink;
use crate::supervisor::Supervisor;
use crate::tail::registry::Registry;

pub async fn run_agent(agent: AgentRun, shutdown: impl std::future::Future<Output = ()>) -> Result<(), BoxError> {
    let inputs = config_feed::load_inputs_file(&agent.config)?;
    info!(
        config = %agent.config.display(),
        count = inputs.len(),
        "loaded input configurations"
    );

    let (registry, registry_handle) =
        Registry::new(&agent.registry_file, agent.registry_flush, None)?;
    registry.load()?;
    let registry_states = registry.states();

    let (sink, writer) = console_sink(agent.sink_queue_size);
    let sink: Arc<dyn Sink> = Arc::new(sink);

    let registry_cancel = CancellationToken::new();
    let writer_cancel = CancellationToken::new();
    let supervisor_cancel = CancellationToken::new();

    let mut task_set: JoinSet<()> = JoinSet::new();
    task_set.spawn(registry.run(registry_cancel.clone()));
    task_set.spawn(writer.run(writer_cancel.clone()));

    let supervisor = Supervisor::new(registry_handle, registry_states, Arc::clone(&sink));
    let (feed_handle, feed) = config_channel(DEFAULT_FEED_CAPACITY);
    let mut supervisor_task = tokio::spawn(supervisor.run(feed, supervisor_cancel.clone()));

    feed_handle
        .push(inputs)
        .await
        .map_err(|e| -> BoxError { format!("pushing initial inputs failed: {}", e).into() })?;

    let mut supervisor_done = false;
    select! {
        _ = shutdown => {
            info!("shutdown signal received");
        }
        result = &mut supervisor_task => {
            warn!("unexpected early exit of supervisor");
            if let Err(e) = result {
                warn!(error = %e, "supervisor task failed");
            }
            supervisor_done = true;
        }
    }

    // Stop inputs first so every worker drains its final state update.
    supervisor_cancel.cancel();
    if !supervisor_done {
        let _ = supervisor_task.await;
    }

    // Then let the registry take its final snapshot.
    registry_cancel.cancel();

    // Finally close the sink and drain what is left on the console.
    let _ = sink.close();
    writer_cancel.cancel();

    while task_set.join_next().await.is_some() {}

    info!("taild stopped");
    Ok(())
}
