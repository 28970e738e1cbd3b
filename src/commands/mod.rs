//! Remote directives: parse, dispatch to the scheduler, reply through the
//! dispatcher.

mod directive;

use log::{info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::SyncDispatcher;
use crate::error::AgentError;
use crate::models::CommandResult;
use crate::scheduler::{ForceSync, MonitorScheduler};
use crate::utils::now_ms;

pub use directive::{CommandError, Directive, RawDirective};

#[derive(Clone)]
pub struct CommandChannel {
    scheduler: MonitorScheduler,
    dispatcher: SyncDispatcher,
}

impl CommandChannel {
    pub fn new(scheduler: MonitorScheduler, dispatcher: SyncDispatcher) -> Self {
        Self {
            scheduler,
            dispatcher,
        }
    }

    /// Runs a directive and returns exactly one result. Never fails.
    pub async fn execute(&self, raw: &RawDirective) -> CommandResult {
        let issued_at = now_ms();
        let (command, outcome) = match Directive::try_from(raw) {
            Ok(directive) => (directive.name().to_string(), self.apply(directive).await),
            Err(err) => (raw.normalized_kind(), Err(err)),
        };

        match outcome {
            Ok(message) => {
                info!("command {command} succeeded: {message}");
                CommandResult::success(command, message, raw.command_id.clone(), issued_at)
            }
            Err(err) => {
                warn!("command {command} failed: {err}");
                CommandResult::error(command, err.to_string(), raw.command_id.clone(), issued_at)
            }
        }
    }

    /// Executes `raw` and submits the result for delivery.
    pub async fn handle(&self, raw: &RawDirective) -> Result<CommandResult, AgentError> {
        let result = self.execute(raw).await;
        self.dispatcher
            .submit_command_result(result.clone())
            .await?;
        Ok(result)
    }

    async fn apply(&self, directive: Directive) -> Result<String, CommandError> {
        match directive {
            Directive::SyncNow(source) => match self.scheduler.force_sync(source).await? {
                ForceSync::Triggered => Ok(format!("sync triggered for {source}")),
                ForceSync::AlreadyInFlight => Ok(format!("sync already in progress for {source}")),
            },
            Directive::Reconfigure { source, interval } => {
                self.scheduler.reconfigure(source, interval).await?;
                Ok(format!("{source} interval set to {}ms", interval.as_millis()))
            }
            Directive::StopAll => {
                let stopped = self.scheduler.stop_all().await;
                Ok(format!("stopped {} monitor(s)", stopped.len()))
            }
            Directive::RestartAgent => {
                let restarted = self.scheduler.restart().await?;
                Ok(format!("restarted {} monitor(s)", restarted.len()))
            }
        }
    }

    /// Consumes directives until the channel closes or `cancel` fires.
    pub async fn run(self, mut directives: mpsc::Receiver<RawDirective>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                directive = directives.recv() => match directive {
                    Some(raw) => {
                        if let Err(err) = self.handle(&raw).await {
                            warn!("could not queue result for {}: {err}", raw.kind);
                        }
                    }
                    None => break,
                },
            }
        }
        info!("command channel closed");
    }
}
