use std::sync::Arc;

use anyhow::{bail, Context, Result};
use sweep_engine::{
    CallClass, CancellationSignal, Credential, DeleteFilters, EngineConfig, ExportOptions,
    MutationReport, SweepEngine, Target, TimeWindow,
};
use sweep_slack::{SlackApiConfig, SlackWebApiClient};

use crate::cli_args::{Cli, DeleteFilterArgs, SweepCommand, WindowArgs};

pub(crate) fn engine_config_from_cli(cli: &Cli) -> EngineConfig {
    let mut config = EngineConfig {
        default_limit: cli.default_limit,
        operation_timeout_ms: cli.operation_timeout_ms,
        jitter: !cli.no_jitter,
        ..EngineConfig::default()
    };
    if let Some(interval) = cli.history_interval_ms {
        config.policy_mut(CallClass::History).min_interval_ms = interval;
    }
    if let Some(interval) = cli.mutation_interval_ms {
        config.policy_mut(CallClass::Mutation).min_interval_ms = interval;
    }
    if let Some(pause) = cli.stream_pause_ms {
        config.export_stream_pause_ms = pause;
        config.delete_stream_pause_ms = pause;
    }
    config
}

pub(crate) fn time_window(args: &WindowArgs) -> Result<TimeWindow> {
    if let (Some(oldest), Some(newest)) = (args.oldest, args.newest) {
        if oldest > newest {
            bail!("--oldest ({oldest}) must not be after --newest ({newest})");
        }
    }
    Ok(TimeWindow {
        oldest: args.oldest,
        newest: args.newest,
    })
}

pub(crate) fn delete_filters(
    actor_id: Option<&str>,
    args: &DeleteFilterArgs,
) -> Result<DeleteFilters> {
    Ok(DeleteFilters {
        actor_id: actor_id.map(ToOwned::to_owned),
        window: time_window(&args.window)?,
        limit: args.limit,
        include_thread_replies: args.include_thread_replies,
    })
}

fn spawn_ctrl_c_listener(cancel: &CancellationSignal) {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; reporting partial results");
            cancel.cancel();
        }
    });
}

fn warn_if_partial(report: &MutationReport) {
    if !report.is_complete() {
        tracing::warn!(
            succeeded = report.total_succeeded(),
            failed = report.total_failed(),
            cancelled = report.cancelled,
            "delete run is partial"
        );
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let rendered =
        serde_json::to_string_pretty(value).context("failed to render result as json")?;
    println!("{rendered}");
    Ok(())
}

pub(crate) async fn run_cli(cli: Cli) -> Result<()> {
    let api = SlackWebApiClient::new(&SlackApiConfig {
        api_base: cli.api_base.clone(),
        request_timeout_ms: cli.request_timeout_ms,
        ..SlackApiConfig::default()
    })?;
    let engine = SweepEngine::new(Arc::new(api), engine_config_from_cli(&cli));
    let credential = Credential::new(cli.token.as_str());
    let cancel = CancellationSignal::new();
    spawn_ctrl_c_listener(&cancel);

    match &cli.command {
        SweepCommand::Export(args) => {
            let target = match (&args.channel, &args.actor) {
                (Some(channel), None) => Target::channel(channel.as_str()),
                (None, Some(actor)) => Target::actor(actor.as_str()),
                _ => bail!("pass exactly one of --channel or --actor"),
            };
            let options = ExportOptions {
                window: time_window(&args.window)?,
                limit: args.limit,
                actor_filter: args.actor_filter.clone(),
            };
            let result = engine
                .export_collection(&credential, &target, &options, &cancel)
                .await?;
            if !result.is_complete() {
                tracing::warn!(records = result.total_records(), "export is partial");
            }
            print_json(&result)
        }
        SweepCommand::DeleteInStream(args) => {
            let filters = delete_filters(args.actor.as_deref(), &args.filters)?;
            let outcome = engine
                .delete_in_stream(&credential, &args.stream, &filters, &cancel)
                .await?;
            print_json(&outcome)
        }
        SweepCommand::DeleteAll(args) => {
            let filters = delete_filters(Some(args.actor.as_str()), &args.filters)?;
            let report = engine
                .delete_all_for_actor(&credential, &args.actor, &filters, &cancel)
                .await?;
            warn_if_partial(&report);
            print_json(&report)
        }
        SweepCommand::DeleteDirect(args) => {
            let filters = delete_filters(Some(args.actor.as_str()), &args.filters)?;
            let report = engine
                .delete_direct_history(&credential, &args.actor, &filters, &cancel)
                .await?;
            warn_if_partial(&report);
            print_json(&report)
        }
        SweepCommand::DeleteBetween(args) => {
            let filters = delete_filters(Some(args.actor.as_str()), &args.filters)?;
            let report = engine
                .delete_between_actors(
                    &credential,
                    &args.actor,
                    &args.other_actor,
                    &filters,
                    &cancel,
                )
                .await?;
            warn_if_partial(&report);
            print_json(&report)
        }
    }
}
