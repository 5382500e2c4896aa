use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use orion_error::prelude::*;
use rk_config::{SinkConfig, SinkKind, SinksConfig};
use rk_core::checkpoint::{CheckpointCoordinator, FileCheckpointStore};
use rk_core::output::PipelineId;
use rk_core::sink::{ConsoleSink, JsonLinesSink, KeyedFileSink, Sink, SinkDispatcher, SinkRuntime};

use crate::error::RuntimeResult;

// ---------------------------------------------------------------------------
// Build SinkDispatcher from the [sinks] table
// ---------------------------------------------------------------------------

/// Open one sink per output pipeline and bind it in a [`SinkDispatcher`].
///
/// Bindings are resolved here once; the dispatcher never looks at config
/// again.
pub(crate) async fn build_sink_dispatcher(sinks: &SinksConfig) -> anyhow::Result<SinkDispatcher> {
    let mut routes = HashMap::new();
    for id in PipelineId::ALL {
        let config = sink_config(sinks, id);
        let sink = open_sink(id, config)
            .await
            .with_context(|| format!("failed to open {:?} sink for {id}", config.kind))?;
        rk_debug!(pipe, pipeline = %id, kind = kind_name(config.kind), "sink opened");
        routes.insert(
            id,
            Arc::new(SinkRuntime::new(id.as_str(), kind_name(config.kind), sink)),
        );
    }
    SinkDispatcher::new(routes).map_err(|e| anyhow::anyhow!("{e}"))
}

/// One file-backed checkpoint store per pipeline, in the pipeline's
/// `checkpoint` directory.
pub(crate) fn build_coordinator(sinks: &SinksConfig) -> RuntimeResult<CheckpointCoordinator> {
    let mut coordinator = CheckpointCoordinator::new();
    for id in PipelineId::ALL {
        let dir = sink_config(sinks, id).checkpoint.clone();
        rk_debug!(pipe, pipeline = %id, dir = %dir.display(), "checkpoint store");
        coordinator
            .register(id.as_str(), Arc::new(FileCheckpointStore::new(dir)))
            .err_conv()?;
    }
    Ok(coordinator)
}

fn sink_config(sinks: &SinksConfig, id: PipelineId) -> &SinkConfig {
    match id {
        PipelineId::Raw => &sinks.raw,
        PipelineId::TimeKpi => &sinks.time_kpi,
        PipelineId::CountryKpi => &sinks.country_kpi,
    }
}

async fn open_sink(id: PipelineId, config: &SinkConfig) -> anyhow::Result<Box<dyn Sink>> {
    let path = || {
        config
            .path
            .as_ref()
            .with_context(|| format!("{id} sink of kind {:?} requires 'path'", config.kind))
    };
    Ok(match config.kind {
        SinkKind::Console => Box::new(ConsoleSink::stdout(id.as_str())),
        SinkKind::File => Box::new(JsonLinesSink::open(path()?).await?),
        SinkKind::KeyedFile => Box::new(KeyedFileSink::open(path()?).await?),
    })
}

fn kind_name(kind: SinkKind) -> &'static str {
    match kind {
        SinkKind::Console => "console",
        SinkKind::File => "file",
        SinkKind::KeyedFile => "keyed_file",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rk_core::output::OutputRow;
    use std::path::Path;

    fn sink(kind: SinkKind, path: Option<&Path>, checkpoint: &Path) -> SinkConfig {
        SinkConfig {
            kind,
            path: path.map(Path::to_path_buf),
            checkpoint: checkpoint.to_path_buf(),
            trigger_interval: None,
        }
    }

    fn sinks(dir: &Path) -> SinksConfig {
        SinksConfig {
            raw: sink(SinkKind::Console, None, &dir.join("ck/raw")),
            time_kpi: sink(
                SinkKind::File,
                Some(&dir.join("out/time_kpi.jsonl")),
                &dir.join("ck/time_kpi"),
            ),
            country_kpi: sink(
                SinkKind::KeyedFile,
                Some(&dir.join("out/country_kpi.json")),
                &dir.join("ck/country_kpi"),
            ),
        }
    }

    #[tokio::test]
    async fn binds_each_pipeline_to_its_kind() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = build_sink_dispatcher(&sinks(dir.path())).await.unwrap();

        let row = OutputRow {
            key: Some("k".into()),
            json: r#"{"v":1}"#.into(),
        };
        dispatcher
            .dispatch(PipelineId::CountryKpi, std::slice::from_ref(&row))
            .await
            .unwrap();
        let keyed = KeyedFileSink::read_all(dir.path().join("out/country_kpi.json"))
            .await
            .unwrap();
        assert_eq!(keyed["k"]["v"], 1);

        dispatcher
            .dispatch(PipelineId::TimeKpi, &[row])
            .await
            .unwrap();
        dispatcher.stop_all().await;
        let lines = std::fs::read_to_string(dir.path().join("out/time_kpi.jsonl")).unwrap();
        assert_eq!(lines.trim(), r#"{"v":1}"#);
    }

    #[tokio::test]
    async fn file_sink_without_path_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sinks(dir.path());
        config.time_kpi.path = None;
        let err = build_sink_dispatcher(&config).await.unwrap_err();
        assert!(format!("{err:#}").contains("requires 'path'"));
    }

    #[tokio::test]
    async fn coordinator_has_a_slot_per_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = build_coordinator(&sinks(dir.path())).unwrap();
        for id in PipelineId::ALL {
            let record = coordinator.recover(id.as_str()).await.unwrap();
            assert_eq!(record.batch_id, 0);
            assert_eq!(record.committed_offset, None);
        }
    }
}
