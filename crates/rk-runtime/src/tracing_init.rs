//! Subscriber setup: a stderr layer plus an optional non-blocking file layer,
//! each rendering either JSON or the `[domain]`-prefixed text format.

use std::fmt::{self as stdfmt, Write as _};

use anyhow::{Context, Result};
use rk_config::{LogFormat, LoggingConfig};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::field::RecordFields;
use tracing_subscriber::fmt::format::{DefaultFields, Writer};
use tracing_subscriber::fmt::time::{FormatTime, SystemTime};
use tracing_subscriber::fmt::{self, FmtContext, FormatEvent, FormatFields, FormattedFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Initialise the `tracing` subscriber stack from [`LoggingConfig`].
///
/// The returned [`WorkerGuard`] must live until exit; dropping it flushes
/// the file writer. `RUST_LOG`, when set, replaces the configured filter.
pub fn init_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let json = config.format == LogFormat::Json;
    let mut layers = vec![stderr_layer(json, build_filter(config)?)];

    let guard = match &config.file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .context("log file path has no parent directory")?;
            let name = path.file_name().context("log file path has no file name")?;
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create log directory {}", dir.display()))?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            layers.push(file_layer(json, writer, build_filter(config)?));
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| anyhow::anyhow!("tracing already initialised: {e}"))?;
    Ok(guard)
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if std::env::var("RUST_LOG").is_ok() {
        return Ok(EnvFilter::from_default_env());
    }
    let directives = filter_directives(config);
    EnvFilter::try_new(&directives)
        .map_err(|e| anyhow::anyhow!("invalid log filter '{directives}': {e}"))
}

/// `level` followed by the per-module overrides in name order.
fn filter_directives(config: &LoggingConfig) -> String {
    let mut modules: Vec<_> = config.modules.iter().collect();
    modules.sort();
    modules
        .into_iter()
        .fold(config.level.clone(), |mut out, (module, level)| {
            write!(out, ",{module}={level}").ok();
            out
        })
}

fn stderr_layer(json: bool, filter: EnvFilter) -> BoxedLayer {
    let layer = fmt::layer().with_writer(std::io::stderr);
    if json {
        layer.json().with_target(false).with_filter(filter).boxed()
    } else {
        layer
            .event_format(DomainFormat)
            .with_filter(filter)
            .boxed()
    }
}

fn file_layer(json: bool, writer: NonBlocking, filter: EnvFilter) -> BoxedLayer {
    let layer = fmt::layer().with_ansi(false).with_writer(writer);
    if json {
        layer
            .json()
            .fmt_fields(FileFields::default())
            .with_target(false)
            .with_filter(filter)
            .boxed()
    } else {
        layer
            .event_format(DomainFormat)
            .fmt_fields(FileFields::default())
            .with_filter(filter)
            .boxed()
    }
}

/// Field formatter for the file layer. A distinct type keeps its cached span
/// fields apart from the ANSI-coloured ones of the stderr layer.
#[derive(Default)]
struct FileFields(DefaultFields);

impl<'writer> FormatFields<'writer> for FileFields {
    fn format_fields<R: RecordFields>(&self, writer: Writer<'writer>, fields: R) -> stdfmt::Result {
        self.0.format_fields(writer, fields)
    }
}

/// Text format with the `domain` field lifted into a `[domain]` prefix:
///
/// ```text
/// 2024-03-01T10:00:05Z  INFO [pipe] batch committed pipeline=time_kpi batch_id=7
/// ```
struct DomainFormat;

impl<S, N> FormatEvent<S, N> for DomainFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> stdfmt::Result {
        let ansi = writer.has_ansi_escapes();
        let paint = |w: &mut Writer<'_>, style: &str, text: &dyn stdfmt::Display| {
            if ansi {
                write!(w, "\x1b[{style}m{text}\x1b[0m")
            } else {
                write!(w, "{text}")
            }
        };

        let mut time = String::new();
        if SystemTime.format_time(&mut Writer::new(&mut time)).is_err() {
            time.push_str("<unknown time>");
        }
        paint(&mut writer, "2", &time)?;

        let level = *event.metadata().level();
        let style = match level {
            Level::ERROR => "31",
            Level::WARN => "33",
            Level::INFO => "32",
            Level::DEBUG => "34",
            Level::TRACE => "35",
        };
        write!(writer, " ")?;
        paint(&mut writer, style, &format_args!("{level:>5}"))?;
        write!(writer, " ")?;

        let mut fields = SplitFields::default();
        event.record(&mut fields);

        if let Some(domain) = &fields.domain {
            paint(&mut writer, "1;36", &format_args!("[{domain}]"))?;
            write!(writer, " ")?;
        }

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                paint(&mut writer, "1", &span.name())?;
                let ext = span.extensions();
                match ext.get::<FormattedFields<N>>() {
                    Some(f) if !f.is_empty() => write!(writer, "{{{f}}}: ")?,
                    _ => write!(writer, "{{}}: ")?,
                }
            }
        }

        write!(writer, "{}", fields.message)?;
        if !fields.rest.is_empty() {
            write!(writer, " ")?;
            paint(&mut writer, "3", &fields.rest)?;
        }
        writeln!(writer)
    }
}

/// Pulls `domain` and `message` out of an event; everything else is joined
/// as `name=value`.
#[derive(Default)]
struct SplitFields {
    domain: Option<String>,
    message: String,
    rest: String,
}

impl Visit for SplitFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "domain" {
            self.domain = Some(value.to_string());
        } else {
            self.record_debug(field, &value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn stdfmt::Debug) {
        match field.name() {
            "domain" => {
                self.domain = Some(format!("{value:?}").trim_matches('"').to_string());
            }
            "message" => {
                write!(self.message, "{value:?}").ok();
            }
            name => {
                if !self.rest.is_empty() {
                    self.rest.push(' ');
                }
                write!(self.rest, "{name}={value:?}").ok();
            }
        }
    }
}
